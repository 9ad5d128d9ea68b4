/// A composite export key of the form `<username>-<loginId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectKey<'a>(pub &'a str);

impl<'a> SubjectKey<'a> {
    /// Everything before the first `-`, or the whole key.
    pub fn username(&self) -> &'a str {
        self.0.split_once('-').map_or(self.0, |(user, _)| user)
    }

    /// Everything after the first `-`, empty when the key has no separator.
    pub fn login_id(&self) -> &'a str {
        self.0.split_once('-').map_or("", |(_, login)| login)
    }

    /// Leading identity cells shared by every table a subject produces.
    pub fn identity_cells(&self) -> [(&'static str, String); 2] {
        [
            ("username", self.username().to_string()),
            ("login_id", self.login_id().to_string()),
        ]
    }
}
