//! Batch ripper for survey/experience-sampling session exports: one JSON
//! export in, aggregated response and device CSVs plus error logs out.

pub mod devices;
pub mod error;
pub mod pipeline;
pub mod responses;
pub mod setup;
pub mod subject;
pub mod table;

pub use error::RipError;
pub use pipeline::{run, RunSummary};
