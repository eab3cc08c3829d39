//! Per-repository and per-batch processing outcomes.

mod batch;
mod error;
mod result;

pub use batch::BatchProcessingResult;
pub use error::{ErrorKind, ProcessingError};
pub use result::ProcessingResult;

pub(crate) use result::ResultBuilder;
