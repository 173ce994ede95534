pub mod error;
pub mod queue;
pub mod runtime;

pub use error::{JobError, JobResult};
pub use queue::{Job, JobKind, JobQueue, Priority};
pub use runtime::{JobHandler, JobRuntime, JobRuntimeConfig};
