pub mod executor;
pub mod subprocess;

pub use executor::{Executor, ExecutorFactory, ExecutorScope, JobId, JobRequest, JobStatus};
pub use subprocess::SubprocessExecutor;
