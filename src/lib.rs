pub mod cfg;
pub mod checkpoint;
pub mod cleanup;
pub mod data;
pub mod executors;
pub mod modules;
pub mod runtime;

pub use cfg::{Config, ConfigBuilder};
pub use checkpoint::{Checkpoint, Checkpoints};
pub use cleanup::{Cleaner, DeferredCleaner};
pub use data::{
    default_merge, AttrScope, MergeFn, Merger, Output, OutputSpec, Sample, SampleCollection,
    SampleState,
};
pub use executors::{
    Executor, ExecutorFactory, ExecutorScope, JobId, JobRequest, JobStatus, SubprocessExecutor,
};
pub use modules::dispatcher::DispatchOutcome;
pub use modules::{
    AttrSchema, Hook, HookCondition, HookFn, HookKind, HookScope, Module, Registry, RunnerDef,
    RunnerFn, RunnerScope,
};
pub use runtime::{
    execute, init_logging, Pipeline, Telemetry, TelemetrySnapshot, EXIT_FAILURE, EXIT_INTERRUPT,
    EXIT_SUCCESS,
};
