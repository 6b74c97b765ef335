pub mod dispatcher;
pub mod hook;
pub mod registry;
pub mod runner;

pub use hook::{resolve_order, Constraint, Hook, HookCondition, HookFn, HookKind, HookScope};
pub use registry::{AttrSchema, Module, Registry};
pub use runner::{RunnerDef, RunnerFn, RunnerScope};
