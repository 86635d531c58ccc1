pub mod cli;
pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod interpreter;
pub mod types;

// Re-export main types
pub use types::*;

pub use config::{Config, ConditionErrorPolicy, Limits};
pub use driver::{ActionRegistry, ElementHandle, MemoryRegistry, PageDriver, SelectorResolver};
pub use errors::{ActionError, DriverError, ErrorKind, Severity, TimeoutScope};
pub use executor::{DryRunPlan, ExecutionContext, Executor, PlannedStep, Planner};
pub use interpreter::{ExpressionError, Val, VariableContext};
