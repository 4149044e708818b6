pub mod context;
pub mod execution;
pub mod handler;
pub mod traits;

pub use context::Context;
pub use execution::{catch_panic, log_task_failure, panic_message, ExecutionRecord};
pub use handler::{task_handler, TaskFuture, TaskHandler};
pub use traits::{HealthCheck, Server};

pub use taskhub_errors::{AppError, AppResult, ErrorKind, ReasonCode};
