mod context;
mod scheduler;

pub use context::RuntimeContext;
pub use scheduler::{QueueScheduler, Scheduler};
