//! The tracked cloaking task: state machine, progress estimate, operator log
//! and the controller that ties them together.

pub mod controller;
pub mod log;
pub mod progress;
pub mod state;

pub use controller::TaskController;
pub use log::{LogChannel, LogEntry};
pub use progress::ProgressEstimator;
pub use state::{TaskSnapshot, TaskState};
