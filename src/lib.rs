//! Cloak client. Submits image batches to the remote cloaking service and
//! tracks the job through completion.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod task;
