//! Coordinator runtime and API surface.

pub mod api;
pub mod coordinator;

pub use api::{cancel_task, submit_task, task_status, Health, TaskStatusResponse, TaskSubmission};
pub use coordinator::Coordinator;
