//! Task and shutdown plumbing shared by the gateway's long-lived services.

pub mod notify_once;
pub mod task;
