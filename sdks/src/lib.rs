/// Meridian Rust SDK
///
/// Talk to Meridian workers over the A2A protocol: discover capabilities,
/// submit tasks, poll status, cancel.

pub mod client;

pub use client::A2aClient;
pub use meridian_orchestrator_core::domain::protocol::{
    A2aTaskStatus, AgentCapabilities, AgentCard, Artifact, Message, Part, Role, TaskRequest,
    TaskResponse, TaskState,
};
