//! Core logic including the orchestration loop, tool execution, message
//! adaptation, etc.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod adapter;
pub mod conversation;
mod error;
mod model_client;
mod orchestrator;
pub mod tool;

pub use error::Error;
pub use orchestrator::{
    DEFAULT_MAX_ROUNDS, Orchestrator, OrchestratorBuilder, Stage, Termination,
    TurnOutcome,
};
pub use tokio_util::sync::CancellationToken;
