//! The protocol between the orchestrator and language-model backends.
//!
//! Backends (OpenAI-compatible servers, scripted fakes, ...) implement
//! [`ModelProvider`] and stream [`ModelResponseEvent`]s back. The
//! orchestrator only ever talks to this crate, so switching backends never
//! touches the loop itself.
//!
//! Types in this crate don't define any behavior beyond trivial accessors,
//! they are the constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
