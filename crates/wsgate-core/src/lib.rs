//! wsgate-core - Wire envelope and error types for the wsgate gateway.
//!
//! This crate holds the JSON frame envelope exchanged with clients, topic
//! name validation, and the gateway error taxonomy. It performs no I/O and
//! is shared by the server and by anything that needs to speak the wire
//! format.

pub mod envelope;
pub mod error;
pub mod topic;

pub use envelope::{Action, ClientFrame, RejectReason, ServerFrame};
pub use error::{Error, ProtocolError, Result};
