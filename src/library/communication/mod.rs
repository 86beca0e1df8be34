//! Structures to exchange documents between processes
//!
//! The [`Message`] is the unit of data: a structured document with a text and a transport-safe form.
//! [`Transport`](transport::Transport) implementations move the transport-safe form between processes
//! over topic based publish and subscribe channels. Which topics exist and what travels on them is
//! decided by the consumers of this module.

mod message;

pub mod transport;

pub use message::{Message, MessageError};
