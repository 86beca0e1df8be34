//! Service publishing and remote method calls over a publish/subscribe broker.
//!
//! Independent processes publish named services whose methods other processes can call.
//! One process acts as the rendezvous daemon: it keeps the directory of published services,
//! answers lookups and watches over the liveness of every client. Method calls then travel
//! directly between caller and owner over topics addressed by client identity.
//!
//! The crate is split into the project agnostic [`library`] (job scheduling, the message
//! document and transports), the [`hub`] which implements the actual protocol on top of it,
//! and the [`harness`] which keeps executables alive.

#![deny(missing_docs)]

pub mod harness;
pub mod hub;
pub mod library;
