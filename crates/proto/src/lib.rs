//! Shared wire types for the armature remote-control protocol.
//!
//! This crate defines the messages exchanged between clients and the armature
//! server over a persistent TCP connection. The protocol is newline-delimited
//! JSON: one request object per line in, one response object per line out.

#![warn(missing_docs)]

pub mod types;

pub use types::*;
