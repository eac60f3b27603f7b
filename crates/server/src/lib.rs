//! armature server: TCP front end and model host for the marshaling engine.
//!
//! [`model`] holds the in-memory parametric document the executor owns,
//! [`handlers`] registers the operation catalog against it, and [`net`] serves
//! line-delimited JSON over TCP.

#![warn(missing_docs)]

pub mod handlers;
pub mod model;
pub mod net;

pub use model::{Document, document_resource};
pub use net::serve;
