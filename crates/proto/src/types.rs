//! Wire types for the armature protocol.
//!
//! Every request carries a client-assigned correlation id which is echoed
//! verbatim on the response. Method names are namespaced strings of the form
//! `domain.operation_name` (e.g. `sketch.add_line`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-assigned correlation id for requests and responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Stable opaque token identifying a mutable host resource (a sketch, a document).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
	/// Creates a resource id from any string-like token.
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	/// Returns the raw token.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Monotonic per-resource change counter.
///
/// Strictly increases on every committed mutation of the resource and never
/// otherwise; a rolled-back transaction leaves it untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl Revision {
	/// Returns the revision after one committed mutation.
	#[must_use]
	pub const fn next(self) -> Self {
		Self(self.0 + 1)
	}
}

impl fmt::Display for Revision {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Parameter map carried by a request.
pub type Params = serde_json::Map<String, Value>;

/// One inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, echoed on the response.
	pub id: RequestId,
	/// Namespaced method name (`domain.operation_name`).
	pub method: String,
	/// Method parameters. Absent params decode as an empty map.
	#[serde(default)]
	pub params: Params,
}

/// One step of a multi-step transaction: a handler call by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCall {
	/// Namespaced method name.
	pub method: String,
	/// Parameters for the call.
	#[serde(default)]
	pub params: Params,
}

/// Stable numeric error codes.
///
/// The JSON-RPC-compatible range is used for request-shape failures so that
/// existing host clients keep working; armature-specific conditions live in
/// the `-320xx` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ErrorCode {
	/// Request line was not valid JSON.
	ParseError,
	/// No handler registered under the requested method name.
	MethodNotFound,
	/// A declared parameter is missing or has the wrong type.
	InvalidParams,
	/// The handler raised during execution.
	Internal,
	/// Submission queue is at its configured depth.
	Busy,
	/// The completion ceiling elapsed before the work item finished.
	TimedOut,
	/// A multi-step operation failed and was fully compensated.
	TransactionFailed,
	/// A multi-step operation failed and rollback itself partially failed;
	/// the resource may be in an inconsistent state.
	CompensationIncomplete,
	/// The server is shutting down and no longer accepts work.
	ShuttingDown,
}

impl From<ErrorCode> for i64 {
	fn from(code: ErrorCode) -> Self {
		match code {
			ErrorCode::ParseError => -32700,
			ErrorCode::MethodNotFound => -32601,
			ErrorCode::InvalidParams => -32602,
			ErrorCode::Internal => -32603,
			ErrorCode::Busy => -32001,
			ErrorCode::TimedOut => -32002,
			ErrorCode::TransactionFailed => -32003,
			ErrorCode::CompensationIncomplete => -32004,
			ErrorCode::ShuttingDown => -32005,
		}
	}
}

impl TryFrom<i64> for ErrorCode {
	type Error = String;

	fn try_from(code: i64) -> Result<Self, Self::Error> {
		match code {
			-32700 => Ok(Self::ParseError),
			-32601 => Ok(Self::MethodNotFound),
			-32602 => Ok(Self::InvalidParams),
			-32603 => Ok(Self::Internal),
			-32001 => Ok(Self::Busy),
			-32002 => Ok(Self::TimedOut),
			-32003 => Ok(Self::TransactionFailed),
			-32004 => Ok(Self::CompensationIncomplete),
			-32005 => Ok(Self::ShuttingDown),
			other => Err(format!("unknown error code: {other}")),
		}
	}
}

/// Error payload of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
	/// Stable numeric code.
	pub code: ErrorCode,
	/// Human-readable description.
	pub message: String,
	/// Structured detail (e.g. per-step rollback outcomes).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// One outbound response. Carries either `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Correlation id of the request being answered.
	pub id: RequestId,
	/// Successful result value.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Failure payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<WireError>,
}

impl Response {
	/// Builds a success response.
	#[must_use]
	pub fn ok(id: RequestId, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	/// Builds an error response.
	#[must_use]
	pub fn err(id: RequestId, error: WireError) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}
}
