//! Operation registry: method name → handler + declared parameter shape.
//!
//! Pure lookup table. Shape validation runs in the caller's context, before
//! anything is submitted to the executor, so malformed requests never consume
//! executor time.

use std::collections::HashMap;
use std::sync::Arc;

use armature_proto::Params;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::executor::{Applied, ExecCtx};

/// JSON type a declared parameter must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
	/// JSON string.
	String,
	/// Any JSON number.
	Number,
	/// JSON boolean.
	Bool,
	/// JSON object.
	Object,
	/// JSON array.
	Array,
	/// Any JSON value, including null.
	Any,
}

impl ParamKind {
	/// Human-readable type name for error messages.
	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			Self::String => "string",
			Self::Number => "number",
			Self::Bool => "boolean",
			Self::Object => "object",
			Self::Array => "array",
			Self::Any => "any",
		}
	}

	fn matches(self, value: &Value) -> bool {
		match self {
			Self::String => value.is_string(),
			Self::Number => value.is_number(),
			Self::Bool => value.is_boolean(),
			Self::Object => value.is_object(),
			Self::Array => value.is_array(),
			Self::Any => true,
		}
	}
}

/// One declared parameter of an operation.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
	/// Field name inside the request's `params` object.
	pub name: &'static str,
	/// Required JSON type.
	pub kind: ParamKind,
	/// Whether the field must be present.
	pub required: bool,
}

impl ParamSpec {
	/// A required parameter.
	#[must_use]
	pub const fn required(name: &'static str, kind: ParamKind) -> Self {
		Self {
			name,
			kind,
			required: true,
		}
	}

	/// An optional parameter (type-checked when present).
	#[must_use]
	pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
		Self {
			name,
			kind,
			required: false,
		}
	}
}

/// Handler function executed inside the executor's context.
pub type HandlerFn<H> = Arc<dyn Fn(&mut ExecCtx<'_, H>, &Params) -> std::result::Result<Applied, String> + Send + Sync>;

/// A registered operation: declared shape plus handler.
pub struct OperationDef<H> {
	name: String,
	params: Vec<ParamSpec>,
	handler: HandlerFn<H>,
}

impl<H> OperationDef<H> {
	/// Registered method name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Validates a parameter map against the declared shape.
	///
	/// Undeclared extra fields are ignored, matching the host protocol's
	/// existing clients.
	pub fn validate(&self, params: &Params) -> Result<()> {
		for spec in &self.params {
			match params.get(spec.name) {
				None => {
					if spec.required {
						return Err(EngineError::MissingField {
							field: spec.name.to_string(),
						});
					}
				}
				Some(value) => {
					if !spec.kind.matches(value) {
						return Err(EngineError::TypeMismatch {
							field: spec.name.to_string(),
							expected: spec.kind.name(),
						});
					}
				}
			}
		}
		Ok(())
	}

	/// Clones the handler for submission.
	#[must_use]
	pub fn handler(&self) -> HandlerFn<H> {
		Arc::clone(&self.handler)
	}
}

/// Static mapping of method names to operations.
pub struct Registry<H> {
	ops: HashMap<String, OperationDef<H>>,
}

impl<H> Default for Registry<H> {
	fn default() -> Self {
		Self::new()
	}
}

impl<H> Registry<H> {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self { ops: HashMap::new() }
	}

	/// Registers an operation. Re-registering a name replaces the handler.
	pub fn register<F>(&mut self, name: &str, params: Vec<ParamSpec>, handler: F)
	where
		F: Fn(&mut ExecCtx<'_, H>, &Params) -> std::result::Result<Applied, String> + Send + Sync + 'static,
	{
		self.ops.insert(
			name.to_string(),
			OperationDef {
				name: name.to_string(),
				params,
				handler: Arc::new(handler),
			},
		);
	}

	/// Looks up a method by name.
	pub fn lookup(&self, method: &str) -> Result<&OperationDef<H>> {
		self.ops
			.get(method)
			.ok_or_else(|| EngineError::MethodNotFound(method.to_string()))
	}

	/// All registered method names, sorted.
	#[must_use]
	pub fn methods(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	/// Number of registered operations.
	#[must_use]
	pub fn len(&self) -> usize {
		self.ops.len()
	}

	/// Returns true when nothing is registered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}
}
