//! Operation catalog registered against the engine.
//!
//! Declared parameter shapes cover top-level JSON types; the helpers here do
//! the semantic digging (nested point objects, positive radii, entity
//! lookups). Handler errors are plain strings surfaced to the client as
//! internal errors, matching the original host protocol's error messages.

use armature_engine::Registry;
use armature_proto::Params;
use serde_json::Value;

use crate::model::{Document, Point2, Sketch};

mod constraint;
mod document;
mod parameter;
mod sketch;

/// Builds the full operation registry for a model document host.
#[must_use]
pub fn registry() -> Registry<Document> {
	let mut registry = Registry::new();
	document::register(&mut registry);
	parameter::register(&mut registry);
	sketch::register(&mut registry);
	constraint::register(&mut registry);
	registry
}

fn str_arg<'p>(params: &'p Params, name: &str) -> Result<&'p str, String> {
	params
		.get(name)
		.and_then(Value::as_str)
		.ok_or_else(|| format!("{name} is required"))
}

fn opt_str_arg<'p>(params: &'p Params, name: &str) -> Option<&'p str> {
	params.get(name).and_then(Value::as_str)
}

fn f64_arg(params: &Params, name: &str) -> Result<f64, String> {
	params
		.get(name)
		.and_then(Value::as_f64)
		.ok_or_else(|| format!("{name} must be a number"))
}

fn construction_flag(params: &Params) -> bool {
	params.get("construction").and_then(Value::as_bool).unwrap_or(false)
}

fn point_arg(params: &Params, name: &str) -> Result<Point2, String> {
	let Some(Value::Object(point)) = params.get(name) else {
		return Err(format!("Invalid {name}: Point must be an object"));
	};
	let x = point
		.get("x")
		.and_then(Value::as_f64)
		.ok_or_else(|| format!("Invalid {name}: Point must have 'x' and 'y' coordinates"))?;
	let y = point
		.get("y")
		.and_then(Value::as_f64)
		.ok_or_else(|| format!("Invalid {name}: Point must have 'x' and 'y' coordinates"))?;
	Ok(Point2::new(x, y))
}

fn positive_f64_arg(params: &Params, name: &str) -> Result<f64, String> {
	let value = f64_arg(params, name)?;
	if value <= 0.0 {
		return Err(format!("{name} must be a positive number"));
	}
	Ok(value)
}

fn sketch_ref<'d>(document: &'d Document, id: &str) -> Result<&'d Sketch, String> {
	document.sketch(id).ok_or_else(|| format!("Sketch not found: {id}"))
}

fn sketch_mut<'d>(document: &'d mut Document, id: &str) -> Result<&'d mut Sketch, String> {
	document.sketch_mut(id).ok_or_else(|| format!("Sketch not found: {id}"))
}


#[cfg(test)]
mod tests {
	use super::test_support::Bench;

	#[test]
	fn catalog_covers_every_namespace() {
		let bench = Bench::new();
		let methods = bench.registry.methods();

		for expected in [
			"document.get_info",
			"parameter.list",
			"parameter.get",
			"parameter.set",
			"parameter.delete",
			"sketch.create",
			"sketch.create_with_line",
			"sketch.activate",
			"sketch.list",
			"sketch.get_info",
			"sketch.finish",
			"sketch.delete",
			"sketch.add_line",
			"sketch.add_circle",
			"sketch.add_rectangle",
			"sketch.add_arc",
			"sketch.add_polygon",
			"sketch.add_spline",
			"sketch.remove_entities",
			"constraint.add_coincident",
			"constraint.add_distance",
			"constraint.add_parallel",
			"constraint.add_perpendicular",
			"constraint.add_radius",
			"constraint.add_angle",
			"constraint.remove",
		] {
			assert!(methods.contains(&expected), "missing method {expected}");
		}
	}
}
