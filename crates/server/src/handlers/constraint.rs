//! Geometric and dimensional constraint operations.
//!
//! Constraints target entity tokens minted by the geometry handlers.
//! Each `add_*` declares `constraint.remove` over its own token as the
//! inverse. Dimensional constraints may be driven by a user parameter; the
//! parameter must exist at the time the constraint is added.

use armature_engine::{Applied, ParamKind, ParamSpec, Registry};
use armature_proto::Params;
use serde_json::{Value, json};

use crate::handlers::{f64_arg, opt_str_arg, positive_f64_arg, sketch_mut, str_arg};
use crate::model::{Document, Geometry, Sketch};

fn params_from(value: Value) -> Params {
	value.as_object().cloned().unwrap_or_default()
}

fn remove_undo(sketch_id: &str, constraint_id: &str) -> Params {
	params_from(json!({ "sketch_id": sketch_id, "constraint_id": constraint_id }))
}

fn require_point(sketch: &Sketch, id: &str) -> Result<(), String> {
	match sketch.entity(id) {
		Some(entity) if matches!(entity.geometry, Geometry::Point { .. }) => Ok(()),
		_ => Err(format!("Point not found: {id}")),
	}
}

fn require_line(sketch: &Sketch, id: &str) -> Result<(), String> {
	match sketch.entity(id) {
		Some(entity) if matches!(entity.geometry, Geometry::Line { .. }) => Ok(()),
		_ => Err(format!("Line not found: {id}")),
	}
}

fn require_entity(sketch: &Sketch, id: &str) -> Result<(), String> {
	sketch
		.entity(id)
		.map(|_| ())
		.ok_or_else(|| format!("Entity not found: {id}"))
}

fn require_circular(sketch: &Sketch, id: &str) -> Result<(), String> {
	match sketch.entity(id) {
		Some(entity) if matches!(entity.geometry, Geometry::Circle { .. } | Geometry::Arc { .. }) => Ok(()),
		_ => Err(format!("Circular entity not found: {id}")),
	}
}

fn driving_parameter(document: &Document, params: &Params) -> Result<Option<String>, String> {
	match opt_str_arg(params, "parameter_name") {
		None => Ok(None),
		Some(name) => {
			document
				.parameter(name)
				.ok_or_else(|| format!("Parameter not found: {name}"))?;
			Ok(Some(name.to_string()))
		}
	}
}

pub(super) fn register(registry: &mut Registry<Document>) {
	registry.register(
		"constraint.add_coincident",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("point1_id", ParamKind::String),
			ParamSpec::required("point2_id", ParamKind::String),
		],
		|ctx, params| {
			let sketch_id = str_arg(params, "sketch_id")?;
			let point1 = str_arg(params, "point1_id")?;
			let point2 = str_arg(params, "point2_id")?;

			let sketch = sketch_mut(ctx.host, sketch_id)?;
			require_point(sketch, point1)?;
			require_point(sketch, point2)?;

			let id = sketch.add_constraint("coincident", vec![point1.to_string(), point2.to_string()], None, None);
			let resource = sketch.resource();
			Ok(Applied::mutation(
				json!({
					"constraint_id": id,
					"constraint_type": "coincident",
					"point1_id": point1,
					"point2_id": point2,
				}),
				resource,
			)
			.with_undo("constraint.remove", remove_undo(sketch_id, &id)))
		},
	);

	registry.register(
		"constraint.add_distance",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("entity1_id", ParamKind::String),
			ParamSpec::required("entity2_id", ParamKind::String),
			ParamSpec::required("distance", ParamKind::Number),
			ParamSpec::optional("parameter_name", ParamKind::String),
		],
		|ctx, params| {
			let sketch_id = str_arg(params, "sketch_id")?;
			let entity1 = str_arg(params, "entity1_id")?;
			let entity2 = str_arg(params, "entity2_id")?;
			let distance = f64_arg(params, "distance")?;
			if distance < 0.0 {
				return Err("distance must be a non-negative number".to_string());
			}
			let parameter = driving_parameter(ctx.host, params)?;

			let sketch = sketch_mut(ctx.host, sketch_id)?;
			require_entity(sketch, entity1)?;
			require_entity(sketch, entity2)?;

			let id = sketch.add_constraint(
				"distance",
				vec![entity1.to_string(), entity2.to_string()],
				Some(distance),
				parameter.clone(),
			);
			let resource = sketch.resource();
			Ok(Applied::mutation(
				json!({
					"constraint_id": id,
					"constraint_type": "distance",
					"entity1_id": entity1,
					"entity2_id": entity2,
					"distance": distance,
					"parameter": parameter,
				}),
				resource,
			)
			.with_undo("constraint.remove", remove_undo(sketch_id, &id)))
		},
	);

	registry.register(
		"constraint.add_parallel",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("line1_id", ParamKind::String),
			ParamSpec::required("line2_id", ParamKind::String),
		],
		|ctx, params| add_line_pair(ctx.host, params, "parallel"),
	);

	registry.register(
		"constraint.add_perpendicular",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("line1_id", ParamKind::String),
			ParamSpec::required("line2_id", ParamKind::String),
		],
		|ctx, params| add_line_pair(ctx.host, params, "perpendicular"),
	);

	registry.register(
		"constraint.add_radius",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("entity_id", ParamKind::String),
			ParamSpec::required("radius", ParamKind::Number),
			ParamSpec::optional("parameter_name", ParamKind::String),
		],
		|ctx, params| {
			let sketch_id = str_arg(params, "sketch_id")?;
			let entity = str_arg(params, "entity_id")?;
			let radius = positive_f64_arg(params, "radius")?;
			let parameter = driving_parameter(ctx.host, params)?;

			let sketch = sketch_mut(ctx.host, sketch_id)?;
			require_circular(sketch, entity)?;

			let id = sketch.add_constraint("radius", vec![entity.to_string()], Some(radius), parameter.clone());
			let resource = sketch.resource();
			Ok(Applied::mutation(
				json!({
					"constraint_id": id,
					"constraint_type": "radius",
					"entity_id": entity,
					"radius": radius,
					"parameter": parameter,
				}),
				resource,
			)
			.with_undo("constraint.remove", remove_undo(sketch_id, &id)))
		},
	);

	registry.register(
		"constraint.add_angle",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("line1_id", ParamKind::String),
			ParamSpec::required("line2_id", ParamKind::String),
			ParamSpec::required("angle", ParamKind::Number),
			ParamSpec::optional("parameter_name", ParamKind::String),
		],
		|ctx, params| {
			let sketch_id = str_arg(params, "sketch_id")?;
			let line1 = str_arg(params, "line1_id")?;
			let line2 = str_arg(params, "line2_id")?;
			let angle = f64_arg(params, "angle")?;
			let parameter = driving_parameter(ctx.host, params)?;

			let sketch = sketch_mut(ctx.host, sketch_id)?;
			require_line(sketch, line1)?;
			require_line(sketch, line2)?;

			let id = sketch.add_constraint(
				"angle",
				vec![line1.to_string(), line2.to_string()],
				Some(angle),
				parameter.clone(),
			);
			let resource = sketch.resource();
			Ok(Applied::mutation(
				json!({
					"constraint_id": id,
					"constraint_type": "angle",
					"line1_id": line1,
					"line2_id": line2,
					"angle": angle,
					"parameter": parameter,
				}),
				resource,
			)
			.with_undo("constraint.remove", remove_undo(sketch_id, &id)))
		},
	);

	registry.register(
		"constraint.remove",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("constraint_id", ParamKind::String),
		],
		|ctx, params| {
			let sketch_id = str_arg(params, "sketch_id")?;
			let constraint_id = str_arg(params, "constraint_id")?;

			let sketch = sketch_mut(ctx.host, sketch_id)?;
			if !sketch.remove_constraint(constraint_id) {
				return Err(format!("Constraint not found: {constraint_id}"));
			}
			let resource = sketch.resource();
			Ok(Applied::mutation(json!({ "removed_constraint": constraint_id }), resource))
		},
	);
}

fn add_line_pair(
	document: &mut Document,
	params: &Params,
	kind: &'static str,
) -> Result<Applied, String> {
	let sketch_id = str_arg(params, "sketch_id")?;
	let line1 = str_arg(params, "line1_id")?;
	let line2 = str_arg(params, "line2_id")?;

	let sketch = sketch_mut(document, sketch_id)?;
	require_line(sketch, line1)?;
	require_line(sketch, line2)?;

	let id = sketch.add_constraint(kind, vec![line1.to_string(), line2.to_string()], None, None);
	let resource = sketch.resource();
	Ok(Applied::mutation(
		json!({
			"constraint_id": id,
			"constraint_type": kind,
			"line1_id": line1,
			"line2_id": line2,
		}),
		resource,
	)
	.with_undo("constraint.remove", remove_undo(sketch_id, &id)))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::handlers::test_support::Bench;

	struct Fixture {
		sketch_id: String,
		line1: String,
		line2: String,
		circle: String,
		point1: String,
		point2: String,
	}

	fn build(bench: &mut Bench) -> Fixture {
		let created = bench.call_ok("sketch.create", json!({"plane_reference": "XY"}));
		let sketch_id = created.value["sketch_id"].as_str().unwrap().to_string();

		let a = bench.call_ok(
			"sketch.add_line",
			json!({"sketch_id": sketch_id, "start_point": {"x": 0.0, "y": 0.0}, "end_point": {"x": 10.0, "y": 0.0}}),
		);
		let b = bench.call_ok(
			"sketch.add_line",
			json!({"sketch_id": sketch_id, "start_point": {"x": 0.0, "y": 5.0}, "end_point": {"x": 10.0, "y": 5.0}}),
		);
		let c = bench.call_ok(
			"sketch.add_circle",
			json!({"sketch_id": sketch_id, "center": {"x": 5.0, "y": 5.0}, "radius": 2.0}),
		);

		Fixture {
			sketch_id,
			line1: a.value["entity_id"].as_str().unwrap().to_string(),
			line2: b.value["entity_id"].as_str().unwrap().to_string(),
			circle: c.value["entity_id"].as_str().unwrap().to_string(),
			point1: a.value["end_point_id"].as_str().unwrap().to_string(),
			point2: b.value["start_point_id"].as_str().unwrap().to_string(),
		}
	}

	#[test]
	fn coincident_requires_point_entities() {
		let mut bench = Bench::new();
		let fx = build(&mut bench);

		let added = bench.call_ok(
			"constraint.add_coincident",
			json!({"sketch_id": fx.sketch_id, "point1_id": fx.point1, "point2_id": fx.point2}),
		);
		assert_eq!(added.value["constraint_type"], "coincident");

		let err = bench
			.call(
				"constraint.add_coincident",
				json!({"sketch_id": fx.sketch_id, "point1_id": fx.line1, "point2_id": fx.point2}),
			)
			.unwrap_err();
		assert!(err.contains("Point not found"));
	}

	#[test]
	fn parallel_requires_two_lines() {
		let mut bench = Bench::new();
		let fx = build(&mut bench);

		bench.call_ok(
			"constraint.add_parallel",
			json!({"sketch_id": fx.sketch_id, "line1_id": fx.line1, "line2_id": fx.line2}),
		);

		let err = bench
			.call(
				"constraint.add_perpendicular",
				json!({"sketch_id": fx.sketch_id, "line1_id": fx.line1, "line2_id": fx.circle}),
			)
			.unwrap_err();
		assert!(err.contains("Line not found"));
	}

	#[test]
	fn radius_only_applies_to_circular_entities() {
		let mut bench = Bench::new();
		let fx = build(&mut bench);

		let added = bench.call_ok(
			"constraint.add_radius",
			json!({"sketch_id": fx.sketch_id, "entity_id": fx.circle, "radius": 2.5}),
		);
		assert_eq!(added.value["radius"], 2.5);

		let err = bench
			.call(
				"constraint.add_radius",
				json!({"sketch_id": fx.sketch_id, "entity_id": fx.line1, "radius": 2.5}),
			)
			.unwrap_err();
		assert!(err.contains("Circular entity not found"));
	}

	#[test]
	fn distance_may_be_driven_by_a_parameter() {
		let mut bench = Bench::new();
		let fx = build(&mut bench);
		bench.call_ok("parameter.set", json!({"name": "gap", "value": 5.0, "units": "mm"}));

		let added = bench.call_ok(
			"constraint.add_distance",
			json!({
				"sketch_id": fx.sketch_id,
				"entity1_id": fx.line1,
				"entity2_id": fx.line2,
				"distance": 5.0,
				"parameter_name": "gap",
			}),
		);
		assert_eq!(added.value["parameter"], "gap");

		let err = bench
			.call(
				"constraint.add_distance",
				json!({
					"sketch_id": fx.sketch_id,
					"entity1_id": fx.line1,
					"entity2_id": fx.line2,
					"distance": 5.0,
					"parameter_name": "ghost",
				}),
			)
			.unwrap_err();
		assert!(err.contains("Parameter not found"));
	}

	#[test]
	fn undo_removes_the_constraint() {
		let mut bench = Bench::new();
		let fx = build(&mut bench);

		let added = bench.call_ok(
			"constraint.add_angle",
			json!({"sketch_id": fx.sketch_id, "line1_id": fx.line1, "line2_id": fx.line2, "angle": 0.0}),
		);
		assert_eq!(bench.document.sketch(&fx.sketch_id).unwrap().constraints.len(), 1);

		bench.undo(&added);
		assert!(bench.document.sketch(&fx.sketch_id).unwrap().constraints.is_empty());
	}
}
