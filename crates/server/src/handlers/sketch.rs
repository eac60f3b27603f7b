//! Sketch lifecycle and geometry operations.
//!
//! Every entity-creating operation reports the tokens it minted and declares
//! `sketch.remove_entities` over exactly those tokens as its inverse, so a
//! rolled-back transaction removes the endpoints along with the curve.

use std::f64::consts::TAU;

use armature_engine::{Applied, ParamKind, ParamSpec, Registry};
use armature_proto::Params;
use serde_json::{Value, json};

use crate::handlers::{construction_flag, f64_arg, opt_str_arg, point_arg, positive_f64_arg, sketch_mut, sketch_ref, str_arg};
use crate::model::{Document, Entity, Point2, Sketch, SketchPlane, document_resource};

/// Two points closer than this are rejected as degenerate geometry.
const MIN_SEPARATION: f64 = 0.001;

fn entity_json(entity: &Entity) -> Value {
	let mut value = serde_json::to_value(&entity.geometry).unwrap_or(Value::Null);
	if let Value::Object(map) = &mut value {
		map.insert("entity_id".into(), json!(entity.id));
		map.insert("construction".into(), json!(entity.construction));
	}
	value
}

fn sketch_summary(sketch: &Sketch) -> Value {
	json!({
		"sketch_id": sketch.id,
		"name": sketch.name,
		"plane": sketch.plane.name(),
		"entity_count": sketch.entities.len(),
		"constraint_count": sketch.constraints.len(),
		"is_finished": sketch.finished,
	})
}

fn remove_entities_undo(sketch_id: &str, entity_ids: &[String]) -> Params {
	params_from(json!({ "sketch_id": sketch_id, "entity_ids": entity_ids }))
}

fn params_from(value: Value) -> Params {
	value.as_object().cloned().unwrap_or_default()
}

pub(super) fn register(registry: &mut Registry<Document>) {
	register_lifecycle(registry);
	register_geometry(registry);
}

fn register_lifecycle(registry: &mut Registry<Document>) {
	registry.register(
		"sketch.create",
		vec![
			ParamSpec::required("plane_reference", ParamKind::String),
			ParamSpec::optional("name", ParamKind::String),
		],
		|ctx, params| {
			let reference = str_arg(params, "plane_reference")?;
			let plane =
				SketchPlane::parse(reference).ok_or_else(|| format!("Invalid plane reference: {reference}"))?;
			let name = opt_str_arg(params, "name").map(str::to_string);

			let id = ctx.host.create_sketch(plane, name);
			let sketch = sketch_ref(ctx.host, &id)?;
			let resource = sketch.resource();
			ctx.revisions.register(&resource);

			Ok(Applied::mutation(
				json!({
					"sketch_id": sketch.id,
					"name": sketch.name,
					"plane_info": { "reference": sketch.plane.name() },
					"is_active": true,
				}),
				resource,
			)
			.with_undo("sketch.delete", params_from(json!({ "sketch_id": id }))))
		},
	);

	registry.register(
		"sketch.activate",
		vec![ParamSpec::required("sketch_id", ParamKind::String)],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let sketch = sketch_ref(ctx.host, id)?;
			// Sketches are edit-ready from the moment they are created, so
			// activation is an existence check that confirms the sketch can
			// take geometry.
			Ok(Applied::value(json!({
				"sketch_id": sketch.id,
				"name": sketch.name,
				"activated": true,
				"is_finished": sketch.finished,
			})))
		},
	);

	registry.register("sketch.list", vec![], |ctx, _params| {
		let sketches: Vec<Value> = ctx.host.sketches().map(sketch_summary).collect();
		Ok(Applied::value(json!({
			"count": sketches.len(),
			"sketches": sketches,
		})))
	});

	registry.register(
		"sketch.get_info",
		vec![ParamSpec::required("sketch_id", ParamKind::String)],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let sketch = sketch_ref(ctx.host, id)?;

			let entities: Vec<Value> = sketch.entities.iter().map(entity_json).collect();
			let constraints: Vec<Value> = sketch
				.constraints
				.iter()
				.map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
				.collect();
			let bounding_box = sketch.bounding_box().map(|(min, max)| {
				json!({
					"min": { "x": min.x, "y": min.y },
					"max": { "x": max.x, "y": max.y },
				})
			});

			Ok(Applied::value(json!({
				"sketch_id": sketch.id,
				"name": sketch.name,
				"plane": sketch.plane.name(),
				"is_fully_constrained": sketch.is_fully_constrained(),
				"entity_count": entities.len(),
				"constraint_count": constraints.len(),
				"entities": entities,
				"constraints": constraints,
				"bounding_box": bounding_box,
			})))
		},
	);

	registry.register(
		"sketch.finish",
		vec![ParamSpec::required("sketch_id", ParamKind::String)],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let sketch = sketch_mut(ctx.host, id)?;
			sketch.finished = true;
			let result = json!({
				"sketch_id": sketch.id,
				"name": sketch.name,
				"is_fully_constrained": sketch.is_fully_constrained(),
			});
			let resource = sketch.resource();
			Ok(Applied::mutation(result, resource))
		},
	);

	registry.register(
		"sketch.delete",
		vec![ParamSpec::required("sketch_id", ParamKind::String)],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let sketch = ctx
				.host
				.delete_sketch(id)
				.ok_or_else(|| format!("Sketch not found: {id}"))?;
			// The sketch's own counter dies with it; the delete is stamped on
			// the document.
			ctx.revisions.forget(&sketch.resource());
			Ok(Applied::mutation(
				json!({ "deleted_sketch": sketch.name, "sketch_id": id }),
				document_resource(),
			))
		},
	);

	registry.register(
		"sketch.remove_entities",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("entity_ids", ParamKind::Array),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let ids: Vec<String> = params
				.get("entity_ids")
				.and_then(Value::as_array)
				.map(|ids| {
					ids.iter()
						.filter_map(Value::as_str)
						.map(str::to_string)
						.collect()
				})
				.unwrap_or_default();

			let sketch = sketch_mut(ctx.host, id)?;
			let removed = sketch.remove_entities(&ids);
			if removed == 0 {
				return Err(format!("No matching entities in sketch: {id}"));
			}
			let resource = sketch.resource();
			Ok(Applied::mutation(json!({ "removed": removed }), resource))
		},
	);
}

fn register_geometry(registry: &mut Registry<Document>) {
	registry.register(
		"sketch.add_line",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("start_point", ParamKind::Object),
			ParamSpec::required("end_point", ParamKind::Object),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let start = point_arg(params, "start_point")?;
			let end = point_arg(params, "end_point")?;
			if start.near(end, MIN_SEPARATION) {
				return Err("Line start and end points are too close together".to_string());
			}
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let tokens = sketch.add_line(start, end, construction);
			let resource = sketch.resource();
			let minted = vec![tokens.line.clone(), tokens.start_point.clone(), tokens.end_point.clone()];

			Ok(Applied::mutation(
				json!({
					"entity_id": tokens.line,
					"start_point_id": tokens.start_point,
					"end_point_id": tokens.end_point,
					"entity_type": "line",
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);

	// Atomic create-plus-line: both mutations land in one work item, so no
	// other client's work can interleave between the sketch and its first
	// curve. Undoing deletes the whole sketch.
	registry.register(
		"sketch.create_with_line",
		vec![
			ParamSpec::optional("plane_reference", ParamKind::String),
			ParamSpec::required("start_point", ParamKind::Object),
			ParamSpec::required("end_point", ParamKind::Object),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let reference = opt_str_arg(params, "plane_reference").unwrap_or("XY");
			let plane =
				SketchPlane::parse(reference).ok_or_else(|| format!("Invalid plane reference: {reference}"))?;
			let start = point_arg(params, "start_point")?;
			let end = point_arg(params, "end_point")?;
			if start.near(end, MIN_SEPARATION) {
				return Err("Line start and end points are too close together".to_string());
			}
			let construction = construction_flag(params);

			let id = ctx.host.create_sketch(plane, None);
			let sketch = sketch_mut(ctx.host, &id)?;
			let tokens = sketch.add_line(start, end, construction);
			let resource = sketch.resource();
			ctx.revisions.register(&resource);

			Ok(Applied::mutation(
				json!({
					"sketch_id": sketch.id,
					"sketch_name": sketch.name,
					"line_id": tokens.line,
					"start_point_id": tokens.start_point,
					"end_point_id": tokens.end_point,
					"entity_type": "line_with_sketch",
				}),
				resource,
			)
			.with_undo("sketch.delete", params_from(json!({ "sketch_id": id }))))
		},
	);

	registry.register(
		"sketch.add_circle",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("center", ParamKind::Object),
			ParamSpec::required("radius", ParamKind::Number),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let center = point_arg(params, "center")?;
			let radius = positive_f64_arg(params, "radius")?;
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let (circle, center_point) = sketch.add_circle(center, radius, construction);
			let resource = sketch.resource();
			let minted = vec![circle.clone(), center_point.clone()];

			Ok(Applied::mutation(
				json!({
					"entity_id": circle,
					"center_point_id": center_point,
					"entity_type": "circle",
					"radius": radius,
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);

	registry.register(
		"sketch.add_rectangle",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("corner1", ParamKind::Object),
			ParamSpec::required("corner2", ParamKind::Object),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let corner1 = point_arg(params, "corner1")?;
			let corner2 = point_arg(params, "corner2")?;
			if corner1.near(corner2, MIN_SEPARATION) {
				return Err("Rectangle corners are too close together".to_string());
			}
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let corners = [
				corner1,
				Point2::new(corner2.x, corner1.y),
				corner2,
				Point2::new(corner1.x, corner2.y),
			];
			let mut line_ids = Vec::with_capacity(4);
			let mut minted = Vec::new();
			for i in 0..4 {
				let tokens = sketch.add_line(corners[i], corners[(i + 1) % 4], construction);
				minted.extend([tokens.start_point, tokens.end_point]);
				minted.push(tokens.line.clone());
				line_ids.push(tokens.line);
			}
			let resource = sketch.resource();

			Ok(Applied::mutation(
				json!({
					"entity_ids": line_ids,
					"entity_type": "rectangle",
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);

	registry.register(
		"sketch.add_arc",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("center", ParamKind::Object),
			ParamSpec::required("radius", ParamKind::Number),
			ParamSpec::required("start_angle", ParamKind::Number),
			ParamSpec::required("end_angle", ParamKind::Number),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let center = point_arg(params, "center")?;
			let radius = positive_f64_arg(params, "radius")?;
			let start_angle = f64_arg(params, "start_angle")?;
			let end_angle = f64_arg(params, "end_angle")?;
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let (arc, center_point, start_point, end_point) =
				sketch.add_arc(center, radius, start_angle, end_angle, construction);
			let resource = sketch.resource();
			let minted = vec![arc.clone(), center_point.clone(), start_point.clone(), end_point.clone()];

			Ok(Applied::mutation(
				json!({
					"entity_id": arc,
					"center_point_id": center_point,
					"start_point_id": start_point,
					"end_point_id": end_point,
					"entity_type": "arc",
					"radius": radius,
					"start_angle": start_angle,
					"end_angle": end_angle,
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);

	registry.register(
		"sketch.add_polygon",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("center", ParamKind::Object),
			ParamSpec::required("sides", ParamKind::Number),
			ParamSpec::required("radius", ParamKind::Number),
			ParamSpec::optional("rotation", ParamKind::Number),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let center = point_arg(params, "center")?;
			let sides = params.get("sides").and_then(Value::as_u64).unwrap_or(0);
			if !(3..=64).contains(&sides) {
				return Err("sides must be an integer between 3 and 64".to_string());
			}
			let radius = positive_f64_arg(params, "radius")?;
			let rotation = params.get("rotation").and_then(Value::as_f64).unwrap_or(0.0);
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let step = TAU / sides as f64;
			let vertices: Vec<Point2> = (0..sides)
				.map(|i| {
					let angle = i as f64 * step + rotation;
					Point2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
				})
				.collect();

			let mut line_ids = Vec::with_capacity(sides as usize);
			let mut minted = Vec::new();
			for i in 0..vertices.len() {
				let tokens = sketch.add_line(vertices[i], vertices[(i + 1) % vertices.len()], construction);
				minted.extend([tokens.start_point, tokens.end_point]);
				minted.push(tokens.line.clone());
				line_ids.push(tokens.line);
			}
			let resource = sketch.resource();

			Ok(Applied::mutation(
				json!({
					"entity_ids": line_ids,
					"entity_type": "polygon",
					"sides": sides,
					"radius": radius,
					"rotation": rotation,
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);

	registry.register(
		"sketch.add_spline",
		vec![
			ParamSpec::required("sketch_id", ParamKind::String),
			ParamSpec::required("points", ParamKind::Array),
			ParamSpec::optional("construction", ParamKind::Bool),
		],
		|ctx, params| {
			let id = str_arg(params, "sketch_id")?;
			let raw = params.get("points").and_then(Value::as_array).cloned().unwrap_or_default();
			if raw.len() < 2 {
				return Err("At least 2 points required for spline".to_string());
			}
			let mut points = Vec::with_capacity(raw.len());
			for (i, value) in raw.iter().enumerate() {
				let Some(point) = value.as_object() else {
					return Err(format!("Invalid point {i}: Point must be an object"));
				};
				let (Some(x), Some(y)) = (
					point.get("x").and_then(Value::as_f64),
					point.get("y").and_then(Value::as_f64),
				) else {
					return Err(format!("Invalid point {i}: Point must have 'x' and 'y' coordinates"));
				};
				points.push(Point2::new(x, y));
			}
			let construction = construction_flag(params);

			let sketch = sketch_mut(ctx.host, id)?;
			let point_count = points.len();
			let spline = sketch.add_spline(points, construction);
			let resource = sketch.resource();
			let minted = vec![spline.clone()];

			Ok(Applied::mutation(
				json!({
					"entity_id": spline,
					"entity_type": "spline",
					"point_count": point_count,
					"construction": construction,
				}),
				resource,
			)
			.with_undo("sketch.remove_entities", remove_entities_undo(id, &minted)))
		},
	);
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::handlers::test_support::Bench;
	use crate::model::SketchPlane;

	fn create_sketch(bench: &mut Bench) -> String {
		let created = bench.call_ok("sketch.create", json!({"plane_reference": "XY"}));
		created.value["sketch_id"].as_str().unwrap().to_string()
	}

	#[test]
	fn create_registers_the_sketch_resource() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		assert!(bench.document.sketch(&id).is_some());
		assert!(
			bench
				.revisions
				.current(&armature_proto::ResourceId::new(&id))
				.is_some()
		);
	}

	#[test]
	fn bad_plane_reference_is_rejected() {
		let mut bench = Bench::new();
		let err = bench.call("sketch.create", json!({"plane_reference": "front"})).unwrap_err();
		assert!(err.contains("Invalid plane reference"));
	}

	#[test]
	fn activate_confirms_an_existing_sketch() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let activated = bench.call_ok("sketch.activate", json!({"sketch_id": id}));
		assert_eq!(activated.value["activated"], json!(true));
		// Read-only: no revision stamp, no undo.
		assert!(activated.mutated.is_none());

		let err = bench.call("sketch.activate", json!({"sketch_id": "sketch-99"})).unwrap_err();
		assert!(err.contains("Sketch not found"));
	}

	#[test]
	fn create_with_line_is_undone_by_deleting_the_sketch() {
		let mut bench = Bench::new();

		let created = bench.call_ok(
			"sketch.create_with_line",
			json!({
				"start_point": {"x": 0.0, "y": 0.0},
				"end_point": {"x": 10.0, "y": 5.0},
			}),
		);
		let id = created.value["sketch_id"].as_str().unwrap().to_string();
		// Line plus its two endpoints, on the default XY plane.
		let sketch = bench.document.sketch(&id).unwrap();
		assert_eq!(sketch.plane, SketchPlane::Xy);
		assert_eq!(sketch.entities.len(), 3);

		bench.undo(&created);
		assert!(bench.document.sketch(&id).is_none());
	}

	#[test]
	fn add_line_undo_removes_line_and_endpoints() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let added = bench.call_ok(
			"sketch.add_line",
			json!({
				"sketch_id": id,
				"start_point": {"x": 0.0, "y": 0.0},
				"end_point": {"x": 10.0, "y": 0.0},
			}),
		);
		assert_eq!(bench.document.sketch(&id).unwrap().entities.len(), 3);

		bench.undo(&added);
		assert!(bench.document.sketch(&id).unwrap().entities.is_empty());
	}

	#[test]
	fn degenerate_line_is_rejected_before_mutation() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let err = bench
			.call(
				"sketch.add_line",
				json!({
					"sketch_id": id,
					"start_point": {"x": 1.0, "y": 1.0},
					"end_point": {"x": 1.0004, "y": 1.0},
				}),
			)
			.unwrap_err();
		assert!(err.contains("too close together"));
		assert!(bench.document.sketch(&id).unwrap().entities.is_empty());
	}

	#[test]
	fn rectangle_creates_four_lines() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let added = bench.call_ok(
			"sketch.add_rectangle",
			json!({
				"sketch_id": id,
				"corner1": {"x": 0.0, "y": 0.0},
				"corner2": {"x": 20.0, "y": 10.0},
			}),
		);
		assert_eq!(added.value["entity_ids"].as_array().unwrap().len(), 4);
		// 4 lines and 8 endpoint entities.
		assert_eq!(bench.document.sketch(&id).unwrap().entities.len(), 12);

		bench.undo(&added);
		assert!(bench.document.sketch(&id).unwrap().entities.is_empty());
	}

	#[test]
	fn polygon_respects_the_side_limits() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let err = bench
			.call(
				"sketch.add_polygon",
				json!({"sketch_id": id, "center": {"x": 0.0, "y": 0.0}, "sides": 2, "radius": 5.0}),
			)
			.unwrap_err();
		assert!(err.contains("between 3 and 64"));

		let hex = bench.call_ok(
			"sketch.add_polygon",
			json!({"sketch_id": id, "center": {"x": 0.0, "y": 0.0}, "sides": 6, "radius": 5.0}),
		);
		assert_eq!(hex.value["entity_ids"].as_array().unwrap().len(), 6);
	}

	#[test]
	fn spline_requires_two_points() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);

		let err = bench
			.call("sketch.add_spline", json!({"sketch_id": id, "points": [{"x": 0.0, "y": 0.0}]}))
			.unwrap_err();
		assert!(err.contains("At least 2 points"));
	}

	#[test]
	fn delete_forgets_the_sketch_revision() {
		let mut bench = Bench::new();
		let id = create_sketch(&mut bench);
		let resource = armature_proto::ResourceId::new(&id);

		bench.call_ok("sketch.delete", json!({"sketch_id": id}));
		assert!(bench.document.sketch(&id).is_none());
		assert!(bench.revisions.current(&resource).is_none());
	}

	#[test]
	fn unknown_sketch_is_a_handler_error() {
		let mut bench = Bench::new();
		let err = bench.call("sketch.get_info", json!({"sketch_id": "sketch-99"})).unwrap_err();
		assert!(err.contains("Sketch not found"));
	}
}
