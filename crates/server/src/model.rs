//! In-memory parametric model document.
//!
//! This is the host-side object graph the executor owns exclusively: user
//! parameters keyed by name and sketches keyed by an opaque token. All methods
//! are plain synchronous mutations; concurrency control lives entirely in the
//! engine. Entity and constraint tokens are stable for the lifetime of their
//! sketch and never reused.

use std::collections::BTreeMap;

use armature_proto::ResourceId;
use serde::{Deserialize, Serialize};

/// Resource token under which document-level mutations (parameters, sketch
/// deletion) are revision-stamped.
pub const DOCUMENT_RESOURCE: &str = "document";

/// The document's resource id.
#[must_use]
pub fn document_resource() -> ResourceId {
	ResourceId::new(DOCUMENT_RESOURCE)
}

/// A 2D point in sketch space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
	/// X coordinate.
	pub x: f64,
	/// Y coordinate.
	pub y: f64,
}

impl Point2 {
	/// Creates a point.
	#[must_use]
	pub fn new(x: f64, y: f64) -> Self {
		Self { x, y }
	}

	/// True when both coordinates are within `tol` of the other point's.
	#[must_use]
	pub fn near(self, other: Self, tol: f64) -> bool {
		(self.x - other.x).abs() < tol && (self.y - other.y).abs() < tol
	}
}

/// One of the three standard construction planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SketchPlane {
	/// XY construction plane.
	Xy,
	/// XZ construction plane.
	Xz,
	/// YZ construction plane.
	Yz,
}

impl SketchPlane {
	/// Parses a plane reference, case-insensitively.
	#[must_use]
	pub fn parse(reference: &str) -> Option<Self> {
		match reference.to_ascii_uppercase().as_str() {
			"XY" => Some(Self::Xy),
			"XZ" => Some(Self::Xz),
			"YZ" => Some(Self::Yz),
			_ => None,
		}
	}

	/// Canonical plane name.
	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			Self::Xy => "XY",
			Self::Xz => "XZ",
			Self::Yz => "YZ",
		}
	}
}

/// A named user parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserParameter {
	/// Unique parameter name.
	pub name: String,
	/// Source expression, e.g. `"80 mm"` or the name of another parameter.
	pub expression: String,
	/// Evaluated numeric value.
	pub value: f64,
	/// Unit suffix, possibly empty.
	pub units: String,
	/// Free-form comment.
	pub comment: String,
}

/// Geometry carried by one sketch entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
	/// A standalone or referenced sketch point.
	Point {
		/// Location.
		at: Point2,
	},
	/// A line between two points.
	Line {
		/// Start location.
		start: Point2,
		/// End location.
		end: Point2,
		/// Token of the start point entity.
		start_point: String,
		/// Token of the end point entity.
		end_point: String,
	},
	/// A full circle.
	Circle {
		/// Center location.
		center: Point2,
		/// Radius, positive.
		radius: f64,
		/// Token of the center point entity.
		center_point: String,
	},
	/// A circular arc by center and angles (radians).
	Arc {
		/// Center location.
		center: Point2,
		/// Radius, positive.
		radius: f64,
		/// Start angle in radians.
		start_angle: f64,
		/// End angle in radians.
		end_angle: f64,
		/// Token of the center point entity.
		center_point: String,
		/// Token of the start point entity.
		start_point: String,
		/// Token of the end point entity.
		end_point: String,
	},
	/// A fitted spline through its points.
	Spline {
		/// Fit points, at least two.
		points: Vec<Point2>,
	},
}

impl Geometry {
	/// Short kind name, used in entity tokens and info listings.
	#[must_use]
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Point { .. } => "point",
			Self::Line { .. } => "line",
			Self::Circle { .. } => "circle",
			Self::Arc { .. } => "arc",
			Self::Spline { .. } => "spline",
		}
	}
}

/// One sketch entity with a stable per-sketch token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
	/// Stable token, unique within the sketch.
	pub id: String,
	/// Construction geometry is excluded from profiles.
	pub construction: bool,
	/// The geometry itself.
	pub geometry: Geometry,
}

/// A geometric or dimensional constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
	/// Stable token, unique within the sketch.
	pub id: String,
	/// Constraint kind (`coincident`, `distance`, …).
	pub kind: String,
	/// Entity tokens the constraint applies to.
	pub targets: Vec<String>,
	/// Dimensional value, when the constraint carries one.
	pub value: Option<f64>,
	/// Driving user parameter name, when bound to one.
	pub parameter: Option<String>,
}

/// Tokens produced by creating a line (the line plus its endpoints).
#[derive(Debug, Clone)]
pub struct LineTokens {
	/// Line entity token.
	pub line: String,
	/// Start point token.
	pub start_point: String,
	/// End point token.
	pub end_point: String,
}

/// A sketch: a named set of entities and constraints on one plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sketch {
	/// Opaque sketch token, unique within the document.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Construction plane the sketch lies on.
	pub plane: SketchPlane,
	/// Entities in creation order.
	pub entities: Vec<Entity>,
	/// Constraints in creation order.
	pub constraints: Vec<Constraint>,
	/// Whether editing has been finished.
	pub finished: bool,
	next_entity: u64,
	next_constraint: u64,
}

impl Sketch {
	fn new(id: String, name: String, plane: SketchPlane) -> Self {
		Self {
			id,
			name,
			plane,
			entities: Vec::new(),
			constraints: Vec::new(),
			finished: false,
			next_entity: 0,
			next_constraint: 0,
		}
	}

	fn next_entity_id(&mut self, kind: &str) -> String {
		self.next_entity += 1;
		format!("{kind}-{}", self.next_entity)
	}

	/// Adds a standalone point, returning its token.
	pub fn add_point(&mut self, at: Point2, construction: bool) -> String {
		let id = self.next_entity_id("point");
		self.entities.push(Entity {
			id: id.clone(),
			construction,
			geometry: Geometry::Point { at },
		});
		id
	}

	/// Adds a line plus its two endpoint entities.
	pub fn add_line(&mut self, start: Point2, end: Point2, construction: bool) -> LineTokens {
		let start_point = self.add_point(start, construction);
		let end_point = self.add_point(end, construction);
		let line = self.next_entity_id("line");
		self.entities.push(Entity {
			id: line.clone(),
			construction,
			geometry: Geometry::Line {
				start,
				end,
				start_point: start_point.clone(),
				end_point: end_point.clone(),
			},
		});
		LineTokens {
			line,
			start_point,
			end_point,
		}
	}

	/// Adds a circle plus its center point entity. Returns (circle, center).
	pub fn add_circle(&mut self, center: Point2, radius: f64, construction: bool) -> (String, String) {
		let center_point = self.add_point(center, construction);
		let circle = self.next_entity_id("circle");
		self.entities.push(Entity {
			id: circle.clone(),
			construction,
			geometry: Geometry::Circle {
				center,
				radius,
				center_point: center_point.clone(),
			},
		});
		(circle, center_point)
	}

	/// Adds an arc plus center/start/end point entities.
	/// Returns (arc, center, start, end).
	pub fn add_arc(
		&mut self,
		center: Point2,
		radius: f64,
		start_angle: f64,
		end_angle: f64,
		construction: bool,
	) -> (String, String, String, String) {
		let start = Point2::new(
			center.x + radius * start_angle.cos(),
			center.y + radius * start_angle.sin(),
		);
		let end = Point2::new(center.x + radius * end_angle.cos(), center.y + radius * end_angle.sin());
		let center_point = self.add_point(center, construction);
		let start_point = self.add_point(start, construction);
		let end_point = self.add_point(end, construction);
		let arc = self.next_entity_id("arc");
		self.entities.push(Entity {
			id: arc.clone(),
			construction,
			geometry: Geometry::Arc {
				center,
				radius,
				start_angle,
				end_angle,
				center_point: center_point.clone(),
				start_point: start_point.clone(),
				end_point: end_point.clone(),
			},
		});
		(arc, center_point, start_point, end_point)
	}

	/// Adds a fitted spline through the given points.
	pub fn add_spline(&mut self, points: Vec<Point2>, construction: bool) -> String {
		let id = self.next_entity_id("spline");
		self.entities.push(Entity {
			id: id.clone(),
			construction,
			geometry: Geometry::Spline { points },
		});
		id
	}

	/// Looks an entity up by token.
	#[must_use]
	pub fn entity(&self, id: &str) -> Option<&Entity> {
		self.entities.iter().find(|entity| entity.id == id)
	}

	/// Removes entities by token. Constraints referencing a removed entity are
	/// dropped with it. Returns how many entities were removed.
	pub fn remove_entities(&mut self, ids: &[String]) -> usize {
		let before = self.entities.len();
		self.entities.retain(|entity| !ids.iter().any(|id| *id == entity.id));
		let removed = before - self.entities.len();
		if removed > 0 {
			self.constraints
				.retain(|constraint| !constraint.targets.iter().any(|t| ids.contains(t)));
		}
		removed
	}

	/// Records a constraint and returns its token.
	pub fn add_constraint(&mut self, kind: &str, targets: Vec<String>, value: Option<f64>, parameter: Option<String>) -> String {
		self.next_constraint += 1;
		let id = format!("constraint-{}", self.next_constraint);
		self.constraints.push(Constraint {
			id: id.clone(),
			kind: kind.to_string(),
			targets,
			value,
			parameter,
		});
		id
	}

	/// Removes a constraint by token.
	pub fn remove_constraint(&mut self, id: &str) -> bool {
		let before = self.constraints.len();
		self.constraints.retain(|constraint| constraint.id != id);
		self.constraints.len() < before
	}

	/// True when every entity is referenced by at least one constraint.
	#[must_use]
	pub fn is_fully_constrained(&self) -> bool {
		!self.entities.is_empty()
			&& self
				.entities
				.iter()
				.all(|entity| self.constraints.iter().any(|c| c.targets.contains(&entity.id)))
	}

	/// Axis-aligned bounding box over all entity geometry, if any.
	#[must_use]
	pub fn bounding_box(&self) -> Option<(Point2, Point2)> {
		let mut bounds: Option<(Point2, Point2)> = None;
		let mut extend = |p: Point2| match &mut bounds {
			None => bounds = Some((p, p)),
			Some((min, max)) => {
				min.x = min.x.min(p.x);
				min.y = min.y.min(p.y);
				max.x = max.x.max(p.x);
				max.y = max.y.max(p.y);
			}
		};
		for entity in &self.entities {
			match &entity.geometry {
				Geometry::Point { at } => extend(*at),
				Geometry::Line { start, end, .. } => {
					extend(*start);
					extend(*end);
				}
				Geometry::Circle { center, radius, .. } => {
					extend(Point2::new(center.x - radius, center.y - radius));
					extend(Point2::new(center.x + radius, center.y + radius));
				}
				Geometry::Arc { center, radius, .. } => {
					extend(Point2::new(center.x - radius, center.y - radius));
					extend(Point2::new(center.x + radius, center.y + radius));
				}
				Geometry::Spline { points } => {
					for point in points {
						extend(*point);
					}
				}
			}
		}
		bounds
	}

	/// The sketch's revision resource id.
	#[must_use]
	pub fn resource(&self) -> ResourceId {
		ResourceId::new(&self.id)
	}
}

/// The model document: the host state owned by the executor loop.
#[derive(Debug, Clone)]
pub struct Document {
	/// Document display name.
	pub name: String,
	/// Default length units.
	pub units: String,
	parameters: BTreeMap<String, UserParameter>,
	sketches: BTreeMap<String, Sketch>,
	next_sketch: u64,
}

impl Document {
	/// Creates an empty document with millimeter units.
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			units: "mm".to_string(),
			parameters: BTreeMap::new(),
			sketches: BTreeMap::new(),
			next_sketch: 0,
		}
	}

	/// Creates a sketch on `plane`, returning its token.
	pub fn create_sketch(&mut self, plane: SketchPlane, name: Option<String>) -> String {
		self.next_sketch += 1;
		let id = format!("sketch-{}", self.next_sketch);
		let name = name.unwrap_or_else(|| format!("Sketch{}", self.next_sketch));
		self.sketches.insert(id.clone(), Sketch::new(id.clone(), name, plane));
		id
	}

	/// Looks a sketch up by token.
	#[must_use]
	pub fn sketch(&self, id: &str) -> Option<&Sketch> {
		self.sketches.get(id)
	}

	/// Mutable sketch lookup.
	pub fn sketch_mut(&mut self, id: &str) -> Option<&mut Sketch> {
		self.sketches.get_mut(id)
	}

	/// Removes a sketch, returning it when it existed.
	pub fn delete_sketch(&mut self, id: &str) -> Option<Sketch> {
		self.sketches.remove(id)
	}

	/// All sketches in token order.
	pub fn sketches(&self) -> impl Iterator<Item = &Sketch> {
		self.sketches.values()
	}

	/// Number of sketches.
	#[must_use]
	pub fn sketch_count(&self) -> usize {
		self.sketches.len()
	}

	/// Looks a user parameter up by name.
	#[must_use]
	pub fn parameter(&self, name: &str) -> Option<&UserParameter> {
		self.parameters.get(name)
	}

	/// Inserts or replaces a user parameter, returning the prior value.
	pub fn set_parameter(&mut self, parameter: UserParameter) -> Option<UserParameter> {
		self.parameters.insert(parameter.name.clone(), parameter)
	}

	/// Removes a user parameter by name.
	pub fn delete_parameter(&mut self, name: &str) -> Option<UserParameter> {
		self.parameters.remove(name)
	}

	/// All user parameters in name order.
	pub fn parameters(&self) -> impl Iterator<Item = &UserParameter> {
		self.parameters.values()
	}

	/// Number of user parameters.
	#[must_use]
	pub fn parameter_count(&self) -> usize {
		self.parameters.len()
	}

	/// Evaluates a parameter expression to a numeric value.
	///
	/// An expression is either the name of an existing parameter or a number,
	/// optionally followed by a unit suffix (`"80 mm"`).
	pub fn eval_expression(&self, expression: &str) -> Result<f64, String> {
		let trimmed = expression.trim();
		if let Some(parameter) = self.parameters.get(trimmed) {
			return Ok(parameter.value);
		}
		let mut tokens = trimmed.split_whitespace();
		let value = tokens
			.next()
			.unwrap_or("")
			.parse::<f64>()
			.map_err(|_| format!("could not evaluate expression: {expression}"))?;
		// Anything after the number must be a single unit token, not
		// arithmetic this model cannot solve.
		match tokens.next() {
			None => Ok(value),
			Some(unit) if tokens.next().is_none() && unit.chars().all(|c| c.is_ascii_alphabetic()) => Ok(value),
			Some(_) => Err(format!("could not evaluate expression: {expression}")),
		}
	}
}
