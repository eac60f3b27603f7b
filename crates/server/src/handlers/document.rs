//! Document-level operations.

use armature_engine::{Applied, Registry};
use serde_json::json;

use crate::model::Document;

pub(super) fn register(registry: &mut Registry<Document>) {
	registry.register("document.get_info", vec![], |ctx, _params| {
		Ok(Applied::value(json!({
			"document_name": ctx.host.name,
			"design_type": "parametric",
			"units": ctx.host.units,
			"sketch_count": ctx.host.sketch_count(),
			"parameter_count": ctx.host.parameter_count(),
		})))
	});
}
