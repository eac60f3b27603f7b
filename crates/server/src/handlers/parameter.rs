//! User parameter operations.
//!
//! `parameter.set` is create-or-update. Its inverse restores the prior
//! expression when one existed and deletes the parameter when the set created
//! it; `parameter.delete` itself is deliberately irreversible.

use armature_engine::{Applied, ParamKind, ParamSpec, Registry};
use armature_proto::Params;
use serde_json::{Value, json};

use crate::handlers::{opt_str_arg, str_arg};
use crate::model::{Document, UserParameter, document_resource};

fn parameter_json(parameter: &UserParameter) -> Value {
	json!({
		"name": parameter.name,
		"expression": parameter.expression,
		"value": parameter.value,
		"units": parameter.units,
		"comment": parameter.comment,
	})
}

pub(super) fn register(registry: &mut Registry<Document>) {
	registry.register("parameter.list", vec![], |ctx, _params| {
		let parameters: Vec<Value> = ctx.host.parameters().map(parameter_json).collect();
		Ok(Applied::value(json!({
			"count": parameters.len(),
			"parameters": parameters,
		})))
	});

	registry.register(
		"parameter.get",
		vec![ParamSpec::required("name", ParamKind::String)],
		|ctx, params| {
			let name = str_arg(params, "name")?;
			let parameter = ctx
				.host
				.parameter(name)
				.ok_or_else(|| format!("Parameter not found: {name}"))?;
			Ok(Applied::value(json!({ "parameter": parameter_json(parameter) })))
		},
	);

	registry.register(
		"parameter.set",
		vec![
			ParamSpec::required("name", ParamKind::String),
			ParamSpec::optional("value", ParamKind::Number),
			ParamSpec::optional("expression", ParamKind::String),
			ParamSpec::optional("units", ParamKind::String),
			ParamSpec::optional("comment", ParamKind::String),
		],
		|ctx, params| {
			let name = str_arg(params, "name")?.to_string();
			let units = opt_str_arg(params, "units").unwrap_or("").to_string();
			let comment = opt_str_arg(params, "comment").unwrap_or("").to_string();

			let expression = match (opt_str_arg(params, "expression"), params.get("value").and_then(Value::as_f64)) {
				(Some(expression), _) => expression.to_string(),
				(None, Some(value)) if units.is_empty() => format!("{value}"),
				(None, Some(value)) => format!("{value} {units}"),
				(None, None) => return Err("Parameter name and value are required".to_string()),
			};
			let value = ctx.host.eval_expression(&expression)?;

			let parameter = UserParameter {
				name: name.clone(),
				expression,
				value,
				units,
				comment,
			};
			let result_json = parameter_json(&parameter);
			let prior = ctx.host.set_parameter(parameter);
			let created = prior.is_none();

			let result = json!({
				"parameter": result_json,
				"created": created,
			});

			let applied = Applied::mutation(result, document_resource());
			Ok(match prior {
				Some(prior) => applied.with_undo(
					"parameter.set",
					params_from(json!({
						"name": prior.name,
						"expression": prior.expression,
						"units": prior.units,
						"comment": prior.comment,
					})),
				),
				None => applied.with_undo("parameter.delete", params_from(json!({ "name": name }))),
			})
		},
	);

	registry.register(
		"parameter.delete",
		vec![ParamSpec::required("name", ParamKind::String)],
		|ctx, params| {
			let name = str_arg(params, "name")?;
			ctx.host
				.delete_parameter(name)
				.ok_or_else(|| format!("Parameter not found: {name}"))?;
			Ok(Applied::mutation(
				json!({ "deleted_parameter": name }),
				document_resource(),
			))
		},
	);
}

fn params_from(value: Value) -> Params {
	value.as_object().cloned().unwrap_or_default()
}
