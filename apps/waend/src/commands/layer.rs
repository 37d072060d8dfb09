use serde_json::{Map, Value, json};
use tracing::debug;

use super::{entry, list, parse_value, require_path};
use crate::context::{CommandFn, CommandResult, Depth, Invocation, command};
use crate::model::Geometry;
use crate::shell::ShellError;

pub(super) fn commands() -> Vec<(String, CommandFn)> {
    vec![
        entry("lf", command(list_features)),
        entry("create", command(create_feature)),
        entry("import", command(import)),
    ]
}

async fn list_features(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Layer)?;
    let features = invocation.shell.binder().get_features(&path[2]);
    Ok(list(&invocation, &features))
}

fn geometry(value: Value) -> Result<Geometry, ShellError> {
    Geometry::from_value(value).map_err(|err| ShellError::InvalidArgument(err.to_string()))
}

fn feature_body(properties: Map<String, Value>, geometry: &Geometry) -> Value {
    json!({"properties": properties, "geom": geometry.to_geojson()})
}

/// `create geojson`
async fn create_feature(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Layer)?;
    let geometry = geometry(parse_value(invocation.require(0, "geometry")?))?;
    let feature = invocation
        .shell
        .binder()
        .set_feature(
            &path[0],
            &path[1],
            &path[2],
            feature_body(Map::new(), &geometry),
            false,
        )
        .await?;
    invocation.sys.stdout.write_text(feature.id());
    Ok(json!(feature.id()))
}

/// Flattens one input value into `(properties, geometry)` pairs. Strings
/// are parsed as JSON; feature collections yield each of their features.
fn collect_items(
    value: Value,
    items: &mut Vec<(Map<String, Value>, Geometry)>,
) -> Result<(), ShellError> {
    match value {
        Value::String(text) => {
            let parsed = serde_json::from_str(&text)
                .map_err(|err| ShellError::InvalidArgument(format!("not GeoJSON: {err}")))?;
            collect_items(parsed, items)
        }
        Value::Array(values) => values
            .into_iter()
            .try_for_each(|value| collect_items(value, items)),
        Value::Object(mut object) => match object.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => match object.remove("features") {
                Some(features) => collect_items(features, items),
                None => Ok(()),
            },
            Some("Feature") => {
                let properties = match object.remove("properties") {
                    Some(Value::Object(properties)) => properties,
                    _ => Map::new(),
                };
                let geometry = geometry(object.remove("geometry").unwrap_or(Value::Null))?;
                items.push((properties, geometry));
                Ok(())
            }
            _ => {
                items.push((Map::new(), geometry(Value::Object(object))?));
                Ok(())
            }
        },
        Value::Null => Ok(()),
        other => Err(ShellError::InvalidArgument(format!("cannot import {other}"))),
    }
}

/// Creates one feature per geometry found on stdin and in the delivered
/// value, then signals the layer once.
async fn import(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Layer)?;
    let mut items = Vec::new();
    if let Some(delivered) = invocation.delivered.clone() {
        collect_items(delivered, &mut items)?;
    }
    while let Some(entry) = invocation.sys.stdin.read_sync() {
        collect_items(Value::Array(entry), &mut items)?;
    }
    debug!(target: "waend::commands", layer = %path[2], count = items.len(), "import");

    let binder = invocation.shell.binder();
    let mut ids = Vec::with_capacity(items.len());
    for (properties, geometry) in items {
        let feature = binder
            .set_feature(
                &path[0],
                &path[1],
                &path[2],
                feature_body(properties, &geometry),
                true,
            )
            .await?;
        ids.push(json!(feature.id()));
    }
    binder.change_parent(&path[2]);
    Ok(Value::Array(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_features_from_mixed_input() {
        let mut items = Vec::new();
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"n": 1},
                    "geometry": {"type": "Point", "coordinates": [0, 0]}
                },
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 1]}}
            ]
        });
        collect_items(json!([collection.to_string(), null]), &mut items).unwrap();
        let line = json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]});
        collect_items(line, &mut items).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].0.get("n"), Some(&json!(1)));
        assert!(items[1].0.is_empty());
        assert_eq!(items[2].1.geometry_type(), "LineString");
    }

    #[test]
    fn rejects_non_geometry() {
        let mut items = Vec::new();
        assert!(collect_items(json!(42), &mut items).is_err());
        assert!(collect_items(json!("{not json"), &mut items).is_err());
        assert!(collect_items(json!({"type": "Point"}), &mut items).is_err());
    }
}
