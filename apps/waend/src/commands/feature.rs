use serde_json::{Value, json};

use super::{current_model, entry, parse_value, require_path};
use crate::context::{CommandFn, CommandResult, Depth, Invocation, command};
use crate::model::Geometry;
use crate::shell::ShellError;

pub(super) fn commands() -> Vec<(String, CommandFn)> {
    vec![
        entry("gg", command(get_geometry)),
        entry("sg", command(set_geometry)),
        entry("rm", command(remove)),
    ]
}

async fn get_geometry(invocation: Invocation) -> CommandResult {
    let feature = current_model(&invocation)?;
    let geometry = feature
        .geometry()
        .ok_or_else(|| ShellError::InvalidContext(format!("{} has no geometry", feature.id())))?;
    let geojson = geometry.to_geojson();
    invocation.sys.stdout.write(vec![geojson.clone()]);
    Ok(geojson)
}

/// `sg [geojson]`; without an argument the delivered value is used.
async fn set_geometry(invocation: Invocation) -> CommandResult {
    let feature = current_model(&invocation)?;
    let value = match (invocation.arg(0), &invocation.delivered) {
        (Some(raw), _) => parse_value(raw),
        (None, Some(Value::String(raw))) => parse_value(raw),
        (None, Some(delivered)) => delivered.clone(),
        (None, None) => return Err(ShellError::InvalidArgument("missing geometry".into())),
    };
    let geometry =
        Geometry::from_value(value).map_err(|err| ShellError::InvalidArgument(err.to_string()))?;
    invocation
        .shell
        .binder()
        .set_geometry(&feature, &geometry)
        .await?;
    Ok(geometry.to_geojson())
}

/// Deletes the current feature and moves up to its layer.
async fn remove(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Feature)?;
    invocation
        .shell
        .binder()
        .del_feature(&path[0], &path[1], &path[2], &path[3])
        .await?;
    invocation.shell.switch_context(&path[..3]).await?;
    Ok(json!(path[3]))
}
