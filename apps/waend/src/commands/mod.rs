//! Built-in commands, one table per depth.

mod base;
mod feature;
mod group;
mod layer;
mod user;

use serde_json::{Value, json};

use crate::context::{CommandFn, Depth, Invocation};
use crate::model::ModelHandle;
use crate::shell::{Shell, ShellError};

pub fn install(shell: &Shell) {
    shell.set_commands(Depth::Shell, base::commands());
    shell.set_commands(Depth::User, user::commands());
    shell.set_commands(Depth::Group, group::commands());
    shell.set_commands(Depth::Layer, layer::commands());
    shell.set_commands(Depth::Feature, feature::commands());
}

fn entry(name: &str, handler: CommandFn) -> (String, CommandFn) {
    (name.to_string(), handler)
}

/// Model of the active context.
fn current_model(invocation: &Invocation) -> Result<ModelHandle, ShellError> {
    invocation
        .context
        .data()
        .cloned()
        .ok_or_else(|| ShellError::InvalidContext("no model at the shell root".into()))
}

/// Ids the active context must have down to `depth`.
fn require_path(invocation: &Invocation, depth: Depth) -> Result<Vec<String>, ShellError> {
    let current = invocation.context.current();
    if current.len() < depth.index() {
        return Err(ShellError::InvalidContext(format!("requires a {depth} context")));
    }
    Ok(current[..depth.index()].to_vec())
}

fn display_name(model: &ModelHandle) -> String {
    model
        .get("name")
        .and_then(|name| name.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Writes one `[id, name]` line per model and returns their ids.
fn list(invocation: &Invocation, models: &[ModelHandle]) -> Value {
    for model in models {
        invocation
            .sys
            .stdout
            .write(vec![json!(model.id()), json!(display_name(model))]);
    }
    Value::Array(models.iter().map(|model| json!(model.id())).collect())
}

/// JSON when it parses, a plain string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn named_properties(invocation: &Invocation) -> Result<Value, ShellError> {
    let name = invocation.require(0, "name")?;
    let mut properties = json!({"name": name});
    if let Some(description) = invocation.arg(1) {
        properties["description"] = json!(description);
    }
    Ok(json!({"properties": properties}))
}
