use serde_json::{Value, json};

use super::{current_model, entry, parse_value};
use crate::context::{CommandFn, CommandResult, Invocation, command};
use crate::shell::ShellError;

pub(super) fn commands() -> Vec<(String, CommandFn)> {
    vec![
        entry("echo", command(echo)),
        entry("pwd", command(pwd)),
        entry("cc", command(change_context)),
        entry("get", command(get)),
        entry("set", command(set)),
        entry("lookup", command(lookup)),
        entry("read", command(read)),
        entry("whoami", command(whoami)),
    ]
}

async fn echo(invocation: Invocation) -> CommandResult {
    invocation
        .sys
        .stdout
        .write(invocation.args.iter().map(|arg| json!(arg)).collect());
    Ok(json!(invocation.args.join(" ")))
}

async fn pwd(invocation: Invocation) -> CommandResult {
    let path = format!("/{}", invocation.context.current().join("/"));
    invocation.sys.stdout.write_text(path.clone());
    Ok(json!(path))
}

/// Target path of `cc`. Absolute paths start at the root; anything else
/// is resolved against `current`, with `..` going one level up.
fn target_path(current: &[String], arg: &str) -> Vec<String> {
    let mut path = if arg.starts_with('/') {
        Vec::new()
    } else {
        current.to_vec()
    };
    for segment in arg.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                path.pop();
            }
            id => path.push(id.to_string()),
        }
    }
    path
}

async fn change_context(invocation: Invocation) -> CommandResult {
    let path = match invocation.arg(0) {
        Some(arg) => target_path(invocation.context.current(), arg),
        None => vec!["me".to_string()],
    };
    invocation.shell.switch_context(&path).await?;
    let current = invocation.shell.current_path();
    Ok(json!(current))
}

async fn get(invocation: Invocation) -> CommandResult {
    let model = current_model(&invocation)?;
    let value = match invocation.arg(0) {
        Some(key) => model.get(key).unwrap_or(Value::Null),
        None => Value::Object(model.properties()),
    };
    invocation.sys.stdout.write(vec![value.clone()]);
    Ok(value)
}

/// `set <key> <value>` writes one property; `set <object>` replaces them
/// all.
async fn set(invocation: Invocation) -> CommandResult {
    let model = current_model(&invocation)?;
    let key = invocation.require(0, "key")?;
    if invocation.args.len() == 1 {
        if let Value::Object(properties) = parse_value(key) {
            invocation
                .shell
                .binder()
                .set_properties(&model, properties.clone())
                .await?;
            return Ok(Value::Object(properties));
        }
    }
    let raw = invocation.require(1, "value")?;
    let value = parse_value(raw);
    invocation
        .shell
        .binder()
        .set_property(&model, key, value.clone())
        .await?;
    Ok(value)
}

async fn lookup(invocation: Invocation) -> CommandResult {
    let prefix = invocation.require(0, "prefix")?;
    let matches = invocation.shell.binder().match_key_async(prefix).await?;
    for model in &matches {
        invocation
            .sys
            .stdout
            .write(vec![json!(model.id()), json!(model.kind().as_str())]);
    }
    Ok(Value::Array(
        matches.iter().map(|model| json!(model.id())).collect(),
    ))
}

/// Takes one entry from stdin. Single-value entries are unwrapped.
async fn read(invocation: Invocation) -> CommandResult {
    let Some(mut entry) = invocation.sys.stdin.read_sync() else {
        return Ok(Value::Null);
    };
    Ok(match entry.len() {
        1 => entry.remove(0),
        _ => Value::Array(entry),
    })
}

async fn whoami(invocation: Invocation) -> CommandResult {
    let user = invocation.shell.user().ok_or(ShellError::AuthRequired)?;
    invocation.sys.stdout.write_text(user.id());
    Ok(json!(user.id()))
}

#[cfg(test)]
mod tests {
    use super::target_path;

    fn ids(path: &[&str]) -> Vec<String> {
        path.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn resolves_cc_targets() {
        let here = ids(&["u1", "g1", "l1"]);
        assert_eq!(target_path(&here, ".."), ids(&["u1", "g1"]));
        assert_eq!(target_path(&here, "../.."), ids(&["u1"]));
        assert_eq!(target_path(&here, "f9"), ids(&["u1", "g1", "l1", "f9"]));
        assert_eq!(target_path(&here, "../l2/"), ids(&["u1", "g1", "l2"]));
        assert_eq!(target_path(&here, "/u2/g2"), ids(&["u2", "g2"]));
        assert_eq!(target_path(&here, "/"), Vec::<String>::new());
        assert_eq!(target_path(&[], "../.."), Vec::<String>::new());
    }
}
