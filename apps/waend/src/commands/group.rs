use serde_json::{Value, json};

use super::{entry, list, named_properties, require_path};
use crate::context::{CommandFn, CommandResult, Depth, Invocation, command};

pub(super) fn commands() -> Vec<(String, CommandFn)> {
    vec![
        entry("ll", command(list_layers)),
        entry("mklayer", command(create_layer)),
        entry("visible", command(visible_layers)),
        entry("attach", command(attach)),
        entry("detach", command(detach)),
    ]
}

async fn list_layers(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Group)?;
    let layers = invocation.shell.binder().get_layers(&path[1]);
    Ok(list(&invocation, &layers))
}

/// `mklayer name [description]`
async fn create_layer(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Group)?;
    let data = named_properties(&invocation)?;
    let layer = invocation
        .shell
        .binder()
        .set_layer(&path[0], &path[1], data)
        .await?;
    invocation.sys.stdout.write_text(layer.id());
    Ok(json!(layer.id()))
}

async fn visible_layers(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Group)?;
    let binder = invocation.shell.binder();
    let mut visible = Vec::new();
    for layer in binder.get_layers(&path[1]) {
        if binder.is_layer_visible(&layer).await {
            visible.push(layer);
        }
    }
    Ok(list(&invocation, &visible))
}

/// `attach layer_id`
async fn attach(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Group)?;
    let layer_id = invocation.require(0, "layer id")?;
    let reply = invocation
        .shell
        .binder()
        .attach_layer_to_group(&path[0], &path[1], layer_id)
        .await?;
    Ok(reply)
}

/// `detach layer_id`
async fn detach(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::Group)?;
    let layer_id = invocation.require(0, "layer id")?;
    invocation
        .shell
        .binder()
        .detach_layer_from_group(&path[0], &path[1], layer_id)
        .await?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::commands::install;
    use crate::shell::{Shell, ShellError};
    use crate::testing::{binder_fixture, group_tree};
    use crate::transport::Verb;
    use crate::transport::mock::MockReply;

    #[test_timeout::tokio_timeout_test(5)]
    async fn layer_membership_commands() {
        let fixture = binder_fixture();
        fixture.mock.on(
            Verb::Get,
            "/user/u1",
            MockReply::json(json!({"id": "u1", "properties": {}})),
        );
        let mut tree = group_tree();
        tree["group"]["properties"]["params"] = json!({"visible": ["l2"]});
        fixture.mock.on(Verb::Get, "/user/u1/group/g1", MockReply::json(tree));
        fixture.mock.on(
            Verb::Post,
            "/user/u1/group/g1/attach/",
            MockReply::json(json!({"ok": true})),
        );
        fixture.mock.on(
            Verb::Delete,
            "/user/u1/group/g1/detach/l9",
            MockReply::json(Value::Null),
        );
        let shell = Shell::new(fixture.binder.clone());
        install(&shell);
        shell
            .switch_context(&["u1".to_string(), "g1".to_string()])
            .await
            .unwrap();

        assert_eq!(shell.exec("visible").await.unwrap(), json!(["l2"]));
        assert_eq!(shell.exec("attach l9").await.unwrap(), json!({"ok": true}));
        let attached = fixture.mock.requests().last().cloned().unwrap();
        assert_eq!(attached.body, Some(json!({"layer_id": "l9", "group_id": "g1"})));
        shell.exec("detach l9").await.unwrap();
        assert_eq!(fixture.mock.count(Verb::Delete, "/user/u1/group/g1/detach/l9"), 1);
        assert_eq!(
            shell.exec("attach").await,
            Err(ShellError::InvalidArgument("missing layer id".into()))
        );
    }
}
