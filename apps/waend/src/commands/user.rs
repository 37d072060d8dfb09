use serde_json::json;

use super::{entry, list, named_properties, require_path};
use crate::context::{CommandFn, CommandResult, Depth, Invocation, command};

pub(super) fn commands() -> Vec<(String, CommandFn)> {
    vec![
        entry("lg", command(list_groups)),
        entry("mkgroup", command(create_group)),
    ]
}

async fn list_groups(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::User)?;
    let groups = invocation.shell.binder().get_groups(&path[0]).await?;
    Ok(list(&invocation, &groups))
}

/// `mkgroup name [description]`
async fn create_group(invocation: Invocation) -> CommandResult {
    let path = require_path(&invocation, Depth::User)?;
    let data = named_properties(&invocation)?;
    let group = invocation.shell.binder().set_group(&path[0], data).await?;
    invocation.sys.stdout.write_text(group.id());
    Ok(json!(group.id()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::commands::install;
    use crate::shell::Shell;
    use crate::testing::binder_fixture;
    use crate::transport::Verb;
    use crate::transport::mock::MockReply;

    #[test_timeout::tokio_timeout_test(5)]
    async fn lg_lists_groups_with_names() {
        let fixture = binder_fixture();
        fixture.mock.on(
            Verb::Get,
            "/user/u1",
            MockReply::json(json!({"id": "u1", "properties": {}})),
        );
        fixture.mock.on(
            Verb::Get,
            "/user/u1/group/",
            MockReply::json(json!({"results": [
                {"id": "g1", "properties": {"name": "city"}},
                {"id": "g2", "properties": {"name": "coast"}}
            ]})),
        );
        let shell = Shell::new(fixture.binder.clone());
        install(&shell);
        shell.switch_context(&["u1".to_string()]).await.unwrap();

        assert_eq!(shell.exec("lg").await.unwrap(), json!(["g1", "g2"]));
        assert_eq!(
            shell.stdout().dump(),
            vec![vec![json!("g1"), json!("city")], vec![json!("g2"), json!("coast")]]
        );
    }
}
