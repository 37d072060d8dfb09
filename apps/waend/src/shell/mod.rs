//! The command interpreter.
//!
//! The shell owns one context slot per depth, the command tables for every
//! depth and its own stdin/stdout/stderr. A context switch fetches each
//! level of the path in turn, builds the whole chain and installs it in one
//! step; a failure at any level installs nothing.

pub mod error;
pub mod tokens;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use signal_bus::{Bus, BusError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bind::Binder;
use crate::context::{CommandResult, CommandTable, Context, Depth};
use crate::model::{Extent, ModelHandle};
use crate::semaphore::{self, Notice, Semaphore};
use crate::stream::{Stream, Sys};

pub use error::ShellError;
pub use tokens::{cli_split, split_pipeline};

type PostSwitch = Box<dyn FnOnce() + Send>;

struct ShellState {
    contexts: [Option<Arc<Context>>; 5],
    current: Depth,
    user: Option<ModelHandle>,
    previous_group: Option<String>,
    post_switch: Vec<PostSwitch>,
}

pub struct Shell {
    binder: Arc<Binder>,
    bus: Arc<Semaphore>,
    sys: Sys,
    tables: [CommandTable; 5],
    state: Mutex<ShellState>,
    generation: AtomicU64,
}

impl Shell {
    pub fn new(binder: Arc<Binder>) -> Arc<Self> {
        let tables: [CommandTable; 5] = Default::default();
        let root = Context::root(tables[Depth::Shell.index()].clone());
        Arc::new(Self {
            bus: Arc::clone(binder.bus()),
            binder,
            sys: Sys::new(),
            tables,
            state: Mutex::new(ShellState {
                contexts: [Some(root), None, None, None, None],
                current: Depth::Shell,
                user: None,
                previous_group: None,
                post_switch: Vec::new(),
            }),
            generation: AtomicU64::new(0),
        })
    }

    pub fn binder(&self) -> &Arc<Binder> {
        &self.binder
    }

    pub fn bus(&self) -> &Arc<Semaphore> {
        &self.bus
    }

    pub fn sys(&self) -> &Sys {
        &self.sys
    }

    pub fn stdout(&self) -> &Stream {
        &self.sys.stdout
    }

    pub fn stderr(&self) -> &Stream {
        &self.sys.stderr
    }

    /// Table for `depth`. Contexts at that depth share it.
    pub fn commands(&self, depth: Depth) -> &CommandTable {
        &self.tables[depth.index()]
    }

    pub fn set_commands(&self, depth: Depth, commands: Vec<(String, crate::context::CommandFn)>) {
        self.tables[depth.index()].replace(commands);
    }

    pub fn current_depth(&self) -> Depth {
        self.state.lock().current
    }

    pub fn context(&self, depth: Depth) -> Option<Arc<Context>> {
        self.state.lock().contexts[depth.index()].clone()
    }

    /// The context commands run against.
    pub fn active_context(&self) -> Arc<Context> {
        let state = self.state.lock();
        state.contexts[state.current.index()]
            .clone()
            .or_else(|| state.contexts[0].clone())
            .unwrap_or_else(|| Context::root(self.tables[0].clone()))
    }

    pub fn current_path(&self) -> Vec<String> {
        self.active_context().current().to_vec()
    }

    pub fn user(&self) -> Option<ModelHandle> {
        self.state.lock().user.clone()
    }

    pub fn login_user(&self, user: ModelHandle) {
        let id = user.id().to_string();
        self.state.lock().user = Some(user);
        info!(target: "waend::shell", user = %id, "logged in");
        semaphore::signal(&self.bus, Notice::UserLogin(id));
    }

    pub fn logout_user(&self) {
        self.state.lock().user = None;
        info!(target: "waend::shell", "logged out");
        semaphore::signal(&self.bus, Notice::UserLogout);
    }

    /// Queues `callback` to run after the next successful switch.
    pub fn on_post_switch<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().post_switch.push(Box::new(callback));
    }

    /// Serves `please:shell:context` requests from the bus, one at a time.
    /// Stops when the shell is gone or the bus closes.
    pub fn spawn_switch_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe(semaphore::SWITCH_REQUEST);
        let shell = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let path = match signal_bus::next(&mut rx).await {
                    Ok(message) => match message.payload {
                        Notice::SwitchRequest(path) => path,
                        _ => continue,
                    },
                    Err(BusError::Lagged(missed)) => {
                        warn!(target: "waend::shell", missed, "switch requests lagged");
                        continue;
                    }
                    Err(BusError::Closed) => break,
                };
                let Some(shell) = shell.upgrade() else {
                    break;
                };
                if let Err(err) = shell.switch_context(&path).await {
                    warn!(
                        target: "waend::shell",
                        path = %path.join("/"),
                        error = %err,
                        "requested switch failed"
                    );
                }
            }
        })
    }

    /// Resolves the `me` alias.
    pub fn resolve_user_id(&self, name: &str) -> Result<String, ShellError> {
        if name != "me" {
            return Ok(name.to_string());
        }
        self.state
            .lock()
            .user
            .as_ref()
            .map(|user| user.id().to_string())
            .ok_or(ShellError::AuthRequired)
    }

    /// Runs one command line. Failures are also written to stderr.
    pub async fn exec(self: &Arc<Self>, line: &str) -> CommandResult {
        let stages = split_pipeline(line);
        let result = match stages.as_slice() {
            [single] => self.exec_one(single).await,
            _ => self.exec_many(&stages).await,
        };
        if let Err(err) = &result {
            debug!(target: "waend::shell", line, error = %err, "command failed");
            self.sys.stderr.write_text(err.to_string());
        }
        result
    }

    pub async fn exec_one(self: &Arc<Self>, line: &str) -> CommandResult {
        let context = self.active_context();
        context
            .exec(Arc::clone(self), self.sys.clone(), cli_split(line), None)
            .await
    }

    /// Runs stages one after the other over fresh pipes. Each stage gets
    /// the previous stage's result as `delivered`; the last stage's stdout
    /// ends up on the shell's stdout.
    pub async fn exec_many(self: &Arc<Self>, stages: &[String]) -> CommandResult {
        let context = self.active_context();
        let pipes = self.make_pipes(stages.len());
        let mut delivered: Option<Value> = None;
        for (index, stage) in stages.iter().enumerate() {
            let (sys, next) = (&pipes[index], &pipes[index + 1]);
            sys.stdout.pipe_to(&next.stdin);
            sys.stdin.pipe_to(&next.stdout);
            let value = context
                .exec(Arc::clone(self), sys.clone(), cli_split(stage), delivered.take())
                .await?;
            delivered = Some(value);
        }
        Ok(delivered.unwrap_or(Value::Null))
    }

    /// One stream triple per stage plus a trailing concentrator whose
    /// stdin forwards to the shell's stdout.
    fn make_pipes(&self, count: usize) -> Vec<Sys> {
        let mut pipes: Vec<Sys> = (0..=count).map(|_| Sys::with_stderr(&self.sys.stderr)).collect();
        if let Some(concentrator) = pipes.last_mut() {
            concentrator.stdin.pipe_to(&self.sys.stdout);
        }
        pipes
    }

    /// Switches to the context at `path` (0 to 4 ids). A leading `me`
    /// stands for the logged-in user.
    pub async fn switch_context(self: &Arc<Self>, path: &[String]) -> Result<Depth, ShellError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if path.len() > Depth::Feature.index() {
            return Err(ShellError::FailedToSwitchContext(format!(
                "path has {} components",
                path.len()
            )));
        }
        let mut ids = path.to_vec();
        if let Some(first) = ids.first_mut() {
            *first = self.resolve_user_id(first)?;
        }

        let mut chain: Vec<Arc<Context>> = Vec::with_capacity(ids.len());
        let mut parent = self
            .context(Depth::Shell)
            .unwrap_or_else(|| Context::root(self.tables[0].clone()));
        for (level, id) in ids.iter().enumerate() {
            let depth = Depth::from_index(level + 1).unwrap_or(Depth::Feature);
            let model = self
                .load(depth, &ids[..level], id)
                .await
                .map_err(|err| {
                    warn!(
                        target: "waend::shell",
                        depth = %depth,
                        id = %id,
                        error = %err,
                        "failed to switch context"
                    );
                    ShellError::FailedToSwitchContext(format!("{depth} {id}: {err}"))
                })?;
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(ShellError::Superseded);
            }
            let context = Context::child(&parent, model, self.tables[depth.index()].clone());
            chain.push(Arc::clone(&context));
            parent = context;
        }

        let depth = Depth::from_index(chain.len()).unwrap_or(Depth::Shell);
        {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(ShellError::Superseded);
            }
            for level in 1..state.contexts.len() {
                state.contexts[level] = chain.get(level - 1).cloned();
            }
            state.current = depth;
            if let Some(group) = chain.get(1) {
                self.queue_region_push(&mut state, group);
            }
        }
        self.clear_contexts();
        Ok(depth)
    }

    async fn load(
        &self,
        depth: Depth,
        ancestors: &[String],
        id: &str,
    ) -> Result<ModelHandle, ShellError> {
        let binder = &self.binder;
        let model = match (depth, ancestors) {
            (Depth::User, []) => binder.get_user(id).await?,
            (Depth::Group, [user]) => binder.get_group(user, id).await?,
            (Depth::Layer, [user, group]) => binder.get_layer(user, group, id).await?,
            (Depth::Feature, [user, group, layer]) => {
                binder.get_feature(user, group, layer, id).await?
            }
            _ => {
                return Err(ShellError::FailedToSwitchContext(format!(
                    "no {depth} below {}",
                    ancestors.join("/")
                )));
            }
        };
        Ok(model)
    }

    /// Entering a different group that carries an extent pushes that
    /// region once the switch completes.
    fn queue_region_push(&self, state: &mut ShellState, group: &Arc<Context>) {
        let Some(data) = group.data() else {
            return;
        };
        if state.previous_group.as_deref() == Some(data.id()) {
            return;
        }
        state.previous_group = Some(data.id().to_string());
        let Some(extent) = data.get("extent").as_ref().and_then(Extent::from_value) else {
            return;
        };
        let bus = Arc::clone(&self.bus);
        state.post_switch.push(Box::new(move || {
            semaphore::signal(&bus, Notice::RegionPush(extent));
        }));
    }

    /// Drops contexts deeper than the current depth, runs the queued
    /// post-switch callbacks and announces the new location.
    pub fn clear_contexts(&self) {
        let (depth, path, callbacks) = {
            let mut state = self.state.lock();
            let start = state.current.index() + 1;
            for slot in state.contexts.iter_mut().skip(start) {
                *slot = None;
            }
            let path: Vec<String> = state.contexts[1..start]
                .iter()
                .map_while(|context| context.as_ref())
                .filter_map(|context| context.data().map(|data| data.id().to_string()))
                .collect();
            (state.current, path, std::mem::take(&mut state.post_switch))
        };
        for callback in callbacks {
            callback();
        }
        info!(target: "waend::shell", depth = %depth, path = %path.join("/"), "context changed");
        semaphore::signal(
            &self.bus,
            Notice::ContextChanged {
                depth: depth.index(),
                path,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Invocation, command};
    use crate::model::{Model, ModelData, ModelKind};
    use crate::testing::{BinderFixture, binder_fixture, group_tree};
    use crate::transport::Verb;
    use crate::transport::mock::MockReply;
    use serde_json::json;
    use signal_bus::{Bus, drain};
    use std::time::Duration;

    fn path(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn scripted() -> (BinderFixture, Arc<Shell>) {
        let fixture = binder_fixture();
        fixture.mock.on(
            Verb::Get,
            "/user/u1",
            MockReply::json(json!({"id": "u1", "properties": {"name": "ada"}})),
        );
        fixture
            .mock
            .on(Verb::Get, "/user/u1/group/g1", MockReply::json(group_tree()));
        let shell = Shell::new(fixture.binder.clone());
        (fixture, shell)
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn switch_loads_each_level_and_announces() {
        let (fixture, shell) = scripted();
        let mut changes = fixture.bus.subscribe(semaphore::CONTEXT_CHANGED);

        let depth = shell
            .switch_context(&path(&["u1", "g1", "l1", "f1"]))
            .await
            .unwrap();
        assert_eq!(depth, Depth::Feature);
        assert_eq!(shell.current_path(), path(&["u1", "g1", "l1", "f1"]));
        assert_eq!(
            drain(&mut changes)
                .into_iter()
                .map(|message| message.payload)
                .collect::<Vec<_>>(),
            vec![Notice::ContextChanged {
                depth: 4,
                path: path(&["u1", "g1", "l1", "f1"])
            }]
        );

        shell.switch_context(&path(&["u1"])).await.unwrap();
        assert_eq!(shell.current_depth(), Depth::User);
        assert!(shell.context(Depth::Group).is_none());
        assert!(shell.context(Depth::Feature).is_none());
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn failed_switch_keeps_previous_location() {
        let (_fixture, shell) = scripted();
        shell.switch_context(&path(&["u1", "g1"])).await.unwrap();

        let err = shell
            .switch_context(&path(&["u1", "g1", "nope"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::FailedToSwitchContext(_)));
        assert_eq!(shell.current_depth(), Depth::Group);
        assert!(shell.context(Depth::Layer).is_none());
        assert_eq!(shell.current_path(), path(&["u1", "g1"]));

        let too_deep = shell.switch_context(&path(&["a", "b", "c", "d", "e"])).await;
        assert!(matches!(too_deep, Err(ShellError::FailedToSwitchContext(_))));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn failed_group_fetch_keeps_user_location() {
        let (fixture, shell) = scripted();
        shell.switch_context(&path(&["u1"])).await.unwrap();
        let mut stop = fixture.bus.subscribe(semaphore::STOP_LOADER);

        let err = shell
            .switch_context(&path(&["u1", "gX", "l1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::FailedToSwitchContext(_)), "{err:?}");
        assert_eq!(shell.current_depth(), Depth::User);
        assert!(shell.context(Depth::Group).is_none());
        assert_eq!(shell.current_path(), path(&["u1"]));
        assert_eq!(drain(&mut stop).len(), 1);
        assert_eq!(fixture.mock.count(Verb::Get, "/user/u1/group/gX"), 1);
        assert_eq!(fixture.mock.count(Verb::Get, "/user/u1/group/gX/layer/l1"), 0);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn switch_requests_on_the_bus_move_the_shell() {
        let (fixture, shell) = scripted();
        let mut changes = fixture.bus.subscribe(semaphore::CONTEXT_CHANGED);
        let listener = shell.spawn_switch_listener();

        semaphore::signal(&fixture.bus, Notice::SwitchRequest(path(&["u1", "gX"])));
        semaphore::signal(&fixture.bus, Notice::SwitchRequest(path(&["u1", "g1"])));
        let changed = signal_bus::next(&mut changes).await.unwrap();
        assert_eq!(
            changed.payload,
            Notice::ContextChanged {
                depth: 2,
                path: path(&["u1", "g1"])
            }
        );
        assert_eq!(shell.current_path(), path(&["u1", "g1"]));
        listener.abort();
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn me_requires_login() {
        let (fixture, shell) = scripted();
        assert_eq!(
            shell.switch_context(&path(&["me"])).await,
            Err(ShellError::AuthRequired)
        );
        let mut login = fixture.bus.subscribe(semaphore::USER_LOGIN);
        shell.login_user(Model::new(ModelKind::User, ModelData::new("u1")));
        assert_eq!(drain(&mut login).len(), 1);
        shell.switch_context(&path(&["me", "g1"])).await.unwrap();
        assert_eq!(shell.current_path(), path(&["u1", "g1"]));

        shell.logout_user();
        assert_eq!(shell.resolve_user_id("me"), Err(ShellError::AuthRequired));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn stale_switch_is_discarded() {
        let (fixture, shell) = scripted();
        fixture.mock.set_delay(Duration::from_millis(30));

        let slow = {
            let shell = shell.clone();
            tokio::spawn(async move { shell.switch_context(&path(&["u1", "g1"])).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fast = shell.switch_context(&[]).await;

        assert_eq!(fast, Ok(Depth::Shell));
        assert_eq!(slow.await.unwrap(), Err(ShellError::Superseded));
        assert_eq!(shell.current_depth(), Depth::Shell);
        assert!(shell.context(Depth::User).is_none());
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn entering_group_pushes_its_extent_once() {
        let (fixture, shell) = scripted();
        let mut region = fixture.bus.subscribe(semaphore::REGION_PUSH);
        let fired = Arc::new(AtomicU64::new(0));
        {
            let fired = fired.clone();
            shell.on_post_switch(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        shell.switch_context(&path(&["u1", "g1"])).await.unwrap();
        shell.switch_context(&path(&["u1", "g1", "l1"])).await.unwrap();

        let pushed: Vec<Notice> = drain(&mut region).into_iter().map(|m| m.payload).collect();
        assert_eq!(pushed, vec![Notice::RegionPush(Extent::new(0.0, 0.0, 10.0, 10.0))]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    fn recorder(
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
        write: bool,
    ) -> crate::context::CommandFn {
        command(move |invocation: Invocation| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{name}:start"));
                if write {
                    invocation.sys.stdout.write_text(name);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                let seen = invocation.sys.stdin.read_sync();
                log.lock().push(format!("{name}:end:{}", seen.is_some()));
                Ok(json!({"stage": name, "delivered": invocation.delivered}))
            }
        })
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn pipeline_runs_stages_in_order() {
        let (_fixture, shell) = scripted();
        let log = Arc::new(Mutex::new(Vec::new()));
        shell.commands(Depth::Shell).insert("one", recorder(log.clone(), "one", true));
        shell.commands(Depth::Shell).insert("two", recorder(log.clone(), "two", true));

        let result = shell.exec("one | two").await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["one:start", "one:end:false", "two:start", "two:end:true"]
        );
        assert_eq!(result["stage"], "two");
        assert_eq!(result["delivered"]["stage"], "one");
        assert_eq!(shell.stdout().read_sync(), Some(vec![json!("two")]));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn errors_reach_stderr() {
        let (_fixture, shell) = scripted();
        let err = shell.exec("frobnicate now").await.unwrap_err();
        assert_eq!(err, ShellError::CommandNotFound("frobnicate".into()));
        assert_eq!(
            shell.stderr().read_sync(),
            Some(vec![json!("command not found: frobnicate")])
        );
        assert_eq!(shell.exec("  ").await, Err(ShellError::NullCommand));
    }
}
