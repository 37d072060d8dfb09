//! Navigation scopes.
//!
//! A [`Context`] wraps the model at one depth of the current path and the
//! command table for that depth. Contexts link to their parent; resolving a
//! command walks that chain leaf to root, so a feature context can still
//! run layer, group, user and shell commands.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::model::{ModelHandle, ModelKind};
use crate::shell::{Shell, ShellError};
use crate::stream::Sys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Depth {
    Shell = 0,
    User = 1,
    Group = 2,
    Layer = 3,
    Feature = 4,
}

impl Depth {
    pub const ALL: [Depth; 5] = [
        Depth::Shell,
        Depth::User,
        Depth::Group,
        Depth::Layer,
        Depth::Feature,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn kind(self) -> Option<ModelKind> {
        ModelKind::from_depth(self.index())
    }

    pub fn name(self) -> &'static str {
        match self {
            Depth::Shell => "root",
            Depth::User => "user",
            Depth::Group => "group",
            Depth::Layer => "layer",
            Depth::Feature => "feature",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type CommandResult = Result<Value, ShellError>;
pub type CommandFn = Arc<dyn Fn(Invocation) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Wraps an async handler into a [`CommandFn`].
pub fn command<F, Fut>(handler: F) -> CommandFn
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    Arc::new(move |invocation| handler(invocation).boxed())
}

/// Everything a handler gets to work with.
pub struct Invocation {
    pub shell: Arc<Shell>,
    /// The active leaf context, not necessarily the one owning the command.
    pub context: Arc<Context>,
    pub sys: Sys,
    pub args: Vec<String>,
    /// Result of the previous pipeline stage.
    pub delivered: Option<Value>,
}

impl Invocation {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn require(&self, index: usize, what: &str) -> Result<&str, ShellError> {
        self.arg(index)
            .ok_or_else(|| ShellError::InvalidArgument(format!("missing {what}")))
    }
}

/// Named handlers for one depth. Clones share the same table, so a context
/// sees commands installed after it was created.
#[derive(Clone, Default)]
pub struct CommandTable {
    entries: Arc<RwLock<BTreeMap<String, CommandFn>>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, handler: CommandFn) {
        self.entries.write().insert(name.into(), handler);
    }

    /// Replaces the whole table.
    pub fn replace(&self, entries: Vec<(String, CommandFn)>) {
        let mut table = self.entries.write();
        table.clear();
        table.extend(entries);
    }

    pub fn get(&self, name: &str) -> Option<CommandFn> {
        self.entries.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub struct Context {
    depth: Depth,
    data: Option<ModelHandle>,
    parent: Option<Arc<Context>>,
    commands: CommandTable,
    current: Vec<String>,
}

impl Context {
    pub fn root(commands: CommandTable) -> Arc<Self> {
        Arc::new(Self {
            depth: Depth::Shell,
            data: None,
            parent: None,
            commands,
            current: Vec::new(),
        })
    }

    pub fn child(parent: &Arc<Context>, data: ModelHandle, commands: CommandTable) -> Arc<Self> {
        let mut current = parent.current.clone();
        current.push(data.id().to_string());
        let depth = Depth::from_index(current.len()).unwrap_or(Depth::Feature);
        Arc::new(Self {
            depth,
            data: Some(data),
            parent: Some(Arc::clone(parent)),
            commands,
            current,
        })
    }

    pub fn name(&self) -> &'static str {
        self.depth.name()
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn data(&self) -> Option<&ModelHandle> {
        self.data.as_ref()
    }

    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    /// Ids from the user down to this context.
    pub fn current(&self) -> &[String] {
        &self.current
    }

    pub fn user_id(&self) -> Option<&str> {
        self.current.first().map(String::as_str)
    }

    pub fn group_id(&self) -> Option<&str> {
        self.current.get(1).map(String::as_str)
    }

    pub fn layer_id(&self) -> Option<&str> {
        self.current.get(2).map(String::as_str)
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.current.get(3).map(String::as_str)
    }

    /// Command tables from this context up to the root.
    fn tables(&self) -> Vec<(Depth, CommandTable)> {
        let mut tables = vec![(self.depth, self.commands.clone())];
        let mut cursor = self.parent.as_deref();
        while let Some(context) = cursor {
            tables.push((context.depth, context.commands.clone()));
            cursor = context.parent.as_deref();
        }
        tables
    }

    pub fn resolve(&self, name: &str) -> Option<(Depth, CommandFn)> {
        self.tables()
            .into_iter()
            .find_map(|(depth, table)| table.get(name).map(|handler| (depth, handler)))
    }

    /// Runs `tokens[0]` with the rest as arguments.
    pub async fn exec(
        self: &Arc<Self>,
        shell: Arc<Shell>,
        sys: Sys,
        mut tokens: Vec<String>,
        delivered: Option<Value>,
    ) -> CommandResult {
        if tokens.is_empty() {
            return Err(ShellError::NullCommand);
        }
        let name = tokens.remove(0);
        let (owner, handler) = self
            .resolve(&name)
            .ok_or_else(|| ShellError::CommandNotFound(name.clone()))?;
        debug!(
            target: "waend::context",
            command = %name,
            context = %self.depth,
            owner = %owner,
            "exec"
        );
        handler(Invocation {
            shell,
            context: Arc::clone(self),
            sys,
            args: tokens,
            delivered,
        })
        .await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth)
            .field("current", &self.current)
            .finish()
    }
}
