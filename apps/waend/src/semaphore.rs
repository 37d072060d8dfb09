//! Process-wide topic bus and the notices carried on it.

use std::sync::Arc;

use signal_bus::{Bus, LocalBus};

use crate::model::Extent;
use crate::sync::SyncMessage;

pub const SYNC: &str = "sync";
pub const START_LOADER: &str = "start:loader";
pub const STOP_LOADER: &str = "stop:loader";
pub const CONTEXT_CHANGED: &str = "shell:change:context";
pub const USER_LOGIN: &str = "user:login";
pub const USER_LOGOUT: &str = "user:logout";
pub const REGION_PUSH: &str = "region:push";
/// Asks the shell to switch to the carried path.
pub const SWITCH_REQUEST: &str = "please:shell:context";

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Sync(SyncMessage),
    StartLoader(String),
    StopLoader,
    ContextChanged { depth: usize, path: Vec<String> },
    UserLogin(String),
    UserLogout,
    RegionPush(Extent),
    SwitchRequest(Vec<String>),
}

impl Notice {
    pub fn topic(&self) -> &'static str {
        match self {
            Notice::Sync(_) => SYNC,
            Notice::StartLoader(_) => START_LOADER,
            Notice::StopLoader => STOP_LOADER,
            Notice::ContextChanged { .. } => CONTEXT_CHANGED,
            Notice::UserLogin(_) => USER_LOGIN,
            Notice::UserLogout => USER_LOGOUT,
            Notice::RegionPush(_) => REGION_PUSH,
            Notice::SwitchRequest(_) => SWITCH_REQUEST,
        }
    }
}

pub type Semaphore = LocalBus<Notice>;

pub fn shared() -> Arc<Semaphore> {
    Arc::new(Semaphore::new())
}

/// Publishes `notice` under its own topic.
pub fn signal(bus: &Semaphore, notice: Notice) -> usize {
    bus.publish(notice.topic(), notice)
}
