use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;

/// One `write` call: the tuple of values handed to it.
pub type Entry = Vec<Value>;

type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream is closed")]
    Closed,
}

struct State {
    entries: VecDeque<Entry>,
    status: Status,
    listeners: Vec<Listener>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Buffered pipe between command stages.
///
/// Cloning yields another handle on the same buffer. Reads are meant for a
/// single consumer; two concurrent `read` calls race for the same entry.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

impl Stream {
    pub fn new() -> Self {
        Self::with_status(Status::Open)
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: VecDeque::new(),
                    status,
                    listeners: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn open(&self) {
        self.inner.state.lock().status = Status::Open;
    }

    /// Stops accepting writes. Buffered entries stay readable.
    pub fn close(&self) {
        self.inner.state.lock().status = Status::Closed;
        self.inner.notify.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().status == Status::Open
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `values` and runs every data listener before returning.
    /// Dropped silently when the stream is closed.
    pub fn write(&self, values: Entry) {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.status == Status::Closed {
                return;
            }
            state.entries.push_back(values.clone());
            state.listeners.clone()
        };
        self.inner.notify.notify_waiters();
        for listener in listeners {
            listener(&values);
        }
    }

    pub fn write_text(&self, text: impl Into<String>) {
        self.write(vec![Value::String(text.into())]);
    }

    /// Oldest buffered entry, or the next one written.
    pub async fn read(&self) -> Result<Entry, StreamError> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(entry) = state.entries.pop_front() {
                    return Ok(entry);
                }
                if state.status == Status::Closed {
                    return Err(StreamError::Closed);
                }
            }
            notified.await;
        }
    }

    pub fn read_sync(&self) -> Option<Entry> {
        let mut state = self.inner.state.lock();
        if state.status == Status::Closed {
            return None;
        }
        state.entries.pop_front()
    }

    /// Empties the buffer and hands back what it held.
    pub fn dump(&self) -> Vec<Entry> {
        let mut state = self.inner.state.lock();
        state.entries.drain(..).collect()
    }

    pub fn on_data<F>(&self, listener: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.state.lock().listeners.push(Arc::new(listener));
    }

    /// Forwards every subsequent write on `self` to `target`.
    pub fn pipe_to(&self, target: &Stream) {
        let target = target.clone();
        self.on_data(move |values| target.write(values.to_vec()));
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Stream")
            .field("status", &state.status)
            .field("buffered", &state.entries.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// stdin/stdout/stderr of one execution unit.
#[derive(Debug, Clone, Default)]
pub struct Sys {
    pub stdin: Stream,
    pub stdout: Stream,
    pub stderr: Stream,
}

impl Sys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh stdin/stdout sharing an existing stderr.
    pub fn with_stderr(stderr: &Stream) -> Self {
        Self {
            stdin: Stream::new(),
            stdout: Stream::new(),
            stderr: stderr.clone(),
        }
    }
}
