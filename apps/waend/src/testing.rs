//! Shared fixtures for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::bind::{Binder, Store};
use crate::model::ModelKind;
use crate::semaphore::{self, Semaphore};
use crate::sync::ChannelSubscriber;
use crate::transport::HttpClient;
use crate::transport::mock::MockTransport;

pub const API_BASE: &str = "http://api.test";

#[derive(Default)]
pub struct RecordingSubscriber {
    calls: Mutex<Vec<(ModelKind, String)>>,
}

impl RecordingSubscriber {
    pub fn calls(&self) -> Vec<(ModelKind, String)> {
        self.calls.lock().clone()
    }
}

impl ChannelSubscriber for RecordingSubscriber {
    fn subscribe(&self, kind: ModelKind, id: &str) -> bool {
        self.calls.lock().push((kind, id.to_string()));
        true
    }
}

pub struct BinderFixture {
    pub binder: Arc<Binder>,
    pub mock: Arc<MockTransport>,
    pub subscriber: Arc<RecordingSubscriber>,
    pub bus: Arc<Semaphore>,
}

pub fn binder_fixture() -> BinderFixture {
    let mock = Arc::new(MockTransport::new());
    let subscriber = Arc::new(RecordingSubscriber::default());
    let bus = semaphore::shared();
    let binder = Arc::new(Binder::new(
        HttpClient::new(mock.clone()),
        API_BASE,
        Arc::new(Store::new()),
        subscriber.clone(),
        bus.clone(),
    ));
    BinderFixture {
        binder,
        mock,
        subscriber,
        bus,
    }
}

/// `GET /user/u1/group/g1` body: two layers, three point features.
pub fn group_tree() -> Value {
    json!({
        "group": {
            "id": "g1",
            "user_id": "u1",
            "properties": {"name": "city", "extent": [0, 0, 10, 10]},
            "layers": [
                {
                    "id": "l1",
                    "properties": {"name": "trees"},
                    "features": [
                        {
                            "id": "f1",
                            "properties": {"a": 1, "b": 2},
                            "geom": {"type": "Point", "coordinates": [1, 1]}
                        },
                        {
                            "id": "f2",
                            "properties": {},
                            "geom": {"type": "Point", "coordinates": [2, 2]}
                        }
                    ]
                },
                {
                    "id": "l2",
                    "properties": {"name": "roads"},
                    "features": [
                        {
                            "id": "f3",
                            "properties": {},
                            "geom": {"type": "LineString", "coordinates": [[0, 0], [5, 5]]}
                        }
                    ]
                }
            ]
        }
    })
}
