//! The binder: local cache of the user → group → layer → feature tree.
//!
//! Three sources feed the cache. REST fetches record what they return,
//! push notifications merge into or evict cached entries, and local writes
//! mutate a model first and then PUT it. Everything read back from the
//! binder is the canonical [`ModelHandle`] held by the [`Store`], so
//! observers attached to a model keep seeing later merges.

pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::model::{Geometry, Model, ModelData, ModelHandle, ModelKind};
use crate::semaphore::{self, Notice, Semaphore};
use crate::sync::{ChannelSubscriber, SyncEvent, SyncMessage};
use crate::transport::{HttpClient, RequestOptions, TransportError};

pub use store::{Record, Store, make_path};

const LOADER_MESSAGE: &str = "downloading map data";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("wrong number of path components: {0}")]
    WrongPathLength(usize),
    #[error("{0} is not cached")]
    NotCached(String),
    #[error("feature {0} has no geometry")]
    MissingGeometry(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("no cached id matches '{0}'")]
    NoMatch(String),
}

type Pending = Shared<BoxFuture<'static, Result<ModelHandle, BindError>>>;

pub struct Binder {
    http: HttpClient,
    api_base: String,
    store: Arc<Store>,
    previews: Mutex<HashMap<String, ModelHandle>>,
    inflight: Mutex<HashMap<String, Pending>>,
    subscriber: Arc<dyn ChannelSubscriber>,
    bus: Arc<Semaphore>,
}

impl Binder {
    pub fn new(
        http: HttpClient,
        api_base: impl Into<String>,
        store: Arc<Store>,
        subscriber: Arc<dyn ChannelSubscriber>,
        bus: Arc<Semaphore>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            store,
            previews: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            subscriber,
            bus,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<Semaphore> {
        &self.bus
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Joins an in-flight fetch for `id` or starts one with `start`.
    async fn fetch_once<F, Fut>(&self, id: &str, start: F) -> Result<ModelHandle, BindError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelHandle, BindError>> + Send + 'static,
    {
        let pending = {
            let mut inflight = self.inflight.lock();
            match inflight.get(id) {
                Some(existing) => {
                    trace!(target: "waend::bind", id, "joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let pending = start().boxed().shared();
                    inflight.insert(id.to_string(), pending.clone());
                    pending
                }
            }
        };
        let result = pending.clone().await;
        let mut inflight = self.inflight.lock();
        if inflight.get(id).is_some_and(|current| current.ptr_eq(&pending)) {
            inflight.remove(id);
        }
        result
    }

    /// Fetches and records one entity at `comps` unless it is cached.
    async fn get_entity(
        &self,
        kind: ModelKind,
        comps: Vec<String>,
    ) -> Result<ModelHandle, BindError> {
        let id = comps
            .last()
            .cloned()
            .ok_or(BindError::WrongPathLength(0))?;
        if let Some(model) = self.store.get(&id) {
            return Ok(model);
        }
        let url = self.url(&make_path(&comps)?);
        let http = self.http.clone();
        let store = Arc::clone(&self.store);
        self.fetch_once(&id, move || async move {
            debug!(target: "waend::bind", kind = %kind, url = %url, "cache miss");
            let model = http
                .get_with(&url, RequestOptions::default(), |value| parse_model(kind, value))
                .await?;
            Ok(canonical(&store, &comps, model))
        })
        .await
    }

    /// The authenticated user.
    pub async fn get_me(&self) -> Result<ModelHandle, BindError> {
        let url = self.url("/auth");
        self.http
            .get_with(&url, RequestOptions::default(), |value| parse_model(ModelKind::User, value))
            .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<ModelHandle, BindError> {
        self.get_entity(ModelKind::User, vec![user_id.to_string()]).await
    }

    /// Deep-loads a group with its layers and their features, records the
    /// whole tree at once and subscribes to every layer, then the group.
    pub async fn get_group(&self, user_id: &str, group_id: &str) -> Result<ModelHandle, BindError> {
        if let Some(model) = self.store.get(group_id) {
            return Ok(model);
        }
        let url = self.url(&make_path(&[user_id, group_id])?);
        let http = self.http.clone();
        let store = Arc::clone(&self.store);
        let subscriber = Arc::clone(&self.subscriber);
        let bus = Arc::clone(&self.bus);
        let user_id = user_id.to_string();
        let gid = group_id.to_string();
        let group = self
            .fetch_once(group_id, move || async move {
                semaphore::signal(&bus, Notice::StartLoader(LOADER_MESSAGE.into()));
                let tree = http
                    .get(&url, RequestOptions::default())
                    .await
                    .map_err(BindError::from)
                    .and_then(|value| parse_group_tree(&user_id, &gid, value));
                let (entries, layer_ids) = match tree {
                    Ok(tree) => tree,
                    Err(err) => {
                        semaphore::signal(&bus, Notice::StopLoader);
                        return Err(err);
                    }
                };
                let records = store.record_all(entries);
                for layer_id in &layer_ids {
                    subscriber.subscribe(ModelKind::Layer, layer_id);
                }
                semaphore::signal(&bus, Notice::StopLoader);
                subscriber.subscribe(ModelKind::Group, &gid);
                debug!(
                    target: "waend::bind",
                    group = %gid,
                    layers = layer_ids.len(),
                    records = records.len(),
                    "group loaded"
                );
                records
                    .into_iter()
                    .next()
                    .map(|record| record.model)
                    .ok_or_else(|| BindError::InvalidResponse("group was not recorded".into()))
            })
            .await?;
        self.previews.lock().remove(group_id);
        Ok(group)
    }

    /// Lists a user's groups. Groups not already cached go to the preview
    /// cache only, so a later `get_group` still deep-loads them.
    pub async fn get_groups(&self, user_id: &str) -> Result<Vec<ModelHandle>, BindError> {
        let url = self.url(&format!("/user/{user_id}/group/"));
        let value = self.http.get(&url, RequestOptions::default()).await?;
        let value = objectify(value)?;
        let results = value
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| BindError::InvalidResponse("group list without results".into()))?;

        let mut previews = self.previews.lock();
        let mut groups = Vec::with_capacity(results.len());
        for item in results {
            let data = parse_data(item.clone())?;
            if let Some(model) = self.store.get(&data.id) {
                groups.push(model);
            } else if let Some(model) = previews.get(&data.id) {
                groups.push(model.clone());
            } else {
                let model = Model::new(ModelKind::Group, data);
                previews.insert(model.id().to_string(), model.clone());
                groups.push(model);
            }
        }
        Ok(groups)
    }

    pub async fn get_layer(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
    ) -> Result<ModelHandle, BindError> {
        self.get_entity(ModelKind::Layer, owned(&[user_id, group_id, layer_id]))
            .await
    }

    /// Cached layers of `group_id`. Never touches the network.
    pub fn get_layers(&self, group_id: &str) -> Vec<ModelHandle> {
        self.store.lookup(|record, _| {
            record.parent == group_id && record.model.kind() == ModelKind::Layer
        })
    }

    pub async fn get_feature(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
        feature_id: &str,
    ) -> Result<ModelHandle, BindError> {
        self.get_entity(
            ModelKind::Feature,
            owned(&[user_id, group_id, layer_id, feature_id]),
        )
        .await
    }

    /// Cached features of `layer_id`. Never touches the network.
    pub fn get_features(&self, layer_id: &str) -> Vec<ModelHandle> {
        self.store.lookup(|record, _| {
            record.parent == layer_id && record.model.kind() == ModelKind::Feature
        })
    }

    async fn create(
        &self,
        kind: ModelKind,
        parents: Vec<String>,
        data: Value,
        notify_parent: bool,
    ) -> Result<ModelHandle, BindError> {
        let collection = match kind {
            ModelKind::Group => "group",
            ModelKind::Layer => "layer",
            ModelKind::Feature => "feature",
            ModelKind::User => return Err(BindError::WrongPathLength(0)),
        };
        let url = self.url(&format!("{}/{collection}/", make_path(&parents)?));
        let model = self
            .http
            .post_with(&url, RequestOptions::json(data), |value| parse_model(kind, value))
            .await?;
        let mut comps = parents;
        let parent_id = comps.last().cloned().unwrap_or_default();
        comps.push(model.id().to_string());
        let model = canonical(&self.store, &comps, model);
        if notify_parent {
            self.change_parent(&parent_id);
        }
        Ok(model)
    }

    pub async fn set_group(&self, user_id: &str, data: Value) -> Result<ModelHandle, BindError> {
        self.create(ModelKind::Group, owned(&[user_id]), data, true).await
    }

    pub async fn set_layer(
        &self,
        user_id: &str,
        group_id: &str,
        data: Value,
    ) -> Result<ModelHandle, BindError> {
        self.create(ModelKind::Layer, owned(&[user_id, group_id]), data, true)
            .await
    }

    /// Creates a feature. With `batch` the layer is not signalled, leaving
    /// that to the caller once the whole batch is in.
    pub async fn set_feature(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
        data: Value,
        batch: bool,
    ) -> Result<ModelHandle, BindError> {
        self.create(
            ModelKind::Feature,
            owned(&[user_id, group_id, layer_id]),
            data,
            !batch,
        )
        .await
    }

    /// PUTs the model's current state to its canonical path. On success
    /// the cache entry points at `model` again, unless the entry was
    /// evicted while the request was in flight.
    pub async fn update(&self, model: &ModelHandle) -> Result<ModelHandle, BindError> {
        let comps = match self.store.comps(model.id()) {
            Some(comps) => comps,
            None if model.kind() == ModelKind::User => vec![model.id().to_string()],
            None => return Err(BindError::NotCached(model.id().to_string())),
        };
        let url = self.url(&make_path(&comps)?);
        self.http.put(&url, RequestOptions::json(model.to_json())).await?;
        if model.kind() != ModelKind::User && !self.store.replace_model(Arc::clone(model)) {
            debug!(
                target: "waend::bind",
                id = model.id(),
                "evicted while updating; not re-recorded"
            );
        }
        Ok(Arc::clone(model))
    }

    /// Optimistic property write followed by a remote update.
    pub async fn set_property(
        &self,
        model: &ModelHandle,
        key: &str,
        value: Value,
    ) -> Result<ModelHandle, BindError> {
        model.set_local(key, value);
        self.update(model).await
    }

    /// Replaces every property, then updates remotely.
    pub async fn set_properties(
        &self,
        model: &ModelHandle,
        properties: Map<String, Value>,
    ) -> Result<ModelHandle, BindError> {
        model.replace_properties(properties);
        self.update(model).await
    }

    pub async fn set_geometry(
        &self,
        feature: &ModelHandle,
        geometry: &Geometry,
    ) -> Result<ModelHandle, BindError> {
        feature.set_geometry_local(geometry);
        self.update(feature).await
    }

    /// Deletes a cached feature. The path carries the geometry type.
    pub async fn del_feature(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
        feature_id: &str,
    ) -> Result<(), BindError> {
        let feature = self
            .store
            .get(feature_id)
            .ok_or_else(|| BindError::NotCached(feature_id.to_string()))?;
        let geometry = feature
            .geometry()
            .ok_or_else(|| BindError::MissingGeometry(feature_id.to_string()))?;
        let url = self.url(&format!(
            "/user/{user_id}/group/{group_id}/layer/{layer_id}/feature.{}/{feature_id}",
            geometry.geometry_type()
        ));
        self.http.del(&url, RequestOptions::default()).await?;
        self.store.del(feature_id);
        self.change_parent(layer_id);
        Ok(())
    }

    pub async fn attach_layer_to_group(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
    ) -> Result<Value, BindError> {
        let url = self.url(&format!("/user/{user_id}/group/{group_id}/attach/"));
        let body = json!({"layer_id": layer_id, "group_id": group_id});
        Ok(self.http.post(&url, RequestOptions::json(body)).await?)
    }

    pub async fn detach_layer_from_group(
        &self,
        user_id: &str,
        group_id: &str,
        layer_id: &str,
    ) -> Result<(), BindError> {
        let url = self.url(&format!("/user/{user_id}/group/{group_id}/detach/{layer_id}"));
        self.http.del(&url, RequestOptions::default()).await?;
        self.change_parent(group_id);
        Ok(())
    }

    /// Layer visibility per the parent group's `params.visible` list. No
    /// list means visible; a group that fails to load means hidden.
    pub async fn is_layer_visible(&self, layer: &ModelHandle) -> bool {
        let Some(comps) = self.store.comps(layer.id()) else {
            return false;
        };
        let [user_id, group_id, ..] = comps.as_slice() else {
            return false;
        };
        let group = match self.get_group(user_id, group_id).await {
            Ok(group) => group,
            Err(err) => {
                debug!(
                    target: "waend::bind",
                    layer = layer.id(),
                    error = %err,
                    "group unavailable"
                );
                return false;
            }
        };
        match group.get("params.visible") {
            Some(Value::Array(visible)) => visible.iter().any(|id| id.as_str() == Some(layer.id())),
            _ => true,
        }
    }

    pub fn match_key(&self, prefix: &str) -> Vec<ModelHandle> {
        self.store.lookup_key(prefix)
    }

    pub async fn match_key_async(&self, prefix: &str) -> Result<Vec<ModelHandle>, BindError> {
        let matches = self.match_key(prefix);
        if matches.is_empty() {
            return Err(BindError::NoMatch(prefix.to_string()));
        }
        Ok(matches)
    }

    /// Emits `Change` on a cached parent.
    pub fn change_parent(&self, parent_id: &str) {
        if let Some(parent) = self.store.get(parent_id) {
            trace!(target: "waend::bind", parent = parent_id, "change");
            parent.notify_change();
        }
    }

    pub fn get_comps(&self, id: &str) -> Option<Vec<String>> {
        self.store.comps(id)
    }

    /// Applies one push notification to the cache. Returns whether the
    /// cache changed. Never fetches.
    pub fn apply_sync(&self, message: &SyncMessage) -> bool {
        let channel = &message.channel;
        match (&message.event, channel.kind) {
            (SyncEvent::Update, _) => {
                let Some(data) = push_document(message) else {
                    return false;
                };
                match self.store.get(&data.id) {
                    Some(model) => model.update_data(data, false),
                    None => false,
                }
            }
            (SyncEvent::Create, ModelKind::Layer) => {
                let Some(data) = push_document(message) else {
                    return false;
                };
                if self.store.has(&data.id) {
                    return false;
                }
                let Some(mut comps) = self.store.comps(&channel.id) else {
                    return false;
                };
                comps.push(data.id.clone());
                self.store
                    .record(&comps, Model::new(ModelKind::Feature, data));
                self.change_parent(&channel.id);
                true
            }
            (SyncEvent::Delete, ModelKind::Layer) => {
                let Some(feature_id) = message.payload_id() else {
                    return false;
                };
                if self.store.del(feature_id).is_none() {
                    return false;
                }
                self.change_parent(&channel.id);
                true
            }
            _ => false,
        }
    }

    /// Applies every push from `pushes`, one at a time in arrival order,
    /// until the sender side goes away.
    pub fn spawn_sync_listener(
        self: &Arc<Self>,
        mut pushes: mpsc::UnboundedReceiver<SyncMessage>,
    ) -> JoinHandle<()> {
        let binder = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = pushes.recv().await {
                binder.apply_sync(&message);
            }
            debug!(target: "waend::bind", "sync listener stopped");
        })
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Records `model` and hands back whichever handle the cache keeps.
fn canonical(store: &Store, comps: &[String], model: ModelHandle) -> ModelHandle {
    store
        .record(comps, Arc::clone(&model))
        .map(|record| record.model)
        .unwrap_or(model)
}

/// String bodies are decoded once more as JSON.
fn objectify(value: Value) -> Result<Value, BindError> {
    match value {
        Value::String(text) => {
            serde_json::from_str(&text).map_err(|err| BindError::InvalidResponse(err.to_string()))
        }
        other => Ok(other),
    }
}

fn parse_data(value: Value) -> Result<ModelData, BindError> {
    ModelData::from_value(objectify(value)?)
        .map_err(|err| BindError::InvalidResponse(err.to_string()))
}

fn parse_model(kind: ModelKind, value: Value) -> Result<ModelHandle, BindError> {
    Ok(Model::new(kind, parse_data(value)?))
}

fn push_document(message: &SyncMessage) -> Option<ModelData> {
    match ModelData::from_value(message.payload.clone()) {
        Ok(data) => Some(data),
        Err(err) => {
            warn!(
                target: "waend::bind",
                event = %message.event,
                error = %err,
                "push payload is not a document"
            );
            None
        }
    }
}

type GroupTree = (Vec<(Vec<String>, ModelHandle)>, Vec<String>);

/// Splits `{group: {.., layers: [{.., features: [..]}]}}` into cache
/// entries, group first, and the ids of its layers.
fn parse_group_tree(user_id: &str, group_id: &str, value: Value) -> Result<GroupTree, BindError> {
    let mut envelope = objectify(value)?;
    let Some(Value::Object(mut group)) = envelope.get_mut("group").map(Value::take) else {
        return Err(BindError::InvalidResponse("group envelope without group".into()));
    };
    let layers = match group.remove("layers") {
        Some(Value::Array(layers)) => layers,
        _ => Vec::new(),
    };

    let mut entries = vec![(
        owned(&[user_id, group_id]),
        parse_model(ModelKind::Group, Value::Object(group))?,
    )];
    let mut layer_ids = Vec::with_capacity(layers.len());
    for layer in layers {
        let Value::Object(mut layer) = layer else {
            return Err(BindError::InvalidResponse("layer is not an object".into()));
        };
        let features = match layer.remove("features") {
            Some(Value::Array(features)) => features,
            _ => Vec::new(),
        };
        let layer = parse_model(ModelKind::Layer, Value::Object(layer))?;
        let layer_id = layer.id().to_string();
        entries.push((owned(&[user_id, group_id, layer_id.as_str()]), layer));
        for feature in features {
            let feature = parse_model(ModelKind::Feature, feature)?;
            let comps = owned(&[user_id, group_id, layer_id.as_str(), feature.id()]);
            entries.push((comps, feature));
        }
        layer_ids.push(layer_id);
    }
    Ok((entries, layer_ids))
}
