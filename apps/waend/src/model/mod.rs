//! Typed records wrapping a mutable property bag.
//!
//! A [`Model`] is always shared as a [`ModelHandle`]; the binder's cache owns
//! the canonical handle for every recorded id and callers get clones of it,
//! so listeners attached to a model survive later merges of remote data.

pub mod geometry;
pub mod properties;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use signal_bus::{Signal, Subscribable};
use tokio::sync::broadcast;
use tracing::trace;

pub use geometry::{Extent, Geometry, GeometryError};
pub use properties::{DataDiff, diff, path_get, path_set};

pub type ModelHandle = Arc<Model>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    User,
    Group,
    Layer,
    Feature,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::User => "user",
            ModelKind::Group => "group",
            ModelKind::Layer => "layer",
            ModelKind::Feature => "feature",
        }
    }

    /// Length of the id path leading to an entity of this kind.
    pub fn depth(self) -> usize {
        match self {
            ModelKind::User => 1,
            ModelKind::Group => 2,
            ModelKind::Layer => 3,
            ModelKind::Feature => 4,
        }
    }

    pub fn from_depth(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(ModelKind::User),
            2 => Some(ModelKind::Group),
            3 => Some(ModelKind::Layer),
            4 => Some(ModelKind::Feature),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire document of any entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom: Option<Value>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ModelData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_properties(id: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            properties,
            ..Self::default()
        }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// One property (or `geom`) took a new value.
    Set { key: String, value: Value },
    /// The whole document changed.
    SetData(ModelData),
    /// A child entity was added or removed.
    Change,
}

pub struct Model {
    id: String,
    kind: ModelKind,
    data: RwLock<ModelData>,
    events: Signal<ModelEvent>,
}

impl Model {
    pub fn new(kind: ModelKind, data: ModelData) -> ModelHandle {
        Arc::new(Self {
            id: data.id.clone(),
            kind,
            data: RwLock::new(data),
            events: Signal::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Whether a top-level property exists.
    pub fn has(&self, key: &str) -> bool {
        self.data.read().properties.contains_key(key)
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        path_get(&self.data.read().properties, path).cloned()
    }

    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Deep copy of the property bag.
    pub fn properties(&self) -> Map<String, Value> {
        self.data.read().properties.clone()
    }

    /// Deep copy of the whole document.
    pub fn data(&self) -> ModelData {
        self.data.read().clone()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&*self.data.read()).unwrap_or(Value::Null)
    }

    /// In-memory write of one dotted path. Remote persistence is the
    /// binder's job (`Binder::set_property`).
    pub fn set_local(&self, path: &str, value: Value) {
        path_set(&mut self.data.write().properties, path, value.clone());
        trace!(target: "waend::model", id = %self.id, key = path, "set");
        self.events.emit(ModelEvent::Set {
            key: path.to_string(),
            value,
        });
    }

    pub fn replace_properties(&self, properties: Map<String, Value>) {
        let snapshot = {
            let mut data = self.data.write();
            data.properties = properties;
            data.clone()
        };
        self.events.emit(ModelEvent::SetData(snapshot));
    }

    pub fn geometry(&self) -> Option<Geometry> {
        let geom = self.data.read().geom.clone()?;
        Geometry::from_value(geom).ok()
    }

    pub fn extent(&self) -> Option<Extent> {
        self.geometry()?.extent()
    }

    pub fn set_geometry_local(&self, geometry: &Geometry) {
        let value = geometry.to_geojson();
        self.data.write().geom = Some(value.clone());
        self.events.emit(ModelEvent::Set {
            key: "geom".into(),
            value,
        });
    }

    /// Replaces the document with `incoming`. Unless `silent`, emits
    /// `SetData` when anything differs and one `Set` per changed property
    /// of the previous document. Returns whether anything differed.
    pub fn update_data(&self, incoming: ModelData, silent: bool) -> bool {
        let delta = {
            let mut data = self.data.write();
            let delta = diff(&data, &incoming);
            *data = incoming.clone();
            delta
        };
        let changed = !delta.is_empty();
        if changed && !silent {
            self.events.emit(ModelEvent::SetData(incoming.clone()));
            for key in delta.changed_props {
                let value = incoming.properties.get(&key).cloned().unwrap_or(Value::Null);
                self.events.emit(ModelEvent::Set { key, value });
            }
        }
        changed
    }

    pub fn notify_change(&self) {
        self.events.emit(ModelEvent::Change);
    }
}

impl Subscribable<ModelEvent> for Model {
    fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signal_bus::drain;

    fn feature(props: Value) -> ModelHandle {
        let data = ModelData::with_properties("f1", props.as_object().cloned().unwrap());
        Model::new(ModelKind::Feature, data)
    }

    fn set_keys(events: &[ModelEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                ModelEvent::Set { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn update_fires_set_only_for_changed_keys() {
        let model = feature(json!({"a": 1, "b": 2}));
        let mut rx = model.subscribe();

        let properties = json!({"a": 1, "b": 3}).as_object().cloned().unwrap();
        let incoming = ModelData::with_properties("f1", properties);
        assert!(model.update_data(incoming, false));

        let events = drain(&mut rx);
        assert_eq!(set_keys(&events), vec!["b".to_string()]);
        assert!(matches!(events[0], ModelEvent::SetData(_)));
        assert_eq!(model.get("b"), Some(json!(3)));
    }

    #[test]
    fn identical_update_is_quiet() {
        let model = feature(json!({"a": 1}));
        let mut rx = model.subscribe();
        assert!(!model.update_data(model.data(), false));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn silent_update_still_replaces_data() {
        let model = feature(json!({"a": 1}));
        let mut rx = model.subscribe();
        let properties = json!({"a": 2}).as_object().cloned().unwrap();
        let incoming = ModelData::with_properties("f1", properties);
        assert!(model.update_data(incoming, true));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(model.get("a"), Some(json!(2)));
    }

    #[test]
    fn set_local_writes_dotted_path_and_notifies() {
        let model = feature(json!({}));
        let mut rx = model.subscribe();
        model.set_local("style.color", json!("red"));
        assert_eq!(model.get("style.color"), Some(json!("red")));
        assert!(model.has("style"));
        assert_eq!(set_keys(&drain(&mut rx)), vec!["style.color".to_string()]);
        assert_eq!(model.get_or("style.width", json!(1)), json!(1));
    }

    #[test]
    fn geometry_round_trips_through_document() {
        let model = feature(json!({}));
        assert!(model.geometry().is_none());
        let line = json!({"type": "LineString", "coordinates": [[0, 0], [2, 1]]});
        let geom = Geometry::from_value(line).unwrap();
        model.set_geometry_local(&geom);
        assert_eq!(model.geometry().unwrap().geometry_type(), "LineString");
        assert_eq!(model.extent().unwrap().to_array(), [0.0, 0.0, 2.0, 1.0]);
        assert_eq!(model.to_json()["geom"]["type"], "LineString");
    }

    #[test]
    fn unknown_attributes_survive_serde() {
        let data = ModelData::from_value(json!({
            "id": "l1",
            "properties": {"name": "roads"},
            "user_id": "u1"
        }))
        .unwrap();
        assert_eq!(data.attributes.get("user_id"), Some(&json!("u1")));
        let model = Model::new(ModelKind::Layer, data);
        assert_eq!(model.to_json()["user_id"], "u1");
        assert_eq!(model.kind().as_str(), "layer");
    }
}
