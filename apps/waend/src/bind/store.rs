use std::collections::HashMap;

use parking_lot::RwLock;

use super::BindError;
use crate::model::ModelHandle;

/// Cache entry: the canonical model for an id and where it lives.
#[derive(Debug, Clone)]
pub struct Record {
    pub model: ModelHandle,
    /// Ids from the user down to this entity.
    pub comps: Vec<String>,
    /// Always `comps[comps.len() - 2]`.
    pub parent: String,
}

struct Slot {
    record: Record,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl Inner {
    fn record(&mut self, comps: &[String], model: ModelHandle) -> Option<Record> {
        if comps.len() < 2 {
            return None;
        }
        let id = model.id().to_string();
        if let Some(slot) = self.slots.get(&id) {
            slot.record.model.update_data(model.data(), false);
            return Some(slot.record.clone());
        }
        let record = Record {
            parent: comps[comps.len() - 2].clone(),
            comps: comps.to_vec(),
            model,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            id,
            Slot {
                record: record.clone(),
                seq,
            },
        );
        Some(record)
    }

    fn ordered(&self) -> Vec<(&String, &Slot)> {
        let mut slots: Vec<(&String, &Slot)> = self.slots.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
    }
}

/// Id-keyed cache of every entity below the user level. Lookups return
/// records in the order they were first recorded.
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `model` under `comps`. An id already present keeps its
    /// model, comps and parent; the incoming data is merged into the
    /// cached model with notifications. Single-component paths (users) are
    /// not recorded.
    pub fn record(&self, comps: &[String], model: ModelHandle) -> Option<Record> {
        self.inner.write().record(comps, model)
    }

    /// Records several entries under one lock so readers never see a
    /// partial batch.
    pub fn record_all(&self, entries: Vec<(Vec<String>, ModelHandle)>) -> Vec<Record> {
        let mut inner = self.inner.write();
        entries
            .into_iter()
            .filter_map(|(comps, model)| inner.record(&comps, model))
            .collect()
    }

    pub fn has(&self, id: &str) -> bool {
        self.inner.read().slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<ModelHandle> {
        self.inner.read().slots.get(id).map(|slot| slot.record.model.clone())
    }

    pub fn comps(&self, id: &str) -> Option<Vec<String>> {
        self.inner.read().slots.get(id).map(|slot| slot.record.comps.clone())
    }

    pub fn del(&self, id: &str) -> Option<Record> {
        self.inner.write().slots.remove(id).map(|slot| slot.record)
    }

    /// Points a still-cached id at `model`, keeping its current comps and
    /// parent. Returns `false` when the id is gone.
    pub fn replace_model(&self, model: ModelHandle) -> bool {
        let mut inner = self.inner.write();
        match inner.slots.get_mut(model.id()) {
            Some(slot) => {
                slot.record.model = model;
                true
            }
            None => false,
        }
    }

    pub fn lookup_key(&self, prefix: &str) -> Vec<ModelHandle> {
        let inner = self.inner.read();
        inner
            .ordered()
            .into_iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(_, slot)| slot.record.model.clone())
            .collect()
    }

    pub fn lookup<F>(&self, predicate: F) -> Vec<ModelHandle>
    where
        F: Fn(&Record, &str) -> bool,
    {
        let inner = self.inner.read();
        inner
            .ordered()
            .into_iter()
            .filter(|(id, slot)| predicate(&slot.record, id))
            .map(|(_, slot)| slot.record.model.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// REST path of the entity at `comps`.
pub fn make_path<S: AsRef<str>>(comps: &[S]) -> Result<String, BindError> {
    let c: Vec<&str> = comps.iter().map(AsRef::as_ref).collect();
    match c.as_slice() {
        [user] => Ok(format!("/user/{user}")),
        [user, group] => Ok(format!("/user/{user}/group/{group}")),
        [user, group, layer] => Ok(format!("/user/{user}/group/{group}/layer/{layer}")),
        [user, group, layer, feature] => Ok(format!(
            "/user/{user}/group/{group}/layer/{layer}/feature/{feature}"
        )),
        _ => Err(BindError::WrongPathLength(c.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelData, ModelEvent, ModelKind};
    use serde_json::json;
    use signal_bus::{Subscribable, drain};
    use std::sync::Arc;

    fn comps(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn layer(id: &str, props: serde_json::Value) -> ModelHandle {
        let props = props.as_object().cloned().unwrap_or_default();
        Model::new(ModelKind::Layer, ModelData::with_properties(id, props))
    }

    #[test]
    fn make_path_covers_every_depth() {
        assert_eq!(make_path(&["u"]).unwrap(), "/user/u");
        assert_eq!(make_path(&["u", "g"]).unwrap(), "/user/u/group/g");
        assert_eq!(make_path(&["u", "g", "l"]).unwrap(), "/user/u/group/g/layer/l");
        assert_eq!(
            make_path(&["u", "g", "l", "f"]).unwrap(),
            "/user/u/group/g/layer/l/feature/f"
        );
        let none: [&str; 0] = [];
        assert_eq!(make_path(&none), Err(BindError::WrongPathLength(0)));
        assert_eq!(
            make_path(&["u", "g", "l", "f", "x"]),
            Err(BindError::WrongPathLength(5))
        );
    }

    #[test]
    fn users_are_not_recorded() {
        let store = Store::new();
        let user = Model::new(ModelKind::User, ModelData::new("u1"));
        assert!(store.record(&comps(&["u1"]), user).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn re_record_merges_into_existing_model() {
        let store = Store::new();
        let first = layer("l1", json!({"name": "roads"}));
        store.record(&comps(&["u1", "g1", "l1"]), first.clone()).unwrap();
        let mut rx = first.subscribe();

        let second = layer("l1", json!({"name": "rails"}));
        let record = store.record(&comps(&["u2", "g2", "l1"]), second).unwrap();

        assert!(Arc::ptr_eq(&record.model, &first));
        assert_eq!(record.comps, comps(&["u1", "g1", "l1"]));
        assert_eq!(record.parent, "g1");
        assert_eq!(first.get("name"), Some(json!("rails")));
        assert!(drain(&mut rx)
            .iter()
            .any(|event| matches!(event, ModelEvent::Set { key, .. } if key == "name")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookups_keep_insertion_order() {
        let store = Store::new();
        for id in ["l3", "l1", "x9", "l2"] {
            store.record(&comps(&["u", "g", id]), layer(id, json!({})));
        }
        let ids: Vec<String> = store
            .lookup_key("l")
            .iter()
            .map(|model| model.id().to_string())
            .collect();
        assert_eq!(ids, vec!["l3", "l1", "l2"]);

        let under_g = store.lookup(|record, _| record.parent == "g");
        assert_eq!(under_g.len(), 4);
    }

    #[test]
    fn replace_model_does_not_resurrect() {
        let store = Store::new();
        let model = layer("l1", json!({}));
        store.record(&comps(&["u", "g", "l1"]), model.clone());
        store.del("l1");
        assert!(!store.replace_model(model));
        assert!(!store.has("l1"));
    }
}
