//! The state accessor handed to resource handlers.
//!
//! [`ResourceData`] wraps the attribute map of one resource instance. It
//! holds the prior values (what the host last persisted) and the current
//! values (planned values during Create/Update, refreshed values after
//! Read), and offers checked typed projections over both.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::timeouts::{ResourceTimeouts, TIMEOUTS};
use crate::types::Operation;

/// The attribute holding the instance identifier.
pub const ID: &str = "id";

/// Typed access to one resource instance's state.
#[derive(Debug, Clone, Default)]
pub struct ResourceData {
    id: String,
    prior: Map<String, Value>,
    state: Map<String, Value>,
    is_new: bool,
    timeouts: ResourceTimeouts,
}

impl ResourceData {
    /// Accessor over a single attribute map, e.g. the state to refresh or
    /// the planned state of a Create.
    pub fn from_state(state: &Value) -> Result<Self, ProviderError> {
        let state = as_map(state)?;
        Ok(Self {
            id: id_of(&state),
            prior: state.clone(),
            state,
            ..Self::default()
        })
    }

    /// Accessor for an Update: prior values from the persisted state,
    /// current values from the plan.
    pub fn for_update(prior: &Value, planned: &Value) -> Result<Self, ProviderError> {
        let prior = as_map(prior)?;
        let mut state = as_map(planned)?;
        let id = id_of(&prior);
        if !id.is_empty() {
            state.insert(ID.to_string(), Value::String(id.clone()));
        }
        Ok(Self {
            id,
            prior,
            state,
            ..Self::default()
        })
    }

    /// Resolve per-operation timeouts from the kind's defaults and the
    /// user's `timeouts` block.
    pub fn with_timeouts(mut self, defaults: ResourceTimeouts) -> Result<Self, ProviderError> {
        self.timeouts = defaults.with_overrides(self.state.get(TIMEOUTS))?;
        Ok(self)
    }

    /// The identifier; empty until Create sets it or after Read clears it.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record the remote identifier.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
        self.state.insert(ID.to_string(), Value::String(self.id.clone()));
    }

    /// Signal that the remote object is gone and should be dropped from state.
    pub fn clear_id(&mut self) {
        self.id.clear();
        self.state.remove(ID);
    }

    /// Whether the instance was created during this operation.
    pub fn is_new_resource(&self) -> bool {
        self.is_new
    }

    /// Mark the instance as created during this operation.
    pub fn mark_new_resource(&mut self) {
        self.is_new = true;
    }

    /// The budget for `operation`.
    pub fn timeout(&self, operation: Operation) -> Duration {
        self.timeouts.get(operation)
    }

    /// The current value of `key`; null counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key).filter(|v| !v.is_null())
    }

    /// The prior value of `key`; null counts as absent.
    pub fn get_old(&self, key: &str) -> Option<&Value> {
        self.prior.get(key).filter(|v| !v.is_null())
    }

    /// The current value of `key` as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// The current value of `key` as an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// The current value of `key` as a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// The current value of `key`, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ProviderError> {
        self.get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// The current value of a string-map attribute; entries whose value is
    /// not a string are skipped.
    pub fn get_string_map(&self, key: &str) -> BTreeMap<String, String> {
        string_map(self.get(key))
    }

    /// The prior value of a string-map attribute.
    pub fn get_old_string_map(&self, key: &str) -> BTreeMap<String, String> {
        string_map(self.get_old(key))
    }

    /// Prior and current values of `key`.
    pub fn get_change(&self, key: &str) -> (Option<&Value>, Option<&Value>) {
        (self.get_old(key), self.get(key))
    }

    /// Whether `key` differs between prior and current values.
    pub fn has_change(&self, key: &str) -> bool {
        let (old, new) = self.get_change(key);
        old != new
    }

    /// Whether any of `keys` changed.
    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| self.has_change(key))
    }

    /// Every attribute that changed, in name order.
    pub fn changed_keys(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.prior.keys().chain(self.state.keys()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .filter(|k| k.as_str() != ID && self.has_change(k))
            .cloned()
            .collect()
    }

    /// Write a value.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<(), ProviderError> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    /// Write a raw value.
    pub fn set_value(&mut self, key: &str, value: Value) {
        if key == ID {
            match value.as_str() {
                Some(id) => self.set_id(id),
                None => self.clear_id(),
            }
            return;
        }
        self.state.insert(key.to_string(), value);
    }

    /// The current attribute map.
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// The state to hand back to the host; `Value::Null` when the
    /// identifier was cleared.
    pub fn to_state_value(&self) -> Value {
        if self.id.is_empty() {
            return Value::Null;
        }
        Value::Object(self.state.clone())
    }
}

fn as_map(value: &Value) -> Result<Map<String, Value>, ProviderError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(ProviderError::Configuration(format!(
            "expected state to be an object, got {}",
            other
        ))),
    }
}

fn id_of(state: &Map<String, Value>) -> String {
    state
        .get(ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
