//! Tag reconciliation.
//!
//! One model for key/value labels across every service: [`KeyValueTags`]
//! is a value type with the set operations resources need, [`TagConfig`]
//! carries the provider-level defaults and ignore rules, and [`TagDiff`] is
//! the minimal add/remove set applied by [`update_tags`].
//!
//! Tagged resources expose two attributes. `tags` is what the user wrote;
//! `tags_all` is computed, the user's tags merged over provider defaults
//! with ignored keys removed.

mod attrs;
mod shape;
mod update;

pub use attrs::{tags_all_attribute, tags_attribute, TAGS, TAGS_ALL};
pub use shape::{from_service_shape, service_shape, to_service_shape, Tag, TagShape};
pub use update::{update_tags, TagClient};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key prefix reserved by the cloud for tags it manages itself.
pub const CLOUD_MANAGED_PREFIX: &str = "aws:";

/// An unordered set of unique, case-sensitive tag keys with string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyValueTags(BTreeMap<String, String>);

impl KeyValueTags {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize a user-provided map. Null values are dropped, scalars
    /// are stringified and keys are kept verbatim.
    pub fn from_user(map: &Map<String, Value>) -> Self {
        map.iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    Value::Bool(_) | Value::Number(_) => v.to_string(),
                    _ => return None,
                };
                Some((k.clone(), value))
            })
            .collect()
    }

    /// [`KeyValueTags::from_user`] over an optional attribute value.
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_object)
            .map(Self::from_user)
            .unwrap_or_default()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Add or replace one tag.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Union with `user` where keys present in both take the user value.
    /// `self` holds the defaults.
    pub fn merge(&self, user: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(user.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Remove exact-match keys.
    pub fn ignore_keys<S: AsRef<str>>(&self, keys: &[S]) -> Self {
        self.retain(|k| !keys.iter().any(|i| i.as_ref() == k))
    }

    /// Remove keys starting with any of `prefixes`.
    pub fn ignore_prefixes<S: AsRef<str>>(&self, prefixes: &[S]) -> Self {
        self.retain(|k| !prefixes.iter().any(|p| k.starts_with(p.as_ref())))
    }

    /// Remove keys in the cloud-reserved namespace.
    pub fn ignore_cloud_managed(&self) -> Self {
        self.ignore_prefixes(&[CLOUD_MANAGED_PREFIX])
    }

    /// Remove everything `ignore` names.
    pub fn ignore_config(&self, ignore: &IgnoreConfig) -> Self {
        self.retain(|k| !ignore.is_ignored(k))
    }

    /// Remove tags whose key and value both match a default. Used on read
    /// to recover the user's own `tags` from `tags_all`.
    pub fn remove_defaults(&self, defaults: &Self) -> Self {
        self.retain_pairs(|k, v| defaults.get(k) != Some(v))
    }

    /// The minimal mutation that turns `self` into `new`.
    pub fn diff(&self, new: &Self) -> TagDiff {
        let add = new.retain_pairs(|k, v| self.get(k) != Some(v));
        let remove = self
            .keys()
            .filter(|k| new.get(k).is_none())
            .map(str::to_string)
            .collect();
        TagDiff { add, remove }
    }

    /// Split into sets of at most `size` tags, for APIs with a per-call limit.
    pub fn chunks(&self, size: usize) -> Vec<Self> {
        let size = size.max(1);
        let pairs: Vec<(&String, &String)> = self.0.iter().collect();
        pairs
            .chunks(size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|(k, v)| ((*k).clone(), (*v).clone()))
                    .collect()
            })
            .collect()
    }

    /// The attribute value for `tags`/`tags_all`.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// The underlying map.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    fn retain<F: Fn(&str) -> bool>(&self, keep: F) -> Self {
        self.retain_pairs(|k, _| keep(k))
    }

    fn retain_pairs<F: Fn(&str, &str) -> bool>(&self, keep: F) -> Self {
        self.0
            .iter()
            .filter(|(k, v)| keep(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValueTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for KeyValueTags {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Keys the provider must never manage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Exact keys.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Key prefixes.
    #[serde(default)]
    pub key_prefixes: Vec<String>,
}

impl IgnoreConfig {
    /// Whether `key` is ignored.
    pub fn is_ignored(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key) || self.key_prefixes.iter().any(|p| key.starts_with(p))
    }
}

/// Provider-level tag defaults and ignore rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagConfig {
    /// Tags applied to every taggable resource.
    pub default_tags: KeyValueTags,
    /// Keys excluded from management.
    pub ignore: IgnoreConfig,
}

impl TagConfig {
    /// Effective tags: defaults merged with `user`, ignored keys removed.
    pub fn effective(&self, user: &KeyValueTags) -> KeyValueTags {
        self.default_tags.merge(user).ignore_config(&self.ignore)
    }

    /// Split tags read from the remote into `(tags, tags_all)`.
    pub fn from_remote(&self, remote: &KeyValueTags) -> (KeyValueTags, KeyValueTags) {
        let all = remote.ignore_cloud_managed().ignore_config(&self.ignore);
        let user = all.remove_defaults(&self.default_tags);
        (user, all)
    }
}

/// Tags to add or replace, and keys to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Tags to add or overwrite.
    pub add: KeyValueTags,
    /// Keys to remove.
    pub remove: Vec<String>,
}

impl TagDiff {
    /// The diff from `old` to `new`. Keys matched by `ignore` never appear
    /// on either side, whatever the remote holds.
    pub fn compute(old: &KeyValueTags, new: &KeyValueTags, ignore: &IgnoreConfig) -> Self {
        old.ignore_config(ignore)
            .ignore_cloud_managed()
            .diff(&new.ignore_config(ignore).ignore_cloud_managed())
    }

    /// Whether nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}
