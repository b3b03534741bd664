//! Resource name generation.
//!
//! Resources with a `name` attribute usually also accept `name_prefix`;
//! when neither is set the provider generates a unique name.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::schema::Attribute;

/// The `name` attribute.
pub const NAME: &str = "name";
/// The `name_prefix` attribute.
pub const NAME_PREFIX: &str = "name_prefix";
/// Prefix for names generated with neither `name` nor `name_prefix`.
pub const UNIQUE_ID_PREFIX: &str = "terraform-";

/// Length of the suffix [`prefixed_unique_id`] appends.
pub const UNIQUE_ID_SUFFIX_LENGTH: usize = 14 + 8;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// `prefix` followed by a UTC timestamp and a process-wide counter.
///
/// Names generated in one process are unique and sort in creation order.
pub fn prefixed_unique_id(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    format!("{}{}{:08x}", prefix, Utc::now().format("%Y%m%d%H%M%S"), n)
}

/// A unique name with the default prefix.
pub fn unique_id() -> String {
    prefixed_unique_id(UNIQUE_ID_PREFIX)
}

/// The name to create with: `name` if set, else a unique name from
/// `name_prefix`, else a unique name with the default prefix.
pub fn generate(name: Option<&str>, name_prefix: Option<&str>) -> String {
    match (name.filter(|n| !n.is_empty()), name_prefix) {
        (Some(name), _) => name.to_string(),
        (None, Some(prefix)) => prefixed_unique_id(prefix),
        (None, None) => unique_id(),
    }
}

/// The prefix a stored name was generated from, if it was.
pub fn prefix_from_name(name: &str) -> Option<&str> {
    if name.len() < UNIQUE_ID_SUFFIX_LENGTH {
        return None;
    }
    let split = name.len() - UNIQUE_ID_SUFFIX_LENGTH;
    let suffix = name.get(split..)?;
    if !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    name.get(..split)
}

/// The `name` attribute schema: optional, computed, forces replacement,
/// conflicts with `name_prefix`.
pub fn name_attribute() -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .conflicts_with(&[NAME_PREFIX])
}

/// The `name_prefix` attribute schema.
pub fn name_prefix_attribute() -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .conflicts_with(&[NAME])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_unique_id() {
        let a = prefixed_unique_id("web-");
        let b = prefixed_unique_id("web-");
        assert_ne!(a, b);
        assert!(a.starts_with("web-"));
        assert_eq!(a.len(), "web-".len() + UNIQUE_ID_SUFFIX_LENGTH);
        assert_eq!(prefix_from_name(&a), Some("web-"));
    }

    #[test]
    fn test_generate() {
        assert_eq!(generate(Some("fixed"), None), "fixed");
        assert_eq!(generate(Some("fixed"), Some("ignored-")), "fixed");
        assert!(generate(None, Some("pre-")).starts_with("pre-"));
        assert!(generate(Some(""), None).starts_with(UNIQUE_ID_PREFIX));
    }

    #[test]
    fn test_prefix_from_name() {
        assert_eq!(prefix_from_name("short"), None);
        assert_eq!(prefix_from_name("my-bucket-that-was-named-by-hand"), None);
        assert_eq!(prefix_from_name("x2024010203040500000001"), Some("x"));
    }

    #[test]
    fn test_name_attributes_conflict() {
        assert_eq!(name_attribute().conflicts_with, vec![NAME_PREFIX]);
        assert!(name_prefix_attribute().force_new);
    }
}
