//! Applying a tag diff through a service's tag/untag calls.

use async_trait::async_trait;
use tracing::debug;

use super::{IgnoreConfig, KeyValueTags, TagDiff};
use crate::error::{MultiError, ProviderError};

/// The tag mutation calls of one service.
#[async_trait]
pub trait TagClient: Send + Sync {
    /// Most tags or keys one call accepts.
    fn max_tags_per_call(&self) -> usize {
        50
    }

    /// Add or overwrite `tags` on the object named by `identifier`.
    async fn tag_resource(&self, identifier: &str, tags: &KeyValueTags)
        -> Result<(), ProviderError>;

    /// Remove `keys` from the object named by `identifier`.
    async fn untag_resource(&self, identifier: &str, keys: &[String]) -> Result<(), ProviderError>;
}

/// Move the remote tags of `identifier` from `old` to `new`.
///
/// Removals are issued before additions so a key can move between case
/// variants. Every chunk is attempted; failures are aggregated.
pub async fn update_tags<C: TagClient + ?Sized>(
    client: &C,
    identifier: &str,
    old: &KeyValueTags,
    new: &KeyValueTags,
    ignore: &IgnoreConfig,
) -> Result<(), ProviderError> {
    let diff = TagDiff::compute(old, new, ignore);
    if diff.is_empty() {
        return Ok(());
    }

    let limit = client.max_tags_per_call().max(1);
    let mut errors = MultiError::new();

    for keys in diff.remove.chunks(limit) {
        debug!(identifier, ?keys, "untagging resource");
        if let Err(e) = client.untag_resource(identifier, keys).await {
            errors.push(e);
        }
    }

    for chunk in diff.add.chunks(limit) {
        debug!(identifier, count = chunk.len(), "tagging resource");
        if let Err(e) = client.tag_resource(identifier, &chunk).await {
            errors.push(e);
        }
    }

    errors.into_result()
}
