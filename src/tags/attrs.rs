//! The `tags`/`tags_all` attribute pair and its handler glue.

use super::{update_tags, KeyValueTags, TagClient, TagConfig};
use crate::data::ResourceData;
use crate::error::ProviderError;
use crate::schema::{Attribute, Validator};

/// User-authored tags.
pub const TAGS: &str = "tags";
/// Effective tags: defaults merged with `tags`, ignored keys removed.
pub const TAGS_ALL: &str = "tags_all";

/// The schema of `tags`.
pub fn tags_attribute() -> Attribute {
    Attribute::optional_string_map()
        .with_description("A map of tags to assign to the resource")
        .with_validator(Validator::MapKeyLenBetween { min: 1, max: 128 })
        .with_validator(Validator::MapValueLenBetween { min: 0, max: 256 })
}

/// The schema of `tags_all`.
pub fn tags_all_attribute() -> Attribute {
    Attribute::computed_string_map()
        .with_description("A map of tags assigned to the resource, including provider default tags")
}

impl TagConfig {
    /// The tags to send with a Create call.
    pub fn tags_for_create(&self, data: &ResourceData) -> KeyValueTags {
        self.effective(&KeyValueTags::from_value(data.get(TAGS)))
    }

    /// Record tags read from the remote: `tags_all` as seen, `tags` minus
    /// provider defaults.
    pub fn set_tags_out(
        &self,
        data: &mut ResourceData,
        remote: &KeyValueTags,
    ) -> Result<(), ProviderError> {
        let (user, all) = self.from_remote(remote);
        data.set(TAGS, user)?;
        data.set(TAGS_ALL, all)?;
        Ok(())
    }

    /// Push a change of `tags_all` to the remote during Update.
    pub async fn update_from_data<C: TagClient + ?Sized>(
        &self,
        client: &C,
        identifier: &str,
        data: &ResourceData,
    ) -> Result<(), ProviderError> {
        let old = KeyValueTags::from_value(data.get_old(TAGS_ALL));
        let new = self.effective(&KeyValueTags::from_value(data.get(TAGS)));
        update_tags(client, identifier, &old, &new, &self.ignore).await
    }
}
