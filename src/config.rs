//! Provider configuration.
//!
//! The host passes the provider block as JSON. [`ProviderConfig`] is its
//! typed form; region and credentials that are not configured explicitly
//! come from the standard environment variables.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator};
use crate::tags::{IgnoreConfig, KeyValueTags, TagConfig};

/// Region variables, in lookup order.
pub const REGION_ENV_VARS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

/// Variables read by the credential provider chain.
pub const CREDENTIAL_ENV_VARS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_PROFILE",
    "AWS_SHARED_CREDENTIALS_FILE",
    "AWS_CONFIG_FILE",
    "AWS_ROLE_ARN",
    "AWS_WEB_IDENTITY_TOKEN_FILE",
    "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
    "AWS_CONTAINER_CREDENTIALS_FULL_URI",
    "AWS_EC2_METADATA_DISABLED",
];

/// The `default_tags` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTagsConfig {
    /// Tags applied to every taggable resource.
    #[serde(default)]
    pub tags: KeyValueTags,
}

/// The provider configuration block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Region to manage resources in.
    pub region: Option<String>,
    /// Named profile from the shared config files.
    pub profile: Option<String>,
    /// Account ID, skipping the caller-identity lookup.
    pub account_id: Option<String>,
    /// Partition override; derived from the region otherwise.
    pub partition: Option<String>,
    /// Accounts the provider may operate in.
    pub allowed_account_ids: Vec<String>,
    /// Accounts the provider must refuse.
    pub forbidden_account_ids: Vec<String>,
    /// Provider-wide default tags.
    pub default_tags: Option<DefaultTagsConfig>,
    /// Tag keys excluded from management.
    pub ignore_tags: Option<IgnoreConfig>,
    /// Retry budget handed to the SDK client.
    pub max_retries: Option<u32>,
    /// Skip the caller-identity call during configure.
    pub skip_credentials_validation: bool,
}

impl ProviderConfig {
    /// Parse the configuration block; null means "all defaults".
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| {
                ProviderError::Configuration(format!("invalid provider configuration: {}", e))
            })
    }

    /// The configured region, falling back to the environment.
    pub fn resolve_region(&self) -> Result<String, ProviderError> {
        self.resolve_region_with(|name| std::env::var(name).ok())
    }

    /// [`ProviderConfig::resolve_region`] over an arbitrary variable lookup.
    pub fn resolve_region_with<F>(&self, lookup: F) -> Result<String, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.region
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| {
                REGION_ENV_VARS
                    .iter()
                    .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
            })
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "no region configured: set `region` or one of {}",
                    REGION_ENV_VARS.join(", ")
                ))
            })
    }

    /// The partition for `region`, unless overridden.
    pub fn resolve_partition(&self, region: &str) -> String {
        self.partition
            .clone()
            .unwrap_or_else(|| partition_for_region(region).to_string())
    }

    /// Defaults and ignore rules for the tag engine.
    pub fn tag_config(&self) -> TagConfig {
        TagConfig {
            default_tags: self
                .default_tags
                .as_ref()
                .map(|d| d.tags.clone())
                .unwrap_or_default(),
            ignore: self.ignore_tags.clone().unwrap_or_default(),
        }
    }

    /// Refuse accounts outside `allowed_account_ids` or inside
    /// `forbidden_account_ids`.
    pub fn validate_account(&self, account_id: &str) -> Result<(), ProviderError> {
        if self.forbidden_account_ids.iter().any(|a| a == account_id) {
            return Err(ProviderError::Configuration(format!(
                "AWS account ID not allowed: {}",
                account_id
            )));
        }
        if !self.allowed_account_ids.is_empty()
            && !self.allowed_account_ids.iter().any(|a| a == account_id)
        {
            return Err(ProviderError::Configuration(format!(
                "AWS account ID not allowed: {}",
                account_id
            )));
        }
        Ok(())
    }
}

/// Names of the credential variables that are set. Values are never read.
pub fn consulted_credential_env_vars() -> Vec<&'static str> {
    consulted_credential_env_vars_with(|name| std::env::var_os(name).is_some())
}

/// [`consulted_credential_env_vars`] over an arbitrary presence check.
pub fn consulted_credential_env_vars_with<F>(is_set: F) -> Vec<&'static str>
where
    F: Fn(&str) -> bool,
{
    CREDENTIAL_ENV_VARS
        .iter()
        .copied()
        .filter(|name| is_set(name))
        .collect()
}

/// The partition a region belongs to.
pub fn partition_for_region(region: &str) -> &'static str {
    const PREFIXES: &[(&str, &str)] = &[
        ("cn-", "aws-cn"),
        ("us-gov-", "aws-us-gov"),
        ("us-isob-", "aws-iso-b"),
        ("us-iso-", "aws-iso"),
        ("eu-isoe-", "aws-iso-e"),
        ("us-isof-", "aws-iso-f"),
    ];
    PREFIXES
        .iter()
        .find(|(prefix, _)| region.starts_with(prefix))
        .map(|(_, partition)| *partition)
        .unwrap_or("aws")
}

fn string_set() -> Attribute {
    Attribute::new(
        AttributeType::set(AttributeType::String),
        AttributeFlags::optional(),
    )
}

/// The schema of the provider block.
pub fn provider_config_schema() -> Schema {
    let account_id = Validator::string_match(r"^\d{12}$", "must be a 12-digit AWS account ID");
    Schema::v0()
        .with_attribute(
            "region",
            Attribute::optional_string().with_description(
                "The region where AWS operations will take place. Falls back to AWS_REGION.",
            ),
        )
        .with_attribute("profile", Attribute::optional_string())
        .with_attribute(
            "account_id",
            Attribute::optional_string().with_validator(account_id),
        )
        .with_attribute(
            "partition",
            Attribute::optional_string().with_validator(Validator::string_in_slice(&[
                "aws",
                "aws-cn",
                "aws-us-gov",
                "aws-iso",
                "aws-iso-b",
                "aws-iso-e",
                "aws-iso-f",
            ])),
        )
        .with_attribute(
            "allowed_account_ids",
            string_set()
            .conflicts_with(&["forbidden_account_ids"]),
        )
        .with_attribute("forbidden_account_ids", string_set())
        .with_attribute(
            "max_retries",
            Attribute::optional_int64().with_validator(Validator::int_between(0, 100)),
        )
        .with_attribute("skip_credentials_validation", Attribute::optional_bool())
        .with_block(
            "default_tags",
            NestedBlock::single(
                Block::new().with_attribute("tags", crate::tags::tags_attribute()),
            ),
        )
        .with_block(
            "ignore_tags",
            NestedBlock::single(
                Block::new()
                    .with_attribute("keys", string_set())
                    .with_attribute("key_prefixes", string_set()),
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let config = ProviderConfig::from_value(&json!({
            "region": "eu-west-1",
            "default_tags": {"tags": {"team": "infra"}},
            "ignore_tags": {"key_prefixes": ["internal:"]},
            "skip_credentials_validation": true
        }))
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.skip_credentials_validation);

        let tags = config.tag_config();
        assert_eq!(tags.default_tags.get("team"), Some("infra"));
        assert!(tags.ignore.is_ignored("internal:x"));

        assert_eq!(
            ProviderConfig::from_value(&Value::Null).unwrap(),
            ProviderConfig::default()
        );
        assert!(ProviderConfig::from_value(&json!({"region": 5})).is_err());
    }

    #[test]
    fn test_region_fallback() {
        let env = |name: &str| match name {
            "AWS_DEFAULT_REGION" => Some("us-west-2".to_string()),
            _ => None,
        };
        let config = ProviderConfig::default();
        assert_eq!(config.resolve_region_with(env).unwrap(), "us-west-2");

        let both = |name: &str| match name {
            "AWS_REGION" => Some("eu-central-1".to_string()),
            "AWS_DEFAULT_REGION" => Some("us-west-2".to_string()),
            _ => None,
        };
        assert_eq!(config.resolve_region_with(both).unwrap(), "eu-central-1");

        let explicit = ProviderConfig {
            region: Some("ap-south-1".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(explicit.resolve_region_with(both).unwrap(), "ap-south-1");

        assert!(config.resolve_region_with(|_| None).is_err());
    }

    #[test]
    fn test_partitions() {
        assert_eq!(partition_for_region("us-east-1"), "aws");
        assert_eq!(partition_for_region("cn-north-1"), "aws-cn");
        assert_eq!(partition_for_region("us-gov-west-1"), "aws-us-gov");
        assert_eq!(partition_for_region("us-iso-east-1"), "aws-iso");
        assert_eq!(partition_for_region("us-isob-east-1"), "aws-iso-b");

        let config = ProviderConfig {
            partition: Some("aws-cn".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(config.resolve_partition("us-east-1"), "aws-cn");
    }

    #[test]
    fn test_validate_account() {
        let config = ProviderConfig {
            allowed_account_ids: vec!["111111111111".to_string()],
            ..ProviderConfig::default()
        };
        assert!(config.validate_account("111111111111").is_ok());
        assert!(config.validate_account("222222222222").is_err());

        let config = ProviderConfig {
            forbidden_account_ids: vec!["222222222222".to_string()],
            ..ProviderConfig::default()
        };
        assert!(config.validate_account("111111111111").is_ok());
        assert!(config.validate_account("222222222222").is_err());
    }

    #[test]
    fn test_consulted_credential_env_vars() {
        let present = consulted_credential_env_vars_with(|name| {
            matches!(name, "AWS_PROFILE" | "AWS_ACCESS_KEY_ID")
        });
        assert_eq!(present, vec!["AWS_ACCESS_KEY_ID", "AWS_PROFILE"]);
    }

    #[test]
    fn test_provider_config_schema() {
        let schema = provider_config_schema();
        let ok = json!({"region": "us-east-1", "account_id": "123456789012"});
        assert!(validate(&schema, &ok).is_empty());
        assert_eq!(validate(&schema, &json!({"account_id": "12345"})).len(), 1);
        assert_eq!(
            validate(&schema, &json!({"default_tags": {"tags": {"": "x"}}})).len(),
            1
        );
    }
}
