//! Per-service wire shapes for tags.
//!
//! Services disagree on how tags travel: a list of `{Key, Value}` objects,
//! a plain map, or a list with lowercase field names. The conversion is one
//! logical contract selected by service id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::KeyValueTags;
use crate::error::ProviderError;

/// One tag in the common `{Key, Value}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// The key.
    pub key: String,
    /// The value.
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LowercaseTag {
    key: String,
    #[serde(default)]
    value: String,
}

/// How a service represents tags on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagShape {
    /// `[{"Key": k, "Value": v}, ...]`
    KeyValueList,
    /// `{"k": "v", ...}`
    Map,
    /// `[{"key": k, "value": v}, ...]`
    LowercaseKeyValueList,
}

const SERVICE_SHAPES: &[(&str, TagShape)] = &[
    ("autoscaling", TagShape::KeyValueList),
    ("cloudformation", TagShape::KeyValueList),
    ("ec2", TagShape::KeyValueList),
    ("elbv2", TagShape::KeyValueList),
    ("iam", TagShape::KeyValueList),
    ("kms", TagShape::KeyValueList),
    ("rds", TagShape::KeyValueList),
    ("s3", TagShape::KeyValueList),
    ("apigateway", TagShape::Map),
    ("eks", TagShape::Map),
    ("lambda", TagShape::Map),
    ("sqs", TagShape::Map),
    ("ecr", TagShape::KeyValueList),
    ("ecs", TagShape::LowercaseKeyValueList),
];

/// The tag shape used by `service`.
pub fn service_shape(service: &str) -> Option<TagShape> {
    SERVICE_SHAPES
        .iter()
        .find(|(id, _)| *id == service)
        .map(|(_, shape)| *shape)
}

fn unknown_service(service: &str) -> ProviderError {
    ProviderError::Configuration(format!("no tag shape registered for service '{}'", service))
}

/// Convert tags into the representation `service` expects.
pub fn to_service_shape(tags: &KeyValueTags, service: &str) -> Result<Value, ProviderError> {
    let shape = service_shape(service).ok_or_else(|| unknown_service(service))?;
    let value = match shape {
        TagShape::Map => tags.to_value(),
        TagShape::KeyValueList => serde_json::to_value(
            tags.iter()
                .map(|(k, v)| Tag {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect::<Vec<_>>(),
        )?,
        TagShape::LowercaseKeyValueList => serde_json::to_value(
            tags.iter()
                .map(|(k, v)| LowercaseTag {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect::<Vec<_>>(),
        )?,
    };
    Ok(value)
}

/// Convert a service's tag representation back into a tag set.
pub fn from_service_shape(value: &Value, service: &str) -> Result<KeyValueTags, ProviderError> {
    if value.is_null() {
        return Ok(KeyValueTags::new());
    }
    let shape = service_shape(service).ok_or_else(|| unknown_service(service))?;
    let tags = match shape {
        TagShape::Map => KeyValueTags::from_value(Some(value)),
        TagShape::KeyValueList => serde_json::from_value::<Vec<Tag>>(value.clone())?
            .into_iter()
            .map(|t| (t.key, t.value))
            .collect(),
        TagShape::LowercaseKeyValueList => {
            serde_json::from_value::<Vec<LowercaseTag>>(value.clone())?
                .into_iter()
                .map(|t| (t.key, t.value))
                .collect()
        }
    };
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> KeyValueTags {
        [("Name", "web"), ("env", "prod")].into_iter().collect()
    }

    #[test]
    fn test_shapes() {
        assert_eq!(
            to_service_shape(&sample(), "ec2").unwrap(),
            json!([{"Key": "Name", "Value": "web"}, {"Key": "env", "Value": "prod"}])
        );
        assert_eq!(
            to_service_shape(&sample(), "lambda").unwrap(),
            json!({"Name": "web", "env": "prod"})
        );
        assert_eq!(
            to_service_shape(&sample(), "ecs").unwrap(),
            json!([{"key": "Name", "value": "web"}, {"key": "env", "value": "prod"}])
        );
        assert!(to_service_shape(&sample(), "nosuchservice").is_err());
    }

    #[test]
    fn test_from_service_shape() {
        for service in ["ec2", "sqs", "ecs"] {
            let wire = to_service_shape(&sample(), service).unwrap();
            assert_eq!(from_service_shape(&wire, service).unwrap(), sample(), "{service}");
        }
        let tags = from_service_shape(&json!([{"Key": "empty"}]), "s3").unwrap();
        assert_eq!(tags.get("empty"), Some(""));
        assert!(from_service_shape(&Value::Null, "s3").unwrap().is_empty());
        assert!(from_service_shape(&json!({"a": "b"}), "ec2").is_err());
    }
}
