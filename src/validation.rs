//! Configuration validation.
//!
//! Checks a `serde_json::Value` configuration against a [`Schema`] before
//! any remote call is made: presence of required attributes, types, field
//! validators, computed-only attributes, nested block cardinality and the
//! cross-attribute groups (conflicts-with, exactly-one-of, at-least-one-of,
//! required-with).
//!
//! # Example
//!
//! ```
//! use hemmer_provider_aws::schema::{Attribute, Schema, Validator};
//! use hemmer_provider_aws::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::optional_string().conflicts_with(&["name_prefix"]))
//!     .with_attribute("name_prefix", Attribute::optional_string())
//!     .with_attribute("size", Attribute::optional_int64().with_validator(Validator::int_between(1, 16)));
//!
//! assert!(validate(&schema, &json!({"name": "web", "size": 4})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "web", "name_prefix": "w-", "size": 64}));
//! assert_eq!(diagnostics.len(), 2);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};

/// Validate a configuration against a schema.
///
/// Returns one diagnostic per problem; an empty list means the
/// configuration is valid.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a configuration, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a configuration is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diagnostic = Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diagnostic
            } else {
                diagnostic.with_attribute(path)
            });
            return;
        }
    };

    let mut names: Vec<&String> = block.attributes.keys().collect();
    names.sort();
    for name in names {
        let attr = &block.attributes[name];
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    validate_groups(&block.attributes, obj, path, diagnostics);

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let value = value.filter(|v| !v.is_null());

    if attr.flags.is_computed_only() {
        if value.is_some() {
            diagnostics.push(
                Diagnostic::error(format!("Value for unconfigurable attribute '{}'", path))
                    .with_detail("This attribute is computed by the provider and cannot be set")
                    .with_attribute(path),
            );
        }
        return;
    }

    let Some(value) = value else {
        if attr.flags.required {
            diagnostics.push(
                Diagnostic::error(format!("Missing required attribute '{}'", path))
                    .with_detail("This attribute is required and must be provided")
                    .with_attribute(path),
            );
        }
        return;
    };

    let before = diagnostics.len();
    validate_attribute_type(&attr.attr_type, value, path, diagnostics);
    if diagnostics.len() > before {
        return;
    }

    for validator in &attr.validators {
        if let Err(message) = validator.validate(value) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(message)
                    .with_attribute(path),
            );
        }
    }
}

fn is_set(obj: &Map<String, Value>, name: &str) -> bool {
    obj.get(name).is_some_and(|v| !v.is_null())
}

fn validate_groups(
    attributes: &BTreeMap<String, Attribute>,
    obj: &Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();

    // Groups are usually declared on every member; report each group once.
    let mut exactly_one: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut at_least_one: BTreeSet<Vec<String>> = BTreeSet::new();

    for name in names {
        let attr = &attributes[name];
        let attr_path = join_path(path, name);

        if is_set(obj, name) {
            for other in &attr.conflicts_with {
                if is_set(obj, other) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "\"{}\": conflicts with {}",
                            attr_path,
                            join_path(path, other)
                        ))
                        .with_attribute(&attr_path),
                    );
                }
            }
            for other in &attr.required_with {
                if !is_set(obj, other) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "\"{}\": all of `{}` must be specified",
                            attr_path,
                            group_list(name, &attr.required_with)
                        ))
                        .with_attribute(&attr_path),
                    );
                    break;
                }
            }
        }

        if !attr.exactly_one_of.is_empty() {
            exactly_one.insert(sorted_group(&attr.exactly_one_of));
        }
        if !attr.at_least_one_of.is_empty() {
            at_least_one.insert(sorted_group(&attr.at_least_one_of));
        }
    }

    for group in exactly_one {
        let count = group.iter().filter(|n| is_set(obj, n)).count();
        if count != 1 {
            let summary = if count == 0 {
                format!("one of `{}` must be specified", group.join(","))
            } else {
                format!("only one of `{}` can be specified", group.join(","))
            };
            diagnostics.push(
                Diagnostic::error(format!("Invalid combination of arguments: {}", summary))
                    .with_attribute(join_path(path, &group[0])),
            );
        }
    }

    for group in at_least_one {
        if !group.iter().any(|n| is_set(obj, n)) {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Missing required argument: one of `{}` must be specified",
                    group.join(",")
                ))
                .with_attribute(join_path(path, &group[0])),
            );
        }
    }
}

fn sorted_group(group: &[String]) -> Vec<String> {
    let mut group = group.to_vec();
    group.sort();
    group.dedup();
    group
}

fn group_list(name: &str, others: &[String]) -> String {
    std::iter::once(name.to_string())
        .chain(others.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            match value.as_array() {
                Some(arr) => {
                    for (i, elem) in arr.iter().enumerate() {
                        let elem_path = format!("{}.{}", path, i);
                        validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                    }
                }
                None => diagnostics.push(type_error(path, "list", value)),
            }
        }
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            }
            None => diagnostics.push(type_error(path, "map", value)),
        },
        AttributeType::Object(attrs) => match value.as_object() {
            Some(obj) => {
                for (name, attr_type) in attrs {
                    if let Some(value) = obj.get(name) {
                        validate_attribute_type(attr_type, value, &join_path(path, name), diagnostics);
                    }
                }
            }
            None => diagnostics.push(type_error(path, "object", value)),
        },
        AttributeType::Dynamic => {}
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: Vec<&Value> = match (nested.nesting_mode, value) {
        (_, None | Some(Value::Null)) => Vec::new(),
        (BlockNestingMode::Single, Some(v)) => vec![v],
        (BlockNestingMode::List | BlockNestingMode::Set, Some(Value::Array(arr))) => {
            arr.iter().collect()
        }
        (_, Some(v)) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
            return;
        }
    };

    let len = items.len() as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }

    for (i, item) in items.into_iter().enumerate() {
        let item_path = match nested.nesting_mode {
            BlockNestingMode::Single => path.to_string(),
            _ => format!("{}.{}", path, i),
        };
        validate_block(&nested.block, item, &item_path, diagnostics);
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.as_i64().is_some(),
        Value::Number(n) => n
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema, Validator};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "test"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        assert_eq!(validate(&schema, &json!({"name": null})).len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("count", Attribute::optional_int64());

        assert!(validate(&schema, &json!({"count": 42})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"count": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"count": "not a number"})).len(), 1);
        assert!(validate(&schema, &json!({"count": 42.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"count": 42.5})).len(), 1);
    }

    #[test]
    fn test_computed_only_attribute_cannot_be_set() {
        let schema = Schema::v0()
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("name", Attribute::optional_computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"arn": null, "name": "x"})).is_empty());

        let diagnostics = validate(&schema, &json!({"arn": "arn:aws:sqs:us-east-1:123:q"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("unconfigurable attribute 'arn'"));
    }

    #[test]
    fn test_field_validators() {
        let schema = Schema::v0()
            .with_attribute(
                "volume_type",
                Attribute::optional_string()
                    .with_validator(Validator::string_in_slice(&["gp2", "gp3", "io1"])),
            )
            .with_attribute(
                "iops",
                Attribute::optional_int64().with_validator(Validator::int_between(100, 64000)),
            );

        assert!(validate(&schema, &json!({"volume_type": "gp3", "iops": 3000})).is_empty());

        let diagnostics = validate(&schema, &json!({"volume_type": "st9", "iops": 10}));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("iops"));
        assert_eq!(
            diagnostics[0].detail.as_deref(),
            Some("expected to be in the range (100 - 64000), got 10")
        );
        assert_eq!(diagnostics[1].attribute.as_deref(), Some("volume_type"));

        // Type errors suppress validator output for the same attribute.
        assert_eq!(validate(&schema, &json!({"iops": "many"})).len(), 1);
    }

    #[test]
    fn test_conflicts_with() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::optional_string().conflicts_with(&["name_prefix"]))
            .with_attribute("name_prefix", Attribute::optional_string().conflicts_with(&["name"]));

        assert!(validate(&schema, &json!({"name": "a"})).is_empty());
        assert!(validate(&schema, &json!({"name_prefix": "a"})).is_empty());
        assert!(validate(&schema, &json!({"name": "a", "name_prefix": null})).is_empty());

        let diagnostics = validate(&schema, &json!({"name": "a", "name_prefix": "b"}));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].summary, "\"name\": conflicts with name_prefix");
    }

    #[test]
    fn test_exactly_one_of() {
        let group = ["cidr_block", "ipv6_cidr_block"];
        let schema = Schema::v0()
            .with_attribute("cidr_block", Attribute::optional_string().exactly_one_of(&group))
            .with_attribute("ipv6_cidr_block", Attribute::optional_string().exactly_one_of(&group));

        assert!(validate(&schema, &json!({"cidr_block": "10.0.0.0/16"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("one of `cidr_block,ipv6_cidr_block` must be specified"));

        let diagnostics = validate(
            &schema,
            &json!({"cidr_block": "10.0.0.0/16", "ipv6_cidr_block": "::/56"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("only one of"));
    }

    #[test]
    fn test_at_least_one_of_and_required_with() {
        let schema = Schema::v0()
            .with_attribute(
                "retention_days",
                Attribute::optional_int64().at_least_one_of(&["retention_days", "kms_key_id"]),
            )
            .with_attribute("kms_key_id", Attribute::optional_string())
            .with_attribute(
                "kms_key_region",
                Attribute::optional_string().required_with(&["kms_key_id"]),
            );

        assert!(validate(&schema, &json!({"kms_key_id": "k"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.starts_with("Missing required argument"));

        let diagnostics = validate(&schema, &json!({"retention_days": 7, "kms_key_region": "us-east-1"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].summary,
            "\"kms_key_region\": all of `kms_key_region,kms_key_id` must be specified"
        );
    }

    #[test]
    fn test_validate_collections() {
        let schema = Schema::v0()
            .with_attribute(
                "subnet_ids",
                Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::required()),
            )
            .with_attribute(
                "tags",
                Attribute::optional_string_map()
                    .with_validator(Validator::MapKeyLenBetween { min: 1, max: 128 }),
            );

        assert!(validate(&schema, &json!({"subnet_ids": ["a", "b"], "tags": {"env": "prod"}})).is_empty());

        let diagnostics = validate(&schema, &json!({"subnet_ids": ["a", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("subnet_ids.1"));

        let diagnostics = validate(&schema, &json!({"subnet_ids": [], "tags": {"env": 1}}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("tags.env"));

        let diagnostics = validate(&schema, &json!({"subnet_ids": [], "tags": {"": "x"}}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid value"));
    }

    #[test]
    fn test_validate_nested_blocks() {
        let schema = Schema::v0()
            .with_block(
                "timeouts",
                NestedBlock::single(Block::new().with_attribute("create", Attribute::optional_string())),
            )
            .with_block(
                "ingress",
                NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64()))
                    .with_min_items(1)
                    .with_max_items(2),
            );

        assert!(validate(&schema, &json!({"ingress": [{"port": 80}]})).is_empty());

        let diagnostics = validate(&schema, &json!({"timeouts": {"create": 5}, "ingress": [{"port": 80}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("timeouts.create"));

        let diagnostics = validate(&schema, &json!({}));
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(&schema, &json!({"ingress": [{"port": 1}, {"port": 2}, {"port": 3}]}));
        assert!(diagnostics[0].summary.contains("at most 2"));

        let diagnostics = validate(&schema, &json!({"ingress": [{"port": "eighty"}]}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("ingress.0.port"));

        let diagnostics = validate(&schema, &json!({"ingress": "port 80"}));
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_validate_result_helpers() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(!is_valid(&schema, &json!({})));
        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
        assert!(diagnostics[0].attribute.is_none());
    }
}
