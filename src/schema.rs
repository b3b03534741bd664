//! Schema types for describing provider and resource structure.
//!
//! Schemas describe the shape of provider configuration and resources.
//! Besides types and flags, attributes carry the validators, diff
//! suppression and cross-attribute constraints that [`crate::validation`]
//! enforces and the plan surface applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 text.
    String,
    /// Whole number.
    Int64,
    /// Floating point number.
    Float64,
    /// `true` or `false`.
    Bool,
    /// Ordered elements.
    List(Box<AttributeType>),
    /// Unordered, unique elements.
    Set(Box<AttributeType>),
    /// String keys to elements.
    Map(Box<AttributeType>),
    /// Fixed named fields.
    Object(BTreeMap<String, AttributeType>),
    /// Anything; not type checked.
    Dynamic,
}

impl AttributeType {
    /// `list(element_type)`.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// `set(element_type)`.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// `map(element_type)`.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// An object with the given field types.
    pub fn object(attributes: BTreeMap<String, AttributeType>) -> Self {
        Self::Object(attributes)
    }
}

/// Who may write an attribute: the user (required/optional), the
/// provider (computed), or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must be set in configuration.
    pub required: bool,
    /// May be set in configuration.
    pub optional: bool,
    /// Filled in by the provider when not configured.
    pub computed: bool,
    /// Masked in logs and plan output.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Required.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Optional.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Computed only; the user cannot set it.
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Optional, with the provider's value kept when unset.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Also sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Whether the user may write this attribute.
    pub fn is_user_settable(&self) -> bool {
        self.required || self.optional
    }

    /// Whether only the provider writes this attribute.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.required && !self.optional
    }
}

/// A field validator, applied to configured values before any remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// String length (in characters) within `[min, max]`.
    StringLenBetween {
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },
    /// String equal to one of `values`.
    StringInSlice {
        /// Accepted values.
        values: Vec<String>,
        /// Compare ignoring ASCII case.
        #[serde(default)]
        ignore_case: bool,
    },
    /// Integer within `[min, max]`.
    IntBetween {
        /// Minimum value.
        min: i64,
        /// Maximum value.
        max: i64,
    },
    /// String matching a regular expression.
    StringMatch {
        /// The pattern.
        pattern: String,
        /// Message shown when the value does not match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Every map key has a length within `[min, max]`.
    MapKeyLenBetween {
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },
    /// Every map value has a length within `[min, max]`.
    MapValueLenBetween {
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },
}

impl Validator {
    /// String length between `min` and `max`.
    pub fn string_len_between(min: usize, max: usize) -> Self {
        Self::StringLenBetween { min, max }
    }

    /// String in the given set, compared exactly.
    pub fn string_in_slice(values: &[&str]) -> Self {
        Self::StringInSlice {
            values: values.iter().map(|v| v.to_string()).collect(),
            ignore_case: false,
        }
    }

    /// Integer between `min` and `max`.
    pub fn int_between(min: i64, max: i64) -> Self {
        Self::IntBetween { min, max }
    }

    /// String matching `pattern`.
    pub fn string_match(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StringMatch {
            pattern: pattern.into(),
            message: Some(message.into()),
        }
    }

    /// Check a configured value. Null values are never validated.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Self::StringLenBetween { min, max } => {
                let s = expect_str(value)?;
                let len = s.chars().count();
                if len < *min || len > *max {
                    return Err(format!(
                        "expected length to be in the range ({} - {}), got {}",
                        min, max, len
                    ));
                }
            }
            Self::StringInSlice {
                values,
                ignore_case,
            } => {
                let s = expect_str(value)?;
                let found = values.iter().any(|v| {
                    if *ignore_case {
                        v.eq_ignore_ascii_case(s)
                    } else {
                        v == s
                    }
                });
                if !found {
                    return Err(format!("expected to be one of {:?}, got {}", values, s));
                }
            }
            Self::IntBetween { min, max } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| "expected type to be integer".to_string())?;
                if n < *min || n > *max {
                    return Err(format!(
                        "expected to be in the range ({} - {}), got {}",
                        min, max, n
                    ));
                }
            }
            Self::StringMatch { pattern, message } => {
                let s = expect_str(value)?;
                let re = regex::Regex::new(pattern)
                    .map_err(|e| format!("invalid validation pattern {}: {}", pattern, e))?;
                if !re.is_match(s) {
                    return Err(match message {
                        Some(message) => message.clone(),
                        None => format!("expected to match regular expression {}, got {}", pattern, s),
                    });
                }
            }
            Self::MapKeyLenBetween { min, max } => {
                for key in expect_map(value)?.keys() {
                    let len = key.chars().count();
                    if len < *min || len > *max {
                        return Err(format!(
                            "key {:?} length must be in the range ({} - {}), got {}",
                            key, min, max, len
                        ));
                    }
                }
            }
            Self::MapValueLenBetween { min, max } => {
                for (key, v) in expect_map(value)? {
                    let len = v.as_str().map(|s| s.chars().count()).unwrap_or(0);
                    if len < *min || len > *max {
                        return Err(format!(
                            "value for key {:?} length must be in the range ({} - {}), got {}",
                            key, min, max, len
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| "expected type to be string".to_string())
}

fn expect_map(value: &Value) -> Result<&serde_json::Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| "expected type to be map".to_string())
}

/// When two values differ only cosmetically, the plan keeps the prior value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSuppress {
    /// Strings equal ignoring case.
    CaseInsensitive,
    /// Strings holding semantically equal JSON documents.
    JsonEquivalent,
}

impl DiffSuppress {
    /// Whether the change from `old` to `new` should be hidden.
    pub fn suppress(&self, old: &Value, new: &Value) -> bool {
        match (self, old.as_str(), new.as_str()) {
            (Self::CaseInsensitive, Some(old), Some(new)) => old.eq_ignore_ascii_case(new),
            (Self::JsonEquivalent, Some(old), Some(new)) => {
                match (
                    serde_json::from_str::<Value>(old),
                    serde_json::from_str::<Value>(new),
                ) {
                    (Ok(old), Ok(new)) => old == new,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// One attribute: its type, who writes it, and the constraints checked
/// at validation and plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Required, optional, computed, sensitive.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Documentation shown to users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change replaces the remote object instead of updating it.
    #[serde(default)]
    pub force_new: bool,
    /// Planned when the user leaves the attribute unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Validators applied to configured values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    /// Cosmetic differences to hide from the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_suppress: Option<DiffSuppress>,
    /// Attributes that must not be set together with this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,
    /// Exactly one attribute of this group must be set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<String>,
    /// At least one attribute of this group must be set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_least_one_of: Vec<String>,
    /// Attributes that must be set whenever this one is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_with: Vec<String>,
}

impl Attribute {
    /// An attribute with no constraints.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            validators: Vec::new(),
            diff_suppress: None,
            conflicts_with: Vec::new(),
            exactly_one_of: Vec::new(),
            at_least_one_of: Vec::new(),
            required_with: Vec::new(),
        }
    }

    /// Required text.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Optional text.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Text only the provider sets, like `arn`.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Text the provider fills in when unset, like `name`.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// Required whole number.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Optional whole number.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Optional flag.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// A `map(string)` the user may set, like `tags`.
    pub fn optional_string_map() -> Self {
        Self::new(
            AttributeType::map(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// A `map(string)` only the provider sets, like `tags_all`.
    pub fn computed_string_map() -> Self {
        Self::new(
            AttributeType::map(AttributeType::String),
            AttributeFlags::computed(),
        )
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Changes replace the remote object.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Plan `default` when unset.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mask the value in logs.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Add a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Hide cosmetic differences from the plan.
    pub fn with_diff_suppress(mut self, suppress: DiffSuppress) -> Self {
        self.diff_suppress = Some(suppress);
        self
    }

    /// Forbid setting this attribute together with `names`.
    pub fn conflicts_with(mut self, names: &[&str]) -> Self {
        self.conflicts_with = to_strings(names);
        self
    }

    /// Require exactly one attribute of the group to be set.
    pub fn exactly_one_of(mut self, names: &[&str]) -> Self {
        self.exactly_one_of = to_strings(names);
        self
    }

    /// Require at least one attribute of the group to be set.
    pub fn at_least_one_of(mut self, names: &[&str]) -> Self {
        self.at_least_one_of = to_strings(names);
        self
    }

    /// Require `names` whenever this attribute is set.
    pub fn required_with(mut self, names: &[&str]) -> Self {
        self.required_with = to_strings(names);
        self
    }

    /// Every attribute name this attribute's constraints refer to.
    pub fn referenced_attributes(&self) -> impl Iterator<Item = &str> {
        self.conflicts_with
            .iter()
            .chain(&self.exactly_one_of)
            .chain(&self.at_least_one_of)
            .chain(&self.required_with)
            .map(String::as_str)
    }
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// How many instances of a nested block may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// At most one, written as an object.
    #[default]
    Single,
    /// Any number, ordered.
    List,
    /// Any number, unordered.
    Set,
}

/// A group of attributes, such as the root of a schema or the body of
/// an `ingress` or `timeouts` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attributes by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Documentation shown to users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// An empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A block nested under a name, with its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The body.
    #[serde(flatten)]
    pub block: Block,
    /// Single, list or set.
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Fewest instances allowed.
    #[serde(default)]
    pub min_items: u32,
    /// Most instances allowed; 0 means no limit.
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    /// Zero or one instance.
    pub fn single(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::Single,
            min_items: 0,
            max_items: 1,
        }
    }

    /// Any number of instances, in order.
    pub fn list(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::List,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Require at least `min` instances.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Allow at most `max` instances.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// The versioned shape of a resource kind's state, or of the provider block.
///
/// The version is bumped whenever stored state needs a migrator to be read
/// by the current code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema version.
    #[serde(default)]
    pub version: u64,
    /// Root block.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// An empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// An empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add a top-level attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a top-level nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Look up a top-level attribute.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

/// Everything the host needs to know about the provider's shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The provider block.
    #[serde(default)]
    pub provider: Schema,
    /// Resource kinds by type name.
    #[serde(default)]
    pub resources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// No provider block, no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider block.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Register the schema of `name`.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

/// Whether a diagnostic blocks the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// The operation fails.
    Error,
    /// Reported, but the operation proceeds.
    Warning,
}

/// A problem reported to the host, optionally pinned to an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One line.
    pub summary: String,
    /// Longer explanation or remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Dotted path such as `ingress.0.cidr_blocks`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn new(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// An error.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, summary)
    }

    /// A warning.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, summary)
    }

    /// Whether this blocks the operation.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    /// Attach a longer explanation.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Pin to an attribute path.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}
