//! Convenience types shared by the host-facing surface and the handlers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle operation a handler, timeout or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create a new remote object.
    Create,
    /// Refresh state from the remote object.
    Read,
    /// Mutate an existing remote object in place.
    Update,
    /// Destroy the remote object.
    Delete,
    /// Adopt an existing remote object.
    Import,
    /// Rewrite state written by an older schema version.
    UpgradeState,
    /// Prepare the planned state for the host's diff.
    Plan,
}

impl Operation {
    /// The progressive verb used in error messages ("creating", "reading", ...).
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Read => "reading",
            Self::Update => "updating",
            Self::Delete => "deleting",
            Self::Import => "importing",
            Self::UpgradeState => "upgrading state of",
            Self::Plan => "planning",
        }
    }

    /// The key used for this operation in a `timeouts` block, if it has one.
    pub fn timeout_key(&self) -> Option<&'static str> {
        match self {
            Self::Create => Some("create"),
            Self::Read => Some("read"),
            Self::Update => Some("update"),
            Self::Delete => Some("delete"),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute name.
    pub path: String,
    /// The prior value (None when the attribute was absent).
    pub before: Option<serde_json::Value>,
    /// The planned value (None when the attribute is being removed).
    pub after: Option<serde_json::Value>,
    /// Whether changing this attribute forces replacement.
    #[serde(default)]
    pub forces_new: bool,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
            forces_new: false,
        }
    }

    /// Mark this change as requiring destroy-then-create.
    pub fn forcing_new(mut self) -> Self {
        self.forces_new = true;
        self
    }
}

/// The planned state handed back to the host for diffing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after defaults, suppression and CustomizeDiff.
    pub planned_state: serde_json::Value,
    /// Top-level attributes whose planned value differs from the prior value.
    pub changes: Vec<AttributeChange>,
    /// Whether any forces-new attribute changed.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan that changes nothing.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Names of the attributes that force replacement.
    pub fn replace_paths(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.forces_new)
            .map(|c| c.path.as_str())
            .collect()
    }
}

/// One partially populated state produced by an importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type of the imported object.
    pub resource_type: String,
    /// The imported state; the host completes it with a Read.
    pub state: serde_json::Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Registered resource type names, sorted.
    pub resources: Vec<String>,
    /// Resource types that accept `import`.
    pub importable: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_verbs() {
        assert_eq!(Operation::Create.to_string(), "creating");
        assert_eq!(Operation::Delete.verb(), "deleting");
        assert_eq!(Operation::Update.timeout_key(), Some("update"));
        assert_eq!(Operation::Import.timeout_key(), None);
    }

    #[test]
    fn test_plan_replace_paths() {
        let plan = PlanResult {
            planned_state: json!({"name": "b"}),
            changes: vec![
                AttributeChange::new("name", Some(json!("a")), Some(json!("b"))).forcing_new(),
                AttributeChange::new("description", None, Some(json!("d"))),
            ],
            requires_replace: true,
        };
        assert_eq!(plan.replace_paths(), vec!["name"]);
        assert!(PlanResult::no_change(json!({})).changes.is_empty());
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("aws_s3_bucket", json!({"id": "my-bucket"}));
        assert_eq!(imported.resource_type, "aws_s3_bucket");
        assert_eq!(imported.state["id"], "my-bucket");
    }
}
