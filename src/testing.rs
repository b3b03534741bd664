//! In-process acceptance harness.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host does,
//! without any transport: plan, apply, refresh, import and destroy. The
//! lifecycle helpers chain those steps and check that destroyed objects are
//! really gone.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_aws::testing::{assert_plan_updates_in_place, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_widget_resize() {
//!     let tester = ProviderTester::new(my_provider());
//!     tester.configure(json!({"region": "us-west-2"})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("aws_widget", json!({"name": "a", "size": 1}))
//!         .await
//!         .unwrap();
//!     let mut resized = state.clone();
//!     resized["size"] = json!(4);
//!     let plan = tester.plan_update("aws_widget", state, resized).await.unwrap();
//!     assert_plan_updates_in_place(&plan);
//! }
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{ImportedResource, PlanResult};

/// Drives a provider in-process.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Registered resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Resource types that accept import.
    pub fn importable_types(&self) -> Vec<String> {
        self.provider.metadata().importable
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider block; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration; error diagnostics become `Err`.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan with no prior state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    /// Plan against `prior_state`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    /// Plan the removal of `prior_state`.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    /// Create an object from a planned state.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Refresh a state.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Apply a planned update.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Destroy the object.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing object by ID.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade a state written by an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create, then refresh. Returns the refreshed state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        let refreshed = self.read(resource_type, created).await?;
        if refreshed.is_null() {
            return Err(TestError::Vanished(resource_type.to_string()));
        }
        Ok(refreshed)
    }

    /// Plan and apply a change, then refresh. Plans that replace the
    /// object are rejected, since they cannot be applied as an update.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, TestError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan.requires_replace {
            return Err(TestError::RequiresReplace(
                plan.replace_paths().into_iter().map(str::to_string).collect(),
            ));
        }
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        let refreshed = self.read(resource_type, updated).await?;
        if refreshed.is_null() {
            return Err(TestError::Vanished(resource_type.to_string()));
        }
        Ok(refreshed)
    }

    /// Delete, then check that a refresh reports the object gone.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), TestError> {
        self.plan_delete(resource_type, current_state.clone()).await?;
        self.delete(resource_type, current_state.clone()).await?;
        let after = self.read(resource_type, current_state).await?;
        if !after.is_null() {
            return Err(TestError::NotDestroyed(resource_type.to_string()));
        }
        Ok(())
    }

    /// Import `id`, refresh every imported state, and return the results.
    pub async fn lifecycle_import(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<Value>, TestError> {
        let imported = self.import_resource(resource_type, id).await?;
        let mut states = Vec::with_capacity(imported.len());
        for resource in imported {
            debug!(resource_type = %resource.resource_type, id, "refreshing imported state");
            let state = self.read(&resource.resource_type, resource.state).await?;
            if state.is_null() {
                return Err(TestError::Vanished(resource.resource_type));
            }
            states.push(state);
        }
        Ok(states)
    }

    /// Create, update, and destroy. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;

        let mut proposed = created.clone();
        if let (Some(proposed), Value::Object(changes)) = (proposed.as_object_mut(), updated_config) {
            proposed.extend(changes);
        }
        let updated = self
            .lifecycle_update(resource_type, created, proposed)
            .await?;

        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Why a harness step failed.
#[derive(Debug, Error)]
pub enum TestError {
    /// The call returned error diagnostics.
    #[error("operation failed with {}", format_diagnostics(.0))]
    Diagnostics(Vec<Diagnostic>),

    /// The call returned an error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An update plan would replace the object.
    #[error("plan requires replacement because of {0:?}")]
    RequiresReplace(Vec<String>),

    /// A refresh right after apply reported the object gone.
    #[error("{0} disappeared after apply")]
    Vanished(String),

    /// A refresh after delete still found the object.
    #[error("{0} still exists after delete")]
    NotDestroyed(String),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut out = format!("{} diagnostic(s):", diagnostics.len());
    for diag in diagnostics {
        out.push_str(&format!("\n  [{:?}] {}", diag.severity, diag.summary));
        if let Some(detail) = &diag.detail {
            out.push_str(&format!(": {}", detail));
        }
        if let Some(attr) = &diag.attribute {
            out.push_str(&format!(" (at {})", attr));
        }
    }
    out
}

fn errors_only(diagnostics: &[Diagnostic]) -> impl Iterator<Item = &Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = errors_only(&diagnostics).cloned().collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a create plan sets something.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "expected plan to create, not replace");
}

/// Assert that a plan changes nothing.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan replaces the object.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan keeps the object.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "expected plan to update in place, but {:?} force replacement",
        plan.replace_paths()
    );
}

/// Assert that `path` is among the plan's changes.
///
/// # Panics
///
/// Panics if the plan does not change `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "expected plan to change attribute '{}'; changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that `path` is not among the plan's changes.
///
/// # Panics
///
/// Panics if the plan changes `path`.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics hold no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = errors_only(diagnostics).map(|d| &d.summary).collect();
    assert!(
        errors.is_empty(),
        "expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors
    );
}

/// Assert that diagnostics hold at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        errors_only(diagnostics).next().is_some(),
        "expected at least one error, but got none"
    );
}

/// Assert that some error summary contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        errors_only(diagnostics).any(|d| d.summary.contains(substring)),
        "expected an error containing '{}'; errors: {:?}",
        substring,
        errors_only(diagnostics).map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that some error points at the attribute `path`.
///
/// # Panics
///
/// Panics if no error diagnostic carries `path`.
pub fn assert_error_at(diagnostics: &[Diagnostic], path: &str) {
    assert!(
        errors_only(diagnostics).any(|d| d.attribute.as_deref() == Some(path)),
        "expected an error at '{}'; errors at: {:?}",
        path,
        errors_only(diagnostics)
            .map(|d| d.attribute.as_deref())
            .collect::<Vec<_>>()
    );
}
