//! Host-facing dispatch.
//!
//! [`ProviderService`] is the surface the host drives: schema, provider
//! configuration and the per-resource lifecycle calls. [`Provider`]
//! implements it over a set of [`Resource`] descriptors, routing each call
//! by resource type name to the descriptor's handler with the configured
//! [`ProviderMeta`].
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_aws::provider::{Provider, ProviderService};
//!
//! let provider = Provider::new(MyFactory::default())
//!     .with_resource(widget_resource())?;
//! provider.configure(json!({"region": "us-west-2"})).await?;
//! let state = provider.create("aws_widget", planned).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::{provider_config_schema, ProviderConfig};
use crate::conns::{ClientFactory, ProviderMeta};
use crate::error::ProviderError;
use crate::logging::redacted;
use crate::resource::Resource;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::tags::TagConfig;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};
use crate::validation;

/// The operations a provider exposes to the host.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The provider configuration schema and every resource schema.
    fn schema(&self) -> ProviderSchema;

    /// Resource names and which of them accept import.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.schema().resources.keys().cloned().collect(),
            importable: Vec::new(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Check the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Build clients from the provider configuration.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Cancel in-flight operations.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Check a resource configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Rewrite state written by an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError>;

    /// Prepare the planned state for the host's diff.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the remote object.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh state; `Value::Null` means the object is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update the remote object in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Destroy the remote object.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Adopt an existing remote object.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// A provider built from resource descriptors and a client factory.
pub struct Provider<F: ClientFactory> {
    resources: BTreeMap<String, Arc<Resource<F::Client>>>,
    factory: Arc<F>,
    meta: RwLock<Option<Arc<ProviderMeta<F::Client>>>>,
    cancel: CancellationToken,
}

impl<F: ClientFactory> Provider<F> {
    /// A provider with no resources.
    pub fn new(factory: F) -> Self {
        Self {
            resources: BTreeMap::new(),
            factory: Arc::new(factory),
            meta: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a resource kind. Descriptors failing
    /// [`Resource::internal_validate`] are rejected.
    pub fn with_resource(mut self, resource: Resource<F::Client>) -> Result<Self, ProviderError> {
        resource.internal_validate()?;
        let name = resource.type_name().to_string();
        if self.resources.contains_key(&name) {
            return Err(ProviderError::Configuration(format!(
                "resource type {} registered twice",
                name
            )));
        }
        self.resources.insert(name, Arc::new(resource));
        Ok(self)
    }

    /// The descriptor for `resource_type`.
    pub fn resource(&self, resource_type: &str) -> Result<Arc<Resource<F::Client>>, ProviderError> {
        self.resources
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    /// The connection built by `configure`.
    pub async fn meta(&self) -> Result<Arc<ProviderMeta<F::Client>>, ProviderError> {
        self.meta.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider is not configured".to_string())
        })
    }

    /// Cancelled by `stop`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn prepare(
        &self,
        resource_type: &str,
    ) -> Result<(Arc<Resource<F::Client>>, Arc<ProviderMeta<F::Client>>), ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta().await?;
        Ok((resource, meta))
    }
}

#[async_trait::async_trait]
impl<F: ClientFactory> ProviderService for Provider<F> {
    fn schema(&self) -> ProviderSchema {
        self.resources.iter().fold(
            ProviderSchema::new().with_provider_config(provider_config_schema()),
            |schema, (name, resource)| schema.with_resource(name.clone(), resource.schema().clone()),
        )
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.resources.keys().cloned().collect(),
            importable: self
                .resources
                .iter()
                .filter(|(_, r)| r.is_importable())
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&provider_config_schema(), &config);
        if diagnostics.is_empty() {
            if let Err(e) = ProviderConfig::from_value(&config) {
                diagnostics.extend(e.to_diagnostics());
            }
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = ProviderConfig::from_value(&config)?;
        let region = config.resolve_region()?;
        let meta = ProviderMeta::connect(self.factory.as_ref(), &config, &region).await?;
        info!(region = %region, "provider configured");
        *self.meta.write().await = Some(Arc::new(meta));
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("stopping provider");
        self.cancel.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        Ok(validation::validate(resource.schema(), &config))
    }

    #[instrument(skip(self, state))]
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.resource(resource_type)?.upgrade_state(version, state)
    }

    #[instrument(skip(self, prior_state, proposed_state))]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let tags = match self.meta.read().await.as_ref() {
            Some(meta) => meta.tags.clone(),
            None => TagConfig::default(),
        };
        let result = resource.plan(prior_state.as_ref(), &proposed_state, &tags)?;
        debug!(
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "plan completed"
        );
        Ok(result)
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let (resource, meta) = self.prepare(resource_type).await?;
        debug!(planned = %redacted(resource.schema(), &planned_state), "create called");
        resource
            .create(&meta, &self.cancel, &planned_state)
            .await
            .inspect_err(|e| error!(error = %e, "create failed"))
    }

    #[instrument(skip(self, current_state))]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let (resource, meta) = self.prepare(resource_type).await?;
        let state = resource.read(&meta, &self.cancel, &current_state).await?;
        if state.is_null() {
            info!("remote object gone, removing from state");
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let (resource, meta) = self.prepare(resource_type).await?;
        debug!(planned = %redacted(resource.schema(), &planned_state), "update called");
        resource
            .update(&meta, &self.cancel, &prior_state, &planned_state)
            .await
            .inspect_err(|e| error!(error = %e, "update failed"))
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let (resource, meta) = self.prepare(resource_type).await?;
        resource
            .delete(&meta, &self.cancel, &current_state)
            .await
            .inspect_err(|e| error!(error = %e, "delete failed"))
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.resource(resource_type)?.import(id)
    }
}
