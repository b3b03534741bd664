//! Configured client connections.
//!
//! A [`ClientFactory`] turns the provider configuration into a service
//! client for one region. The result, together with the account and tag
//! settings every handler needs, is a [`ProviderMeta`]: the value handed to
//! each resource handler.
//!
//! Sweepers and multi-region tests share connections through a
//! [`RegionalClientCache`], which builds each region's client at most once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{consulted_credential_env_vars, ProviderConfig};
use crate::error::ProviderError;
use crate::tags::TagConfig;

/// Builds service clients from the provider configuration.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    /// The client handed to resource handlers.
    type Client: Send + Sync + 'static;

    /// Build a client for `region`. Credentials come from the standard
    /// provider chain unless `config` names a profile.
    async fn connect(
        &self,
        config: &ProviderConfig,
        region: &str,
    ) -> Result<Self::Client, ProviderError>;

    /// The account the credentials belong to, if it can be determined.
    async fn caller_account_id(
        &self,
        _client: &Self::Client,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Everything a handler needs besides its state.
pub struct ProviderMeta<C> {
    /// The configured service client.
    pub client: C,
    /// Region the client talks to.
    pub region: String,
    /// Partition of `region`.
    pub partition: String,
    /// Account ID, when known.
    pub account_id: Option<String>,
    /// Default tags and ignore rules.
    pub tags: TagConfig,
}

impl<C> ProviderMeta<C> {
    /// Connect using `factory` and resolve account and partition.
    pub async fn connect<F>(
        factory: &F,
        config: &ProviderConfig,
        region: &str,
    ) -> Result<Self, ProviderError>
    where
        F: ClientFactory<Client = C> + ?Sized,
    {
        debug!(
            region,
            env_vars = ?consulted_credential_env_vars(),
            "building client"
        );
        let client = factory.connect(config, region).await?;

        let account_id = match &config.account_id {
            Some(id) => Some(id.clone()),
            None if config.skip_credentials_validation => None,
            None => factory.caller_account_id(&client).await?,
        };
        if let Some(account_id) = &account_id {
            config.validate_account(account_id)?;
        }

        let partition = config.resolve_partition(region);
        info!(region, partition = %partition, account_id = ?account_id, "client configured");

        Ok(Self {
            client,
            region: region.to_string(),
            partition,
            account_id,
            tags: config.tag_config(),
        })
    }

    /// Build from parts, for callers that already hold a client.
    pub fn new(client: C, region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            client,
            partition: crate::config::partition_for_region(&region).to_string(),
            region,
            account_id: None,
            tags: TagConfig::default(),
        }
    }

    /// Set the account ID.
    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Set the tag configuration.
    pub fn with_tags(mut self, tags: TagConfig) -> Self {
        self.tags = tags;
        self
    }

    /// A regional ARN in this meta's partition, region and account.
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition,
            service,
            self.region,
            self.account_id.as_deref().unwrap_or_default(),
            resource
        )
    }

    /// An ARN for a global service such as IAM, with no region.
    pub fn global_arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}::{}:{}",
            self.partition,
            service,
            self.account_id.as_deref().unwrap_or_default(),
            resource
        )
    }

    /// The DNS suffix of service endpoints in this partition.
    pub fn dns_suffix(&self) -> &'static str {
        match self.partition.as_str() {
            "aws-cn" => "amazonaws.com.cn",
            "aws-iso" => "c2s.ic.gov",
            "aws-iso-b" => "sc2s.sgov.gov",
            _ => "amazonaws.com",
        }
    }
}

impl<C> fmt::Debug for ProviderMeta<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMeta")
            .field("region", &self.region)
            .field("partition", &self.partition)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

type Slot<C> = Arc<OnceCell<Arc<ProviderMeta<C>>>>;

/// Connections keyed by region, built on first use and never replaced.
pub struct RegionalClientCache<F: ClientFactory> {
    factory: Arc<F>,
    config: ProviderConfig,
    slots: Mutex<HashMap<String, Slot<F::Client>>>,
}

impl<F: ClientFactory> RegionalClientCache<F> {
    /// An empty cache.
    pub fn new(factory: Arc<F>, config: ProviderConfig) -> Self {
        Self {
            factory,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The connection for `region`, building it if this is the first request.
    ///
    /// Concurrent callers for the same region wait for a single build. A
    /// failed build is not cached.
    pub async fn get(&self, region: &str) -> Result<Arc<ProviderMeta<F::Client>>, ProviderError> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| ProviderError::Sdk("regional client cache poisoned".to_string()))?;
            slots.entry(region.to_string()).or_default().clone()
        };

        let meta = slot
            .get_or_try_init(|| async {
                ProviderMeta::connect(self.factory.as_ref(), &self.config, region)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(meta.clone())
    }

    /// Regions with a built connection.
    pub fn regions(&self) -> Vec<String> {
        let Ok(slots) = self.slots.lock() else {
            return Vec::new();
        };
        let mut regions: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(region, _)| region.clone())
            .collect();
        regions.sort();
        regions
    }
}
