//! Sweepers: bulk deletion of leftover test resources.
//!
//! Each resource kind registers a sweeper function with a
//! [`SweeperRegistry`]. A sweeper lists the kind's objects in one region,
//! turns them into [`Sweepable`] records and hands them to [`orchestrate`],
//! which deletes every record in parallel and aggregates the failures.
//!
//! Sweepers that cannot run in a region (the service is unavailable, the
//! account is not enabled) return success through [`skip_sweep_error`].

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conns::{ClientFactory, ProviderMeta, RegionalClientCache};
use crate::error::{MultiError, ProviderError};
use crate::errs;
use crate::resource::Resource;
use crate::retry::retry_when;

/// How long each worker retries a throttled delete.
pub const THROTTLING_RETRY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One discovered object to delete.
#[async_trait]
pub trait Sweepable: Send + Sync + 'static {
    /// Delete the object.
    async fn delete(&self, cancel: &CancellationToken) -> Result<(), ProviderError>;

    /// A label for logs.
    fn description(&self) -> String;
}

/// Deletes an object through its kind's Delete handler.
pub struct SweepResource<C: Send + Sync + 'static> {
    resource: Arc<Resource<C>>,
    meta: Arc<ProviderMeta<C>>,
    state: Value,
}

impl<C: Send + Sync + 'static> SweepResource<C> {
    /// A record for the object described by `state`, which needs at least
    /// the identifier.
    pub fn new(resource: Arc<Resource<C>>, meta: Arc<ProviderMeta<C>>, state: Value) -> Self {
        Self {
            resource,
            meta,
            state,
        }
    }

    /// Box the record for [`orchestrate`].
    pub fn boxed(self) -> Box<dyn Sweepable> {
        Box::new(self)
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> Sweepable for SweepResource<C> {
    async fn delete(&self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.resource.delete(&self.meta, cancel, &self.state).await
    }

    fn description(&self) -> String {
        format!(
            "{} ({})",
            self.resource.type_name(),
            self.state.get("id").and_then(Value::as_str).unwrap_or("?")
        )
    }
}

fn is_throttled(err: &ProviderError) -> bool {
    errs::message_contains(err, "Throttling")
}

/// Delete every record in parallel and wait for all of them.
///
/// Each worker retries while the error mentions throttling, for up to
/// [`THROTTLING_RETRY_TIMEOUT`], then makes one final attempt. Failures
/// from all workers are returned together.
pub async fn orchestrate(
    records: Vec<Box<dyn Sweepable>>,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    orchestrate_with_timeout(records, cancel, THROTTLING_RETRY_TIMEOUT).await
}

/// [`orchestrate`] with a custom throttling budget.
pub async fn orchestrate_with_timeout(
    records: Vec<Box<dyn Sweepable>>,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<(), ProviderError> {
    if records.is_empty() {
        return Ok(());
    }
    info!(count = records.len(), "sweeping resources");

    let mut workers: FuturesUnordered<_> = records
        .into_iter()
        .map(|record| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let description = record.description();
                debug!(resource = %description, "deleting");
                let result =
                    retry_when(timeout, &cancel, || record.delete(&cancel), is_throttled).await;
                (description, result)
            })
        })
        .collect();

    let mut errors = MultiError::new();
    while let Some(joined) = workers.next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((description, Err(e))) => {
                warn!(resource = %description, error = %e, "sweep failed");
                errors.push(e);
            }
            Err(e) => errors.push(ProviderError::Sdk(format!("sweeper worker failed: {}", e))),
        }
    }
    errors.into_result()
}

/// Turn a listing error into success when the region cannot be swept.
pub fn skip_sweep_error(region: &str, sweeper: &str, err: ProviderError) -> Result<(), ProviderError> {
    if errs::is_skippable_sweep_error(&err) {
        warn!(region, sweeper, error = %err, "skipping sweeper");
        return Ok(());
    }
    Err(err)
}

/// What a sweeper function receives.
pub struct SweepContext<C> {
    /// The shared connection for the region.
    pub meta: Arc<ProviderMeta<C>>,
    /// The region being swept.
    pub region: String,
    /// Cancels the sweep.
    pub cancel: CancellationToken,
}

type SweepFn<C> =
    Arc<dyn Fn(SweepContext<C>) -> BoxFuture<'static, Result<(), ProviderError>> + Send + Sync>;

struct Sweeper<C> {
    dependencies: Vec<String>,
    sweep: SweepFn<C>,
}

/// Which sweepers to run where.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Regions to sweep, in order.
    pub regions: Vec<String>,
    /// Sweeper names to run, with their dependencies; all when empty.
    pub filter: Vec<String>,
    /// Log sweeper failures and keep going.
    pub allow_failures: bool,
}

/// Registered sweepers, keyed by name.
pub struct SweeperRegistry<F: ClientFactory> {
    sweepers: BTreeMap<String, Sweeper<F::Client>>,
    clients: Arc<RegionalClientCache<F>>,
}

impl<F: ClientFactory> SweeperRegistry<F> {
    /// An empty registry sharing connections through `clients`.
    pub fn new(clients: Arc<RegionalClientCache<F>>) -> Self {
        Self {
            sweepers: BTreeMap::new(),
            clients,
        }
    }

    /// Register `sweep` as `name`. Sweepers named in `dependencies` run
    /// first, e.g. instances before the subnets they live in.
    pub fn add<S, Fut>(
        &mut self,
        name: &str,
        dependencies: &[&str],
        sweep: S,
    ) -> Result<(), ProviderError>
    where
        S: Fn(SweepContext<F::Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
    {
        if self.sweepers.contains_key(name) {
            return Err(ProviderError::Configuration(format!(
                "sweeper {} registered twice",
                name
            )));
        }
        self.sweepers.insert(
            name.to_string(),
            Sweeper {
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                sweep: Arc::new(move |ctx| sweep(ctx).boxed()),
            },
        );
        Ok(())
    }

    /// Registered names.
    pub fn names(&self) -> Vec<&str> {
        self.sweepers.keys().map(String::as_str).collect()
    }

    /// The run order for `filter`: each selected sweeper after its
    /// dependencies, each at most once.
    pub fn order(&self, filter: &[String]) -> Result<Vec<String>, ProviderError> {
        let roots: Vec<&String> = if filter.is_empty() {
            self.sweepers.keys().collect()
        } else {
            filter.iter().collect()
        };

        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        name: &str,
        visiting: &mut BTreeSet<String>,
        done: &mut BTreeSet<String>,
        ordered: &mut Vec<String>,
    ) -> Result<(), ProviderError> {
        if done.contains(name) {
            return Ok(());
        }
        let sweeper = self.sweepers.get(name).ok_or_else(|| {
            ProviderError::Configuration(format!("unknown sweeper {}", name))
        })?;
        if !visiting.insert(name.to_string()) {
            return Err(ProviderError::Configuration(format!(
                "sweeper dependency cycle through {}",
                name
            )));
        }
        for dependency in &sweeper.dependencies {
            self.visit(dependency, visiting, done, ordered)?;
        }
        visiting.remove(name);
        done.insert(name.to_string());
        ordered.push(name.to_string());
        Ok(())
    }

    /// Run the selected sweepers in every region.
    pub async fn run(
        &self,
        options: &SweepOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let order = self.order(&options.filter)?;
        for region in &options.regions {
            let meta = self.clients.get(region).await?;
            for name in &order {
                let Some(sweeper) = self.sweepers.get(name) else {
                    continue;
                };
                info!(region = %region, sweeper = %name, "running sweeper");
                let ctx = SweepContext {
                    meta: meta.clone(),
                    region: region.clone(),
                    cancel: cancel.child_token(),
                };
                match (sweeper.sweep)(ctx).await {
                    Ok(()) => {}
                    Err(e) if options.allow_failures => {
                        warn!(region = %region, sweeper = %name, error = %e, "sweeper failed");
                    }
                    Err(e) => {
                        error!(region = %region, sweeper = %name, error = %e, "sweeper failed");
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}
