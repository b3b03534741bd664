//! Hemmer AWS Provider runtime
//!
//! The shared machinery every AWS resource kind of the Hemmer provider is
//! built on. Resource kinds supply a schema and a [`ResourceHandler`]; this
//! crate supplies everything around them:
//!
//! - **Lifecycle dispatch**: [`Resource`] descriptors routed by [`Provider`],
//!   which implements the host-facing [`ProviderService`] trait
//! - **Error predicates**: matching remote errors by code, message and HTTP
//!   status, through wrapped context ([`errs`])
//! - **Retries and waiters**: time-bounded retry with a final attempt
//!   ([`retry`]) and pending/target state polling ([`waiter`])
//! - **Finders**: NotFound translation for lookups ([`finder`])
//! - **Tags**: default tags, ignore rules and tag diffs ([`tags`])
//! - **Sweepers**: parallel bulk deletion of leftover test objects ([`sweep`])
//! - **Configuration**: the provider block and regional clients ([`config`], [`conns`])
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_aws::{
//!     async_trait, CancellationToken, ProviderError, ProviderMeta, Resource, ResourceHandler,
//! };
//! use hemmer_provider_aws::data::ResourceData;
//! use hemmer_provider_aws::finder::translate_not_found;
//!
//! struct QueueHandler;
//!
//! #[async_trait]
//! impl ResourceHandler<SqsClient> for QueueHandler {
//!     async fn create(
//!         &self,
//!         meta: &ProviderMeta<SqsClient>,
//!         cancel: &CancellationToken,
//!         data: &mut ResourceData,
//!     ) -> Result<(), ProviderError> {
//!         let url = meta.client.create_queue(data.get_str("name").unwrap_or_default()).await?;
//!         data.set_id(&url);
//!         self.read(meta, cancel, data).await
//!     }
//!
//!     async fn read(
//!         &self,
//!         meta: &ProviderMeta<SqsClient>,
//!         _cancel: &CancellationToken,
//!         data: &mut ResourceData,
//!     ) -> Result<(), ProviderError> {
//!         let attrs = meta
//!             .client
//!             .get_queue_attributes(data.id())
//!             .await
//!             .map_err(|e| translate_not_found(e, None))?;
//!         data.set("arn", &attrs.arn)
//!     }
//!
//!     async fn delete(
//!         &self,
//!         meta: &ProviderMeta<SqsClient>,
//!         _cancel: &CancellationToken,
//!         data: &mut ResourceData,
//!     ) -> Result<(), ProviderError> {
//!         meta.client.delete_queue(data.id()).await
//!     }
//! }
//!
//! let provider = Provider::new(SqsFactory)
//!     .with_resource(Resource::new("aws_sqs_queue", queue_schema(), QueueHandler).with_tags())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod conns;
pub mod data;
pub mod error;
pub mod errs;
pub mod finder;
pub mod id;
pub mod logging;
pub mod mutexkv;
pub mod naming;
pub mod paginate;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod sweep;
pub mod tags;
pub mod testing;
pub mod timeouts;
pub mod types;
pub mod validation;
pub mod waiter;

#[cfg(test)]
mod test_support;

// Re-export main types at crate root
pub use config::ProviderConfig;
pub use conns::{ClientFactory, ProviderMeta, RegionalClientCache};
pub use data::ResourceData;
pub use error::{MultiError, NotFoundError, ProviderError, RemoteError, TimeoutError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{Provider, ProviderService};
pub use resource::{Importer, Resource, ResourceHandler};
pub use schema::ProviderSchema;
pub use types::{AttributeChange, ImportedResource, Operation, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};
pub use waiter::StateChangeConf;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
pub use tonic;
pub use tracing;
