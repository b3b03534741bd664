//! Resource descriptors and the lifecycle runtime.
//!
//! A [`Resource`] declares one resource kind: its schema, the
//! [`ResourceHandler`] implementing Create/Read/Update/Delete, and the
//! optional importer, state migrators and CustomizeDiff hooks. The
//! descriptor's lifecycle methods apply the rules every kind shares:
//!
//! - Read on a vanished object clears the state instead of failing, unless
//!   the object was created during the same operation.
//! - Delete of a vanished object succeeds.
//! - Update of a vanished object fails with [`ProviderError::ResourceGone`].
//! - Every failure is wrapped with the kind, identifier and operation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::conns::ProviderMeta;
use crate::data::{ResourceData, ID};
use crate::error::ProviderError;
use crate::errs;
use crate::naming::{NAME, NAME_PREFIX};
use crate::schema::Schema;
use crate::tags::{tags_all_attribute, tags_attribute, KeyValueTags, TagConfig, TAGS, TAGS_ALL};
use crate::timeouts::{ResourceTimeouts, TIMEOUTS};
use crate::types::{AttributeChange, ImportedResource, Operation, PlanResult};

/// Create/Read/Update/Delete for one resource kind.
///
/// Handlers read and write state through [`ResourceData`]. Create must set
/// the identifier as soon as the remote object exists, so a later failure
/// still leaves the host able to delete it.
#[async_trait]
pub trait ResourceHandler<C: Send + Sync + 'static>: Send + Sync + 'static {
    /// Create the remote object described by `data`.
    async fn create(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError>;

    /// Refresh `data` from the remote object.
    async fn read(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError>;

    /// Apply changed attributes in place.
    async fn update(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let _ = (meta, cancel, data);
        Err(ProviderError::Unimplemented("update".to_string()))
    }

    /// Destroy the remote object.
    async fn delete(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError>;

    /// Whether [`ResourceHandler::update`] is implemented. Kinds without
    /// Update must mark every settable attribute as forcing replacement.
    fn supports_update(&self) -> bool {
        false
    }
}

/// Rewrites state from one schema version to the next.
pub type StateMigrator = fn(Value) -> Result<Value, ProviderError>;

/// Adjusts a plan before it is returned to the host.
pub type CustomizeDiffFn = fn(&mut ResourceDiff<'_>) -> Result<(), ProviderError>;

/// How `import` turns an identifier into state.
pub enum Importer<C: Send + Sync + 'static> {
    /// The identifier is the whole state; Read fills in the rest.
    Passthrough,
    /// A custom function, e.g. for composite identifiers. It may return
    /// sibling objects alongside the requested one.
    Custom(fn(&Resource<C>, &str) -> Result<Vec<ImportedResource>, ProviderError>),
}

impl<C: Send + Sync + 'static> Clone for Importer<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Passthrough => Self::Passthrough,
            Self::Custom(f) => Self::Custom(*f),
        }
    }
}

/// The view of a plan given to CustomizeDiff hooks.
pub struct ResourceDiff<'a> {
    schema: &'a Schema,
    prior: Option<&'a Map<String, Value>>,
    planned: &'a mut Map<String, Value>,
    forced: &'a mut BTreeSet<String>,
}

impl ResourceDiff<'_> {
    /// Whether the resource is being created.
    pub fn is_create(&self) -> bool {
        self.prior.is_none()
    }

    /// The prior value of `key`.
    pub fn get_old(&self, key: &str) -> Option<&Value> {
        self.prior.and_then(|p| p.get(key)).filter(|v| !v.is_null())
    }

    /// The planned value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.planned.get(key).filter(|v| !v.is_null())
    }

    /// Whether `key` changes in this plan.
    pub fn has_change(&self, key: &str) -> bool {
        self.get_old(key) != self.get(key)
    }

    /// Set the planned value of a computed attribute.
    pub fn set_new(&mut self, key: &str, value: Value) -> Result<(), ProviderError> {
        match self.schema.attribute(key) {
            Some(attr) if attr.flags.computed => {
                self.planned.insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(ProviderError::Configuration(format!(
                "set_new: '{}' is not a computed attribute",
                key
            ))),
        }
    }

    /// Drop the planned value of a computed attribute so the host treats
    /// it as unknown until apply.
    pub fn set_new_computed(&mut self, key: &str) -> Result<(), ProviderError> {
        match self.schema.attribute(key) {
            Some(attr) if attr.flags.computed => {
                self.planned.remove(key);
                Ok(())
            }
            _ => Err(ProviderError::Configuration(format!(
                "set_new_computed: '{}' is not a computed attribute",
                key
            ))),
        }
    }

    /// Require replacement because of a change to `key`.
    pub fn force_new(&mut self, key: &str) -> Result<(), ProviderError> {
        if !self.has_change(key) {
            return Err(ProviderError::Configuration(format!(
                "force_new: '{}' has no change",
                key
            )));
        }
        self.forced.insert(key.to_string());
        Ok(())
    }
}

/// Declaration of one resource kind.
pub struct Resource<C: Send + Sync + 'static> {
    type_name: String,
    schema: Schema,
    handler: Arc<dyn ResourceHandler<C>>,
    importer: Option<Importer<C>>,
    migrators: BTreeMap<u64, StateMigrator>,
    timeouts: ResourceTimeouts,
    customize_diff: Vec<CustomizeDiffFn>,
    tagged: bool,
}

impl<C: Send + Sync + 'static> fmt::Debug for Resource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("type_name", &self.type_name)
            .field("version", &self.schema.version)
            .field("importable", &self.importer.is_some())
            .field("tagged", &self.tagged)
            .finish_non_exhaustive()
    }
}

impl<C: Send + Sync + 'static> Resource<C> {
    /// A kind with the given schema and handler.
    pub fn new(
        type_name: impl Into<String>,
        schema: Schema,
        handler: impl ResourceHandler<C>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            schema,
            handler: Arc::new(handler),
            importer: None,
            migrators: BTreeMap::new(),
            timeouts: ResourceTimeouts::default(),
            customize_diff: Vec::new(),
            tagged: false,
        }
    }

    /// Accept `import`.
    pub fn with_importer(mut self, importer: Importer<C>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Register the migrator from `from_version` to `from_version + 1`.
    pub fn with_migrator(mut self, from_version: u64, migrator: StateMigrator) -> Self {
        self.migrators.insert(from_version, migrator);
        self
    }

    /// Declare default timeouts and the user-facing `timeouts` block.
    pub fn with_timeouts(mut self, timeouts: ResourceTimeouts) -> Self {
        self.timeouts = timeouts;
        let block = ResourceTimeouts::block(self.handler.supports_update());
        self.schema = self.schema.with_block(TIMEOUTS, block);
        self
    }

    /// Add a CustomizeDiff hook. Hooks run in registration order.
    pub fn with_customize_diff(mut self, hook: CustomizeDiffFn) -> Self {
        self.customize_diff.push(hook);
        self
    }

    /// Add the `tags` and `tags_all` attributes and compute `tags_all`
    /// during plan.
    pub fn with_tags(mut self) -> Self {
        let mut tags = tags_attribute();
        if !self.handler.supports_update() {
            tags = tags.with_force_new();
        }
        self.schema = self
            .schema
            .with_attribute(TAGS, tags)
            .with_attribute(TAGS_ALL, tags_all_attribute());
        self.tagged = true;
        self
    }

    /// The kind's type name, e.g. `aws_sqs_queue`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The kind's schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Default timeouts.
    pub fn timeouts(&self) -> ResourceTimeouts {
        self.timeouts
    }

    /// Whether `import` is accepted.
    pub fn is_importable(&self) -> bool {
        self.importer.is_some()
    }

    /// Whether the kind manages tags.
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// Check the declaration for mistakes that would only surface at apply
    /// time. All problems are reported together.
    pub fn internal_validate(&self) -> Result<(), ProviderError> {
        let mut problems = Vec::new();
        let attributes = &self.schema.block.attributes;
        let supports_update = self.handler.supports_update();

        let mut names: Vec<&String> = attributes.keys().collect();
        names.sort();
        for name in names {
            let attr = &attributes[name];
            if attr.flags.required && attr.flags.optional {
                problems.push(format!("{}: cannot be both required and optional", name));
            }
            if attr.flags.required && attr.default.is_some() {
                problems.push(format!("{}: default is not allowed on required attributes", name));
            }
            if attr.flags.is_computed_only() {
                if attr.default.is_some() {
                    problems.push(format!("{}: default is not allowed on computed attributes", name));
                }
                if attr.force_new {
                    problems.push(format!("{}: force_new is not allowed on computed attributes", name));
                }
                if !attr.validators.is_empty() {
                    problems.push(format!("{}: validators are not allowed on computed attributes", name));
                }
            }
            if !supports_update && attr.flags.is_user_settable() && !attr.force_new {
                problems.push(format!(
                    "{}: must be force_new, the resource has no update",
                    name
                ));
            }
            for other in attr.referenced_attributes() {
                if other != name && !attributes.contains_key(other) {
                    problems.push(format!("{}: references undeclared attribute '{}'", name, other));
                }
            }
        }

        if let (Some(name), Some(_)) = (attributes.get(NAME), attributes.get(NAME_PREFIX)) {
            if !name.conflicts_with.iter().any(|c| c == NAME_PREFIX) {
                problems.push(format!("{}: must conflict with {}", NAME, NAME_PREFIX));
            }
        }

        for version in self.migrators.keys() {
            if *version >= self.schema.version {
                problems.push(format!(
                    "state migrator from version {} is not below schema version {}",
                    version, self.schema.version
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Configuration(format!(
                "resource {} is invalid: {}",
                self.type_name,
                problems.join("; ")
            )))
        }
    }

    fn wrap(&self, id: &str, operation: Operation, err: ProviderError) -> ProviderError {
        ProviderError::operation(&self.type_name, Some(id), operation, err)
    }

    /// Rewrite state persisted at `version` to the current schema version.
    pub fn upgrade_state(&self, version: u64, state: Value) -> Result<Value, ProviderError> {
        let current = self.schema.version;
        if version > current {
            return Err(ProviderError::Configuration(format!(
                "state of {} is at version {}, newer than schema version {}",
                self.type_name, version, current
            )));
        }
        let mut state = state;
        for from in version..current {
            let migrator = self.migrators.get(&from).ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "{} has no state migrator from version {}",
                    self.type_name, from
                ))
            })?;
            debug!(resource_type = %self.type_name, from, "migrating state");
            state = migrator(state)?;
        }
        Ok(state)
    }

    /// Prepare the planned state: defaults, suppressed diffs, computed
    /// values carried from prior state, `tags_all`, CustomizeDiff hooks,
    /// and the list of changes with their forces-new marks.
    pub fn plan(
        &self,
        prior: Option<&Value>,
        proposed: &Value,
        tags: &TagConfig,
    ) -> Result<PlanResult, ProviderError> {
        let prior = prior.and_then(Value::as_object).filter(|p| !p.is_empty());
        let mut planned = match proposed {
            Value::Object(map) => map.clone(),
            Value::Null => return Ok(PlanResult::no_change(Value::Null)),
            other => {
                return Err(ProviderError::Configuration(format!(
                    "expected proposed state to be an object, got {}",
                    other
                )))
            }
        };

        let mut carried = BTreeSet::new();
        for (name, attr) in &self.schema.block.attributes {
            let unset = planned.get(name).map_or(true, Value::is_null);
            if !unset {
                continue;
            }
            if let Some(default) = attr.default.as_ref().filter(|_| attr.flags.is_user_settable()) {
                planned.insert(name.clone(), default.clone());
            } else if attr.flags.computed {
                if let Some(old) = prior.and_then(|p| p.get(name)) {
                    planned.insert(name.clone(), old.clone());
                    carried.insert(name.clone());
                }
            }
        }

        if let Some(prior) = prior {
            for (name, attr) in &self.schema.block.attributes {
                let Some(suppress) = attr.diff_suppress else {
                    continue;
                };
                if let (Some(old), Some(new)) = (prior.get(name), planned.get(name)) {
                    if old != new && suppress.suppress(old, new) {
                        planned.insert(name.clone(), old.clone());
                    }
                }
            }
            if let Some(id) = prior.get(ID) {
                planned.insert(ID.to_string(), id.clone());
            }
        }

        if self.tagged {
            let all = tags.effective(&KeyValueTags::from_value(planned.get(TAGS)));
            planned.insert(TAGS_ALL.to_string(), all.to_value());
        }

        let mut forced = BTreeSet::new();
        for hook in &self.customize_diff {
            let mut diff = ResourceDiff {
                schema: &self.schema,
                prior,
                planned: &mut planned,
                forced: &mut forced,
            };
            hook(&mut diff)?;
        }

        let changes = self.changes(prior, &planned, &forced);
        let requires_replace = prior.is_some() && changes.iter().any(|c| c.forces_new);
        if requires_replace {
            planned.remove(ID);
            // The replacement computes its own values, a generated name included.
            for (name, attr) in &self.schema.block.attributes {
                let stale = attr.flags.is_computed_only() || carried.contains(name);
                if stale && name != TAGS_ALL {
                    planned.remove(name);
                }
            }
        }

        Ok(PlanResult {
            planned_state: Value::Object(planned),
            changes,
            requires_replace,
        })
    }

    fn changes(
        &self,
        prior: Option<&Map<String, Value>>,
        planned: &Map<String, Value>,
        forced: &BTreeSet<String>,
    ) -> Vec<AttributeChange> {
        let present = |map: Option<&Map<String, Value>>, key: &str| {
            map.and_then(|m| m.get(key)).filter(|v| !v.is_null()).cloned()
        };
        let mut keys: BTreeSet<&String> = planned.keys().collect();
        if let Some(prior) = prior {
            keys.extend(prior.keys());
        }
        keys.into_iter()
            .filter(|k| k.as_str() != ID)
            .filter_map(|key| {
                let before = present(prior, key);
                let after = present(Some(planned), key);
                if before == after {
                    return None;
                }
                let change = AttributeChange::new(key.clone(), before, after);
                let forces_new = prior.is_some()
                    && (forced.contains(key.as_str())
                        || self.schema.attribute(key).is_some_and(|a| a.force_new));
                Some(if forces_new { change.forcing_new() } else { change })
            })
            .collect()
    }

    fn data(&self, state: &Value) -> Result<ResourceData, ProviderError> {
        ResourceData::from_state(state)?.with_timeouts(self.timeouts)
    }

    /// Create the remote object and return its refreshed state.
    ///
    /// A failure after the handler set the identifier is reported with
    /// that identifier, so the host can taint and delete the object.
    #[instrument(skip_all, fields(resource_type = %self.type_name))]
    pub async fn create(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let mut data = self.data(planned)?;
        data.clear_id();
        data.mark_new_resource();

        if let Err(e) = self.handler.create(meta, cancel, &mut data).await {
            return Err(self.wrap(data.id(), Operation::Create, e));
        }
        if data.id().is_empty() {
            return Err(self.wrap(
                "",
                Operation::Create,
                ProviderError::Sdk("create completed without setting an identifier".to_string()),
            ));
        }
        info!(id = %data.id(), "created");
        Ok(data.to_state_value())
    }

    /// Refresh state. Returns `Value::Null` when the remote object is gone.
    #[instrument(skip_all, fields(resource_type = %self.type_name))]
    pub async fn read(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        current: &Value,
    ) -> Result<Value, ProviderError> {
        let mut data = self.data(current)?;
        let id = data.id().to_string();
        let result = self.handler.read(meta, cancel, &mut data).await;
        handle_read_error(&self.type_name, &mut data, result)
            .map_err(|e| self.wrap(&id, Operation::Read, e))?;
        Ok(data.to_state_value())
    }

    /// Apply an in-place update and return the refreshed state.
    #[instrument(skip_all, fields(resource_type = %self.type_name))]
    pub async fn update(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        if !self.handler.supports_update() {
            return Err(ProviderError::Unimplemented(format!(
                "{} does not support in-place update",
                self.type_name
            )));
        }
        let mut data = ResourceData::for_update(prior, planned)?.with_timeouts(self.timeouts)?;
        let id = data.id().to_string();
        debug!(id = %id, changed = ?data.changed_keys(), "updating");

        match self.handler.update(meta, cancel, &mut data).await {
            Ok(()) => Ok(data.to_state_value()),
            Err(e) if errs::is_not_found(&e) => Err(ProviderError::ResourceGone {
                resource_type: self.type_name.clone(),
                id,
                source: Box::new(e),
            }),
            Err(e) => Err(self.wrap(&id, Operation::Update, e)),
        }
    }

    /// Destroy the remote object. A vanished object counts as deleted.
    #[instrument(skip_all, fields(resource_type = %self.type_name))]
    pub async fn delete(
        &self,
        meta: &ProviderMeta<C>,
        cancel: &CancellationToken,
        current: &Value,
    ) -> Result<(), ProviderError> {
        let mut data = self.data(current)?;
        let id = data.id().to_string();
        match self.handler.delete(meta, cancel, &mut data).await {
            Ok(()) => {
                info!(id = %id, "deleted");
                Ok(())
            }
            Err(e) if errs::is_not_found(&e) => {
                debug!(id = %id, "already gone");
                Ok(())
            }
            Err(e) => Err(self.wrap(&id, Operation::Delete, e)),
        }
    }

    /// Produce the partial states for `id`; the host completes them with Read.
    pub fn import(&self, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        match &self.importer {
            None => Err(ProviderError::Unimplemented(format!(
                "{} does not support import",
                self.type_name
            ))),
            Some(Importer::Passthrough) => {
                let mut state = Map::new();
                state.insert(ID.to_string(), Value::String(id.to_string()));
                Ok(vec![ImportedResource::new(&self.type_name, Value::Object(state))])
            }
            Some(Importer::Custom(f)) => {
                f(self, id).map_err(|e| self.wrap(id, Operation::Import, e))
            }
        }
    }
}

/// Apply the shared Read rule to a handler result: NotFound on an
/// established object clears the identifier and succeeds; on a new object
/// it is returned, since creation has not become visible yet.
pub fn handle_read_error(
    resource_type: &str,
    data: &mut ResourceData,
    result: Result<(), ProviderError>,
) -> Result<(), ProviderError> {
    match result {
        Err(e) if errs::is_not_found(&e) && !data.is_new_resource() => {
            warn!(
                resource_type,
                id = %data.id(),
                "resource not found, removing from state"
            );
            data.clear_id();
            Ok(())
        }
        other => other,
    }
}
