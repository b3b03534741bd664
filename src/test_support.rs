//! In-memory cloud and a sample resource kind for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::conns::{ClientFactory, ProviderMeta};
use crate::data::ResourceData;
use crate::error::{ProviderError, RemoteError};
use crate::finder::translate_not_found;
use crate::paginate::Page;
use crate::resource::{Importer, Resource, ResourceHandler};
use crate::retry::retry_when_new_resource_not_found;
use crate::schema::{Attribute, DiffSuppress, Schema, Validator};
use crate::tags::{KeyValueTags, TagClient, TAGS, TAGS_ALL};
use crate::timeouts::ResourceTimeouts;
use crate::types::Operation;
use crate::waiter::StateChangeConf;

/// A remote widget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Widget {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub color: Option<String>,
    pub status: String,
    pub tags: KeyValueTags,
}

#[derive(Default)]
struct Inner {
    widgets: Mutex<BTreeMap<String, Widget>>,
    next_id: AtomicU64,
    fail_next: Mutex<Option<RemoteError>>,
    fail_reads_after_create: AtomicBool,
    throttled_deletes: AtomicU32,
    calls: Mutex<Vec<String>>,
}

/// A widget service kept in memory. Clones share state.
#[derive(Clone, Default)]
pub struct FakeCloud {
    inner: Arc<Inner>,
}

fn widget_not_found(id: &str) -> ProviderError {
    RemoteError::new(
        "ResourceNotFoundException",
        format!("Widget {} does not exist", id),
    )
    .with_status(404)
    .into()
}

impl FakeCloud {
    fn record(&self, call: String) -> Result<(), ProviderError> {
        self.inner.calls.lock().unwrap().push(call);
        match self.inner.fail_next.lock().unwrap().take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Make the next call fail with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        *self.inner.fail_next.lock().unwrap() = Some(err);
    }

    /// Make every describe after a create fail.
    pub fn fail_reads_after_create(&self) {
        self.inner.fail_reads_after_create.store(true, Ordering::SeqCst);
    }

    /// Throttle the next `count` deletes.
    pub fn throttle_deletes(&self, count: u32) {
        self.inner.throttled_deletes.store(count, Ordering::SeqCst);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Add a widget directly, bypassing the API.
    pub fn insert(&self, widget: Widget) {
        self.inner
            .widgets
            .lock()
            .unwrap()
            .insert(widget.id.clone(), widget);
    }

    /// The stored widget, without going through the API.
    pub fn get(&self, id: &str) -> Option<Widget> {
        self.inner.widgets.lock().unwrap().get(id).cloned()
    }

    /// Number of stored widgets.
    pub fn len(&self) -> usize {
        self.inner.widgets.lock().unwrap().len()
    }

    pub async fn create_widget(
        &self,
        name: &str,
        size: i64,
        color: Option<String>,
        tags: KeyValueTags,
    ) -> Result<String, ProviderError> {
        self.record(format!("CreateWidget {}", name))?;
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("w-{:04}", n);
        self.insert(Widget {
            id: id.clone(),
            name: name.to_string(),
            size,
            color,
            status: "creating".to_string(),
            tags,
        });
        Ok(id)
    }

    /// Widgets report `creating` once after creation, then `ready`.
    pub async fn describe_widget(&self, id: &str) -> Result<Widget, ProviderError> {
        self.record(format!("DescribeWidget {}", id))?;
        if self.inner.fail_reads_after_create.load(Ordering::SeqCst) {
            return Err(RemoteError::new("InternalFailure", "service unavailable")
                .with_status(500)
                .into());
        }
        let mut widgets = self.inner.widgets.lock().unwrap();
        let widget = widgets.get_mut(id).ok_or_else(|| widget_not_found(id))?;
        let observed = widget.clone();
        if widget.status == "creating" {
            widget.status = "ready".to_string();
        }
        Ok(observed)
    }

    pub async fn modify_widget(
        &self,
        id: &str,
        size: i64,
        color: Option<String>,
    ) -> Result<(), ProviderError> {
        self.record(format!("ModifyWidget {}", id))?;
        let mut widgets = self.inner.widgets.lock().unwrap();
        let widget = widgets.get_mut(id).ok_or_else(|| widget_not_found(id))?;
        widget.size = size;
        widget.color = color;
        Ok(())
    }

    pub async fn delete_widget(&self, id: &str) -> Result<(), ProviderError> {
        self.record(format!("DeleteWidget {}", id))?;
        let throttled = self
            .inner
            .throttled_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(RemoteError::new("Throttling", "Rate exceeded")
                .with_status(400)
                .into());
        }
        self.inner
            .widgets
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| widget_not_found(id))
    }

    /// Two widgets per page.
    pub async fn list_widgets(&self, token: Option<String>) -> Result<Page<Widget>, ProviderError> {
        self.record(format!("ListWidgets {}", token.as_deref().unwrap_or("-")))?;
        let widgets = self.inner.widgets.lock().unwrap();
        let start = token.as_deref().map_or(0, |t| t.parse().unwrap_or(0));
        let items: Vec<Widget> = widgets.values().skip(start).take(2).cloned().collect();
        let next = (start + 2 < widgets.len()).then(|| (start + 2).to_string());
        Ok(Page::new(items, next))
    }
}

#[async_trait]
impl TagClient for FakeCloud {
    async fn tag_resource(&self, id: &str, tags: &KeyValueTags) -> Result<(), ProviderError> {
        self.record(format!("TagResource {}", id))?;
        let mut widgets = self.inner.widgets.lock().unwrap();
        let widget = widgets.get_mut(id).ok_or_else(|| widget_not_found(id))?;
        for (k, v) in tags.iter() {
            widget.tags.insert(k, v);
        }
        Ok(())
    }

    async fn untag_resource(&self, id: &str, keys: &[String]) -> Result<(), ProviderError> {
        self.record(format!("UntagResource {}", id))?;
        let mut widgets = self.inner.widgets.lock().unwrap();
        let widget = widgets.get_mut(id).ok_or_else(|| widget_not_found(id))?;
        widget.tags = widget
            .tags
            .iter()
            .filter(|(k, _)| !keys.iter().any(|key| key.as_str() == *k))
            .collect();
        Ok(())
    }
}

/// The finder for widgets.
pub async fn find_widget_by_id(cloud: &FakeCloud, id: &str) -> Result<Widget, ProviderError> {
    cloud
        .describe_widget(id)
        .await
        .map_err(|e| translate_not_found(e, Some(json!({"WidgetId": id}))))
}

/// Handler for `aws_widget`.
pub struct WidgetHandler;

#[async_trait]
impl ResourceHandler<FakeCloud> for WidgetHandler {
    async fn create(
        &self,
        meta: &ProviderMeta<FakeCloud>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let name = data.get_str("name").unwrap_or_default().to_string();
        let size = data.get_i64("size").unwrap_or(1);
        let color = data.get_str("color").map(str::to_string);
        let tags = meta.tags.tags_for_create(data);

        let id = meta.client.create_widget(&name, size, color, tags).await?;
        data.set_id(&id);

        let cloud = &meta.client;
        let id = id.as_str();
        StateChangeConf::new(&["creating"], &["ready"], data.timeout(Operation::Create))
            .with_poll_interval(Duration::from_millis(1))
            .wait_for_state(cancel, move || async move {
                let widget = find_widget_by_id(cloud, id).await?;
                let status = widget.status.clone();
                Ok::<_, ProviderError>(Some((widget, status)))
            })
            .await?;

        self.read(meta, cancel, data).await
    }

    async fn read(
        &self,
        meta: &ProviderMeta<FakeCloud>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let id = data.id().to_string();
        let widget = retry_when_new_resource_not_found(
            data.timeout(Operation::Read),
            cancel,
            data.is_new_resource(),
            || find_widget_by_id(&meta.client, &id),
        )
        .await?;

        data.set("name", &widget.name)?;
        data.set("size", widget.size)?;
        data.set("color", &widget.color)?;
        data.set("status", &widget.status)?;
        data.set("arn", meta.arn("widgets", &format!("widget/{}", id)))?;
        meta.tags.set_tags_out(data, &widget.tags)
    }

    async fn update(
        &self,
        meta: &ProviderMeta<FakeCloud>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let id = data.id().to_string();
        if data.has_changes(&["size", "color"]) {
            let size = data.get_i64("size").unwrap_or(1);
            let color = data.get_str("color").map(str::to_string);
            meta.client
                .modify_widget(&id, size, color)
                .await
                .map_err(|e| translate_not_found(e, None))?;
        }
        if data.has_changes(&[TAGS, TAGS_ALL]) {
            meta.tags
                .update_from_data(&meta.client, &id, data)
                .await
                .map_err(|e| translate_not_found(e, None))?;
        }
        self.read(meta, cancel, data).await
    }

    async fn delete(
        &self,
        meta: &ProviderMeta<FakeCloud>,
        cancel: &CancellationToken,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let id = data.id().to_string();
        meta.client
            .delete_widget(&id)
            .await
            .map_err(|e| translate_not_found(e, None))?;

        let cloud = &meta.client;
        let id = id.as_str();
        StateChangeConf::new(&["deleting"], &["deleted"], data.timeout(Operation::Delete))
            .with_poll_interval(Duration::from_millis(1))
            .with_not_found_checks(1)
            .wait_for_state(cancel, move || async move {
                let widget = find_widget_by_id(cloud, id).await?;
                Ok::<_, ProviderError>(Some((widget, "deleting".to_string())))
            })
            .await?;
        Ok(())
    }

    fn supports_update(&self) -> bool {
        true
    }
}

/// The schema of `aws_widget`, before tags and timeouts are added.
pub fn widget_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::string_len_between(1, 64)),
        )
        .with_attribute(
            "size",
            Attribute::optional_int64()
                .with_default(json!(1))
                .with_validator(Validator::int_between(1, 16)),
        )
        .with_attribute(
            "color",
            Attribute::optional_string().with_diff_suppress(DiffSuppress::CaseInsensitive),
        )
        .with_attribute("arn", Attribute::computed_string())
        .with_attribute("status", Attribute::computed_string())
}

/// The `aws_widget` descriptor.
pub fn widget_resource() -> Resource<FakeCloud> {
    Resource::new("aws_widget", widget_schema(), WidgetHandler)
        .with_tags()
        .with_timeouts(ResourceTimeouts::default().with_create(Duration::from_secs(10 * 60)))
        .with_importer(Importer::Passthrough)
}

/// Hands out clones of one [`FakeCloud`].
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub cloud: FakeCloud,
}

#[async_trait]
impl ClientFactory for FakeFactory {
    type Client = FakeCloud;

    async fn connect(
        &self,
        _config: &ProviderConfig,
        _region: &str,
    ) -> Result<FakeCloud, ProviderError> {
        Ok(self.cloud.clone())
    }

    async fn caller_account_id(&self, _client: &FakeCloud) -> Result<Option<String>, ProviderError> {
        Ok(Some("123456789012".to_string()))
    }
}
