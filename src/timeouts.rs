//! Per-operation timeouts.
//!
//! Every resource kind declares a default per operation. Users override them
//! in a `timeouts` block holding duration strings such as `"30m"` or `"1h30m"`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock};
use crate::types::Operation;

/// The attribute holding user overrides.
pub const TIMEOUTS: &str = "timeouts";

/// Default for every operation when a kind declares nothing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Timeouts for the four lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTimeouts {
    /// Create budget.
    pub create: Duration,
    /// Read budget.
    pub read: Duration,
    /// Update budget.
    pub update: Duration,
    /// Delete budget.
    pub delete: Duration,
}

impl Default for ResourceTimeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
            update: DEFAULT_TIMEOUT,
            delete: DEFAULT_TIMEOUT,
        }
    }
}

impl ResourceTimeouts {
    /// Set the create default.
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    /// Set the read default.
    pub fn with_read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }

    /// Set the update default.
    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    /// Set the delete default.
    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    /// The budget for `operation`. Operations without their own timeout
    /// use the read budget.
    pub fn get(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            _ => self.read,
        }
    }

    /// Apply the overrides from a `timeouts` block value.
    pub fn with_overrides(mut self, block: Option<&Value>) -> Result<Self, ProviderError> {
        let Some(obj) = block.and_then(Value::as_object) else {
            return Ok(self);
        };
        for (key, value) in obj {
            let Some(text) = value.as_str() else {
                continue;
            };
            let duration = parse_duration(text)?;
            match key.as_str() {
                "create" => self.create = duration,
                "read" => self.read = duration,
                "update" => self.update = duration,
                "delete" => self.delete = duration,
                other => {
                    return Err(ProviderError::Configuration(format!(
                        "unsupported timeout key '{}'",
                        other
                    )))
                }
            }
        }
        Ok(self)
    }

    /// The `timeouts` block declared on resources that have an Update
    /// handler (`update == true`) or not.
    pub fn block(update: bool) -> NestedBlock {
        let mut block = Block::new()
            .with_attribute("create", Attribute::optional_string())
            .with_attribute("read", Attribute::optional_string())
            .with_attribute("delete", Attribute::optional_string());
        if update {
            block = block.with_attribute("update", Attribute::optional_string());
        }
        NestedBlock::single(block)
    }
}

/// Parse a duration string made of `<number><unit>` segments.
///
/// Units are `h`, `m`, `s` and `ms`, e.g. `"1h30m"`, `"45s"`, `"500ms"`.
pub fn parse_duration(text: &str) -> Result<Duration, ProviderError> {
    let invalid = || ProviderError::Configuration(format!("invalid duration '{}'", text));

    let text = text.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let millis = match &rest[..unit_len] {
            "h" => 3_600_000.0,
            "m" => 60_000.0,
            "s" => 1_000.0,
            "ms" => 1.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += Duration::from_millis((number * millis).round() as u64);
    }
    Ok(total)
}
