//! Composite resource identifiers.
//!
//! Some resources have no single remote identifier, so the ID recorded in
//! state joins several parts with a separator. Formatting and parsing go
//! through one [`IdFormat`], so every format round-trips.

use crate::error::ProviderError;

/// Part names and separator of a composite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFormat {
    parts: &'static [&'static str],
    separator: &'static str,
}

impl IdFormat {
    /// A format with the given part names.
    pub const fn new(parts: &'static [&'static str], separator: &'static str) -> Self {
        Self { parts, separator }
    }

    /// Parts joined by `,`.
    pub const fn comma(parts: &'static [&'static str]) -> Self {
        Self::new(parts, ",")
    }

    /// Parts joined by `:`.
    pub const fn colon(parts: &'static [&'static str]) -> Self {
        Self::new(parts, ":")
    }

    /// Part names.
    pub fn parts(&self) -> &'static [&'static str] {
        self.parts
    }

    /// The separator.
    pub fn separator(&self) -> &'static str {
        self.separator
    }

    /// The expected shape, e.g. `NAME,ACCOUNT,REGION`.
    pub fn shape(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.to_uppercase())
            .collect::<Vec<_>>()
            .join(self.separator)
    }

    /// Join `values` into an identifier.
    ///
    /// Fails when the number of values is wrong, a value is empty, or a value
    /// contains the separator, since the result would not parse back.
    pub fn format<S: AsRef<str>>(&self, values: &[S]) -> Result<String, ProviderError> {
        if values.len() != self.parts.len() {
            return Err(ProviderError::InvalidId(format!(
                "expected {} parts for {}, got {}",
                self.parts.len(),
                self.shape(),
                values.len()
            )));
        }
        for (name, value) in self.parts.iter().zip(values) {
            let value = value.as_ref();
            if value.is_empty() || value.contains(self.separator) {
                return Err(ProviderError::InvalidId(format!(
                    "invalid {} part {:?} for {}",
                    name,
                    value,
                    self.shape()
                )));
            }
        }
        Ok(values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(self.separator))
    }

    /// Split an identifier into its parts.
    pub fn parse(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        let parts: Vec<&str> = id.split(self.separator).collect();
        if parts.len() != self.parts.len() || parts.iter().any(|p| p.is_empty()) {
            return Err(ProviderError::InvalidId(format!(
                "expected {}, got '{}'",
                self.shape(),
                id
            )));
        }
        Ok(parts.into_iter().map(str::to_string).collect())
    }

    /// [`IdFormat::parse`] for a fixed number of parts.
    pub fn parse_array<const N: usize>(&self, id: &str) -> Result<[String; N], ProviderError> {
        let parts = self.parse(id)?;
        parts.try_into().map_err(|parts: Vec<String>| {
            ProviderError::InvalidId(format!(
                "format {} has {} parts, caller expected {}",
                self.shape(),
                parts.len(),
                N
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK_INSTANCE: IdFormat = IdFormat::comma(&["name", "account", "region"]);

    #[test]
    fn test_stack_instance_id() {
        let id = STACK_INSTANCE
            .format(&["stack1", "123456789012", "us-west-2"])
            .unwrap();
        assert_eq!(id, "stack1,123456789012,us-west-2");

        let [name, account, region] = STACK_INSTANCE.parse_array(&id).unwrap();
        assert_eq!(
            (name.as_str(), account.as_str(), region.as_str()),
            ("stack1", "123456789012", "us-west-2")
        );

        let err = STACK_INSTANCE.parse("stack1,,us-west-2").unwrap_err();
        assert!(err.to_string().contains("expected NAME,ACCOUNT,REGION"), "{err}");

        let err = STACK_INSTANCE.parse("foo").unwrap_err();
        assert!(
            err.to_string()
                .contains("expected NAME,ACCOUNT,REGION, got 'foo'"),
            "{err}"
        );
    }

    #[test]
    fn test_format_rejects_unparseable_parts() {
        assert!(STACK_INSTANCE.format(&["a", "b"]).is_err());
        assert!(STACK_INSTANCE.format(&["a,b", "c", "d"]).is_err());
        assert!(STACK_INSTANCE.format(&["", "c", "d"]).is_err());
    }

    #[test]
    fn test_colon_format() {
        let format = IdFormat::colon(&["cluster", "profile"]);
        assert_eq!(format.shape(), "CLUSTER:PROFILE");
        let id = format.format(&["prod", "default"]).unwrap();
        assert_eq!(format.parse(&id).unwrap(), vec!["prod", "default"]);
        assert!(format.parse("prod:default:extra").is_err());
        assert!(format.parse_array::<3>(&id).is_err());
    }
}
