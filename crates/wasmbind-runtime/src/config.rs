//! Binding configuration.

use serde::{Deserialize, Serialize};
use wasmbind_types::abi::{EXPORT_PREFIX, METADATA_SECTION};

use crate::error::{BindError, BindResult};

/// Default ceiling for host-initiated memory growth (64 KB per page).
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 1024; // 64 MB

/// Hard wasm32 limit.
const WASM32_MAX_PAGES: u32 = 65_536;

/// How scalar values are composed from linear-memory bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStyle {
    /// Host-native byte order. Only correct on little-endian hosts.
    Native,
    /// Explicit little-endian composition on every access.
    #[default]
    LittleEndian,
}

/// Configuration for binding modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Memory view strategy used by the codec.
    pub access_style: AccessStyle,
    /// Prefix marking wrapped exports.
    pub export_prefix: String,
    /// Name of the custom section holding the signature table.
    pub metadata_section: String,
    /// Whether to cache compiled modules by content digest.
    pub cache_modules: bool,
    /// Maximum memory size, in pages, the host may grow a region to.
    pub max_memory_pages: u32,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            access_style: AccessStyle::default(),
            export_prefix: EXPORT_PREFIX.to_string(),
            metadata_section: METADATA_SECTION.to_string(),
            cache_modules: true,
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
        }
    }
}

impl BindingConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> BindResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BindError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> BindResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BindError::Config(e.to_string()))
    }

    /// Set the memory access strategy.
    pub fn with_access_style(mut self, style: AccessStyle) -> Self {
        self.access_style = style;
        self
    }

    /// Set the wrapped export prefix.
    pub fn with_export_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.export_prefix = prefix.into();
        self
    }

    /// Set the metadata custom section name.
    pub fn with_metadata_section(mut self, name: impl Into<String>) -> Self {
        self.metadata_section = name.into();
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Set maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    pub fn validate(&self) -> BindResult<()> {
        if self.export_prefix.is_empty() {
            return Err(BindError::Config("export prefix must not be empty".into()));
        }
        if self.metadata_section.is_empty() {
            return Err(BindError::Config(
                "metadata section name must not be empty".into(),
            ));
        }
        if self.max_memory_pages == 0 || self.max_memory_pages > WASM32_MAX_PAGES {
            return Err(BindError::Config(format!(
                "max_memory_pages must be within 1..={WASM32_MAX_PAGES}, got {}",
                self.max_memory_pages
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BindingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.access_style, AccessStyle::LittleEndian);
        assert_eq!(config.export_prefix, "__wasmbind_");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = BindingConfig::from_json_str(r#"{"access_style":"native"}"#).unwrap();
        assert_eq!(config.access_style, AccessStyle::Native);
        assert_eq!(config.metadata_section, "wasmbind");
        assert!(config.cache_modules);
    }

    #[test]
    fn json_roundtrip() {
        let config = BindingConfig::default()
            .with_cache(false)
            .with_max_memory_pages(16)
            .with_export_prefix("__js_fn_");
        let back = BindingConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = BindingConfig::from_json_str(r#"{"max_memory_pages":0}"#).unwrap_err();
        assert!(matches!(err, BindError::Config(_)));
        let err = BindingConfig::from_json_str(r#"{"access_style":"big_endian"}"#).unwrap_err();
        assert!(matches!(err, BindError::Config(_)));
        assert!(BindingConfig::default()
            .with_export_prefix("")
            .validate()
            .is_err());
    }
}
