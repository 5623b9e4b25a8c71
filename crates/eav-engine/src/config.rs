use serde::{Deserialize, Serialize};

use eav_schema::SyncOptions;

use crate::error::{EngineError, EngineResult};

/// How a save writes value rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drop every value row of an existing entity and write the new set.
    #[default]
    DeleteInsert,
    /// Diff against the stored rows and write only the changes.
    ChangeTracking,
}

/// What a save does with an id that does not exist in the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEntityPolicy {
    #[default]
    Throw,
    /// Insert the entity under the supplied id.
    Insert,
    /// Skip the root graph containing it.
    Ignore,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Eager,
    Lazy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Partition of the props cache this engine reads and writes.
    pub cache_domain: String,
    pub strategy: Strategy,
    pub missing_entity: MissingEntityPolicy,
    pub load_mode: LoadMode,
    /// Return cached entities without checking their hash against the
    /// backend.
    pub trust_cache: bool,
    /// Delete structures whose field no longer exists.
    pub strict_schema: bool,
    /// Composite nesting bound for schemes and payloads.
    pub max_depth: usize,
    /// Entities deleted per purge transaction.
    pub purge_batch_size: usize,
    /// A running purge task without a heartbeat for this long is orphaned.
    pub purge_stale_after_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_domain: "default".into(),
            strategy: Strategy::default(),
            missing_entity: MissingEntityPolicy::default(),
            load_mode: LoadMode::default(),
            trust_cache: false,
            strict_schema: false,
            max_depth: 32,
            purge_batch_size: 500,
            purge_stale_after_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.cache_domain.is_empty() {
            return Err(EngineError::Config("cache_domain must not be empty".into()));
        }
        if self.purge_batch_size == 0 {
            return Err(EngineError::Config("purge_batch_size must be positive".into()));
        }
        if self.max_depth == 0 {
            return Err(EngineError::Config("max_depth must be positive".into()));
        }
        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            strict: self.strict_schema,
            max_depth: self.max_depth,
        }
    }

    pub fn purge_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.purge_stale_after_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.cache_domain, "default");
        assert_eq!(c.strategy, Strategy::DeleteInsert);
        assert_eq!(c.missing_entity, MissingEntityPolicy::Throw);
        assert_eq!(c.load_mode, LoadMode::Eager);
        assert!(!c.trust_cache);
        assert_eq!(c.max_depth, 32);
        assert_eq!(c.purge_batch_size, 500);
        assert_eq!(c.purge_stale_after(), chrono::Duration::seconds(300));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
            cache_domain = "tenant-7"
            strategy = "change_tracking"
            missing_entity = "ignore"
            "#,
        )
        .unwrap();
        assert_eq!(c.cache_domain, "tenant-7");
        assert_eq!(c.strategy, Strategy::ChangeTracking);
        assert_eq!(c.missing_entity, MissingEntityPolicy::Ignore);
        assert_eq!(c.load_mode, LoadMode::Eager);
        assert_eq!(c.purge_batch_size, 500);
    }

    #[test]
    fn toml_roundtrip() {
        let c = EngineConfig {
            load_mode: LoadMode::Lazy,
            trust_cache: true,
            ..EngineConfig::default()
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("strategy = \"upsert\""),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("purge_batch_size = 0"),
            Err(EngineError::Config(_))
        ));
    }
}
