//! Baseline compiler configuration

use serde::Deserialize;

/// Errors raised while loading a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Configuration for the baseline compiler
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    /// Scripts longer than this many bytes are not compiled (default: 1 MiB)
    pub max_script_length: usize,
    /// Maximum IC entries per compiled method (default: 65536)
    pub max_ic_entries: usize,
    /// Maximum stubs per method's stub space, fallbacks included (default: 65536)
    pub stub_space_limit: usize,
    /// Capacity of the shared code pool, in instructions (default: 16M)
    pub code_pool_limit: usize,
    /// Nesting limit enforced by the prologue stack check (default: 1000)
    pub max_native_depth: u32,
    /// Sync the whole operand stack before every opcode (default: false)
    pub debug_mode: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            max_script_length: 0x10_0000,
            max_ic_entries: 0x1_0000,
            stub_space_limit: 0x1_0000,
            code_pool_limit: 0x100_0000,
            max_native_depth: 1000,
            debug_mode: false,
        }
    }
}

impl JitConfig {
    /// Parse a configuration from TOML, filling unspecified fields with defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: JitConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the limits leave room to compile anything at all
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_script_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_script_length",
                reason: "must be positive",
            });
        }
        if self.code_pool_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "code_pool_limit",
                reason: "must be positive",
            });
        }
        if self.stub_space_limit < self.max_ic_entries.min(1) {
            return Err(ConfigError::Invalid {
                field: "stub_space_limit",
                reason: "must hold at least one fallback stub",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JitConfig::default();
        assert_eq!(config.max_script_length, 1 << 20);
        assert!(!config.debug_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = JitConfig::from_toml_str(
            r#"
            max_ic_entries = 8
            debug_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_ic_entries, 8);
        assert!(config.debug_mode);
        assert_eq!(config.max_native_depth, JitConfig::default().max_native_depth);
    }

    #[test]
    fn test_from_toml_rejects_unknown_field() {
        assert!(matches!(
            JitConfig::from_toml_str("max_ic_entires = 8"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_toml_rejects_zero_pool() {
        assert!(matches!(
            JitConfig::from_toml_str("code_pool_limit = 0"),
            Err(ConfigError::Invalid { field: "code_pool_limit", .. })
        ));
    }

    #[test]
    fn test_struct_update_syntax() {
        let config = JitConfig {
            max_native_depth: 4,
            ..Default::default()
        };
        assert_eq!(config.max_native_depth, 4);
        assert_eq!(config.max_ic_entries, 0x1_0000);
    }
}
