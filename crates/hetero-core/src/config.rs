//! Process-level runtime settings read from the environment

use std::env;
use std::path::PathBuf;

/// Default mode descriptor for [`Device::from_env`](crate::Device::from_env).
pub const DEVICE_VAR: &str = "HETERO_DEVICE";
/// Directory of the on-disk translation cache.
pub const CACHE_DIR_VAR: &str = "HETERO_CACHE_DIR";
/// Log kernel builds at info level.
pub const VERBOSE_VAR: &str = "HETERO_VERBOSE";

/// Settings shared by every device a process creates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Mode descriptor text used when a caller does not name one
    pub device: Option<String>,

    /// Translations are persisted here so new devices skip the translator
    pub cache_dir: Option<PathBuf>,

    /// Report every kernel build at info level instead of debug
    pub verbose: bool,
}

impl RuntimeConfig {
    /// Build a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HETERO_DEVICE` - mode descriptor, e.g. `{mode: 'OpenMP'}` or `CUDA`
    /// - `HETERO_CACHE_DIR` - enables the on-disk translation cache
    /// - `HETERO_VERBOSE` - `true`/`1`/`yes` logs kernel builds at info level
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|value| !value.trim().is_empty());
        Self {
            device: non_empty(DEVICE_VAR),
            cache_dir: non_empty(CACHE_DIR_VAR).map(PathBuf::from),
            verbose: non_empty(VERBOSE_VAR)
                .map(|v| {
                    let v = v.trim();
                    v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes")
                })
                .unwrap_or(false),
        }
    }

    /// The mode descriptor text, `Serial` when none is configured.
    pub fn mode(&self) -> &str {
        self.device.as_deref().unwrap_or("Serial")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_env() {
        for key in [DEVICE_VAR, CACHE_DIR_VAR, VERBOSE_VAR] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        reset_env();
        let config = RuntimeConfig::from_env();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.mode(), "Serial");
    }

    #[test]
    #[serial]
    fn test_reads_environment() {
        reset_env();
        env::set_var(DEVICE_VAR, "{mode: 'OpenMP'}");
        env::set_var(CACHE_DIR_VAR, "/tmp/hetero-cache");
        env::set_var(VERBOSE_VAR, "YES");

        let config = RuntimeConfig::from_env();
        assert_eq!(config.mode(), "{mode: 'OpenMP'}");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/hetero-cache")));
        assert!(config.verbose);
        reset_env();
    }

    #[test]
    #[serial]
    fn test_blank_values_are_ignored() {
        reset_env();
        env::set_var(DEVICE_VAR, "  ");
        env::set_var(VERBOSE_VAR, "0");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.device, None);
        assert!(!config.verbose);
        reset_env();
    }
}
