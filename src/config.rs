//! Settings for the scratch memory and the emulated host.

use serde_derive::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::memory::DEFAULT_ALIGN;

/// Configuration used to build a [`crate::Syscalls`].
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration:
///
/// ```toml
/// scratch-size = 65536
/// memory-origin = 0x10000
/// poison-on-release = true
/// emulator-seed = 7
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Bytes of linear memory reserved for scoped allocations.
    pub scratch_size: u32,
    /// Host-visible address of the first scratch byte when memory is emulated.
    pub memory_origin: u32,
    /// Overwrite released scratch bytes so stale reads cannot observe them.
    pub poison_on_release: bool,
    /// Seed for descriptor numbering in the emulated host; random if unset.
    pub emulator_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            scratch_size: 64 * 1024,
            memory_origin: 0x1_0000,
            poison_on_release: true,
            emulator_seed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn scratch_size(&mut self, bytes: u32) -> &mut Self {
        self.scratch_size = bytes;
        self
    }

    pub fn memory_origin(&mut self, origin: u32) -> &mut Self {
        self.memory_origin = origin;
        self
    }

    pub fn poison_on_release(&mut self, enable: bool) -> &mut Self {
        self.poison_on_release = enable;
        self
    }

    pub fn emulator_seed(&mut self, seed: u64) -> &mut Self {
        self.emulator_seed = Some(seed);
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(source: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Config::from_toml(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scratch_size == 0 {
            return Err(ConfigError::Invalid("scratch-size must be nonzero".into()));
        }
        if self.scratch_size % DEFAULT_ALIGN != 0 || self.memory_origin % DEFAULT_ALIGN != 0 {
            return Err(ConfigError::Invalid(format!(
                "scratch-size and memory-origin must be multiples of {DEFAULT_ALIGN}"
            )));
        }
        if self.memory_origin.checked_add(self.scratch_size).is_none() {
            return Err(ConfigError::Invalid(format!(
                "{} bytes at {:#x} overflow the 32-bit address space",
                self.scratch_size, self.memory_origin
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn parse_all_fields() {
        let config = Config::from_toml(
            r#"
                scratch-size = 4096
                memory-origin = 0x2000
                poison-on-release = false
                emulator-seed = 42
            "#,
        )
        .unwrap();
        let mut expected = Config::new();
        expected
            .scratch_size(4096)
            .memory_origin(0x2000)
            .poison_on_release(false)
            .emulator_seed(42);
        assert_eq!(config, expected);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::from_toml("scratch = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_values() {
        for source in [
            "scratch-size = 0",
            "scratch-size = 12",
            "memory-origin = 3",
            "memory-origin = 4294967288\nscratch-size = 16",
        ] {
            assert!(
                matches!(Config::from_toml(source), Err(ConfigError::Invalid(_))),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scratch-size = 1024").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.scratch_size, 1024);
        assert_eq!(config.memory_origin, Config::default().memory_origin);
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/wasi-scoped-calls.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
