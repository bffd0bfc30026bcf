//! CLI configuration, loaded from an optional `toml`-parsed file and
//! layered under `clap` flags: a plain struct with a `Default` impl and
//! explicit field-by-field parsing rather than a `serde`-derived schema,
//! since the workspace doesn't otherwise pull in `serde`.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone)]
pub struct WeftConfig {
    /// Additional source files run (in order) before the main script, in
    /// the same `Vm`.
    pub modules: Vec<PathBuf>,
    /// Default for `--dump-bytecode` when the flag isn't passed explicitly.
    pub dump_bytecode: bool,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl WeftConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
        let table: toml::Value = text
            .parse()
            .map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))?;

        let mut config = WeftConfig::default();
        if let Some(modules) = table.get("modules").and_then(toml::Value::as_array) {
            for m in modules {
                let s = m
                    .as_str()
                    .ok_or_else(|| ConfigError("`modules` entries must be strings".to_string()))?;
                config.modules.push(PathBuf::from(s));
            }
        }
        if let Some(dump) = table.get("dump_bytecode").and_then(toml::Value::as_bool) {
            config.dump_bytecode = dump;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_modules_and_flags_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "modules = [\"a.weft\", \"b.weft\"]\ndump_bytecode = true").unwrap();
        let config = WeftConfig::load(file.path()).unwrap();
        assert_eq!(config.modules, vec![PathBuf::from("a.weft"), PathBuf::from("b.weft")]);
        assert!(config.dump_bytecode);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# empty config").unwrap();
        let config = WeftConfig::load(file.path()).unwrap();
        assert!(config.modules.is_empty());
        assert!(!config.dump_bytecode);
    }
}
