use anyhow::Result;
use colored::Colorize;
use std::collections::HashSet;
use std::path::Path;

/// Flags configuration fields depsnap does not know about, which are most
/// often typos that would otherwise be silently ignored.
pub struct ConfigValidator {
    known_fields: HashSet<&'static str>,
}

const KNOWN_FIELDS: &[&str] = &[
    "store.type",
    "store.path",
    "store.compression_level",
    "trace.follow_subprocesses",
    "trace.filter_calls",
    "trace.default_blacklist",
    "trace.include_project_dir",
    "trace.timeout",
    "trace.tracer_path",
    "manifest.file",
];

impl ConfigValidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_fields: KNOWN_FIELDS.iter().copied().collect(),
        }
    }

    /// Returns the dotted keys in `config_path` that are not recognized.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn unknown_fields(&self, config_path: &Path) -> Result<Vec<String>> {
        if !config_path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(config_path)?;
        let parsed: toml::Table = toml::from_str(&content)?;

        let mut unknown = Vec::new();
        self.check_table(&parsed, "", &mut unknown);
        unknown.sort();
        Ok(unknown)
    }

    /// Prints a warning block for every unknown field.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn validate_config_file(&self, config_path: &Path) -> Result<()> {
        let unknown = self.unknown_fields(config_path)?;
        if unknown.is_empty() {
            return Ok(());
        }

        eprintln!("{}", "Configuration warnings:".yellow().bold());
        for field in &unknown {
            tracing::debug!(field, "unknown configuration field");
            eprintln!("  Unknown configuration field: {}", field.yellow());
        }
        eprintln!();
        Ok(())
    }

    fn check_table(&self, table: &toml::Table, prefix: &str, unknown: &mut Vec<String>) {
        for (key, value) in table {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            match value {
                toml::Value::Table(nested) if prefix.is_empty() => {
                    self.check_table(nested, &full_key, unknown);
                }
                _ if self.known_fields.contains(full_key.as_str()) => {}
                _ => unknown.push(full_key),
            }
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_known_fields_pass() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[store]\ntype = \"local\"\n\n[trace]\ntimeout = \"5m\"\n\n[manifest]\nfile = \"x\"\n",
        )?;
        assert!(ConfigValidator::new().unknown_fields(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_typos_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "stray = 1\n\n[store]\ncompresion_level = 3\n\n[trace]\nfollow_subprocess = true\n",
        )?;
        let unknown = ConfigValidator::new().unknown_fields(&path)?;
        assert_eq!(
            unknown,
            vec!["store.compresion_level", "stray", "trace.follow_subprocess"]
        );
        Ok(())
    }

    #[test]
    fn test_missing_file_is_fine() -> Result<()> {
        let dir = tempdir()?;
        let validator = ConfigValidator::default();
        assert!(validator.unknown_fields(&dir.path().join("none.toml"))?.is_empty());
        validator.validate_config_file(&dir.path().join("none.toml"))
    }
}
