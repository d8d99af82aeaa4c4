//! Manager configuration, usually read from a TOML file:
//!
//! ```toml
//! named_param_prefix = ":"
//! check_modified = true
//!
//! [files]
//! users = "sql/users.sql"
//!
//! [constants]
//! users_table = "test.users"
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for [`crate::SqlFileManager`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Alias to SQL file path.
    pub files: BTreeMap<String, PathBuf>,
    /// Values for `${name}` placeholders that no argument supplies.
    pub constants: HashMap<String, String>,
    /// Only UTF-8 is supported.
    pub charset: String,
    pub named_param_prefix: char,
    /// Fragment terminator.
    pub delimiter: String,
    /// Reload a file on access when its modification time changed.
    pub check_modified: bool,
    /// Absent arguments are errors instead of `null`.
    pub strict_args: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            constants: HashMap::new(),
            charset: "UTF-8".to_owned(),
            named_param_prefix: ':',
            delimiter: ";".to_owned(),
            check_modified: false,
            strict_args: true,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`; relative file paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| crate::Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            for file in config.files.values_mut() {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let prefix = self.named_param_prefix;
        if prefix.is_whitespace() || prefix.is_alphanumeric() || prefix == '_' {
            return Err(crate::Error::Config(format!(
                "invalid named parameter prefix '{prefix}'"
            )));
        }
        if self.delimiter.trim().is_empty() {
            return Err(crate::Error::Config("fragment delimiter must not be empty".to_owned()));
        }
        let charset = self.charset.to_ascii_uppercase();
        if charset != "UTF-8" && charset != "UTF8" {
            return Err(crate::Error::Config(format!(
                "unsupported charset '{}', only UTF-8 is supported",
                self.charset
            )));
        }
        if let Some(alias) = self.files.keys().find(|alias| alias.is_empty() || alias.contains('.')) {
            return Err(crate::Error::Config(format!("invalid file alias '{alias}'")));
        }
        Ok(())
    }

    pub fn with_file(mut self, alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(alias.into(), path.into());
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.named_param_prefix, ':');
        assert!(config.strict_args);
        assert!(!config.check_modified);
    }

    #[test]
    fn test_from_toml_str() {
        let config = ManagerConfig::from_toml_str(
            r#"
            named_param_prefix = "@"
            check_modified = true
            strict_args = false

            [files]
            users = "sql/users.sql"

            [constants]
            users_table = "test.users"
            "#,
        )
        .unwrap();
        assert_eq!(config.named_param_prefix, '@');
        assert_eq!(config.files["users"], PathBuf::from("sql/users.sql"));
        assert_eq!(config.constants["users_table"], "test.users");
        assert!(config.check_modified);
        assert!(!config.strict_args);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ManagerConfig::from_toml_str("named_param_prefix = \"a\""),
            Err(crate::Error::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_toml_str("charset = \"GBK\""),
            Err(crate::Error::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_toml_str("delimiter = \"\""),
            Err(crate::Error::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_toml_str("unknown = 1"),
            Err(crate::Error::ConfigFormat(_))
        ));
        let bad_alias = ManagerConfig::default().with_file("a.b", "x.sql");
        assert!(bad_alias.validate().is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sql.toml");
        fs::write(&path, "[files]\nusers = \"users.sql\"\nabs = \"/tmp/abs.sql\"\n").unwrap();
        let config = ManagerConfig::load(&path).unwrap();
        assert_eq!(config.files["users"], dir.path().join("users.sql"));
        assert_eq!(config.files["abs"], PathBuf::from("/tmp/abs.sql"));
    }
}
