// providers/src/config.rs

//! YAML runtime settings for containers.

use crate::error::{Error, Result};
use crate::scope::Scope;

use serde::Deserialize;

use std::fs::File as StdFsFile;
use std::io;
use std::path::Path;

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TeardownConfig {
  /// Whether a sync teardown that meets an async finalizer fails instead
  /// of skipping it.
  #[serde(default = "default_raise_on_async")]
  pub raise_on_async: bool,
}

fn default_raise_on_async() -> bool {
  true
}

impl Default for TeardownConfig {
  fn default() -> Self {
    Self {
      raise_on_async: default_raise_on_async(),
    }
  }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
  #[serde(default)]
  pub tear_down_children: bool,
}

/// Settings consumed by [`crate::Container::from_config`].
///
/// ```yaml
/// default_scope: REQUEST
/// teardown:
///   raise_on_async: false
/// overrides:
///   tear_down_children: true
/// ```
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
  #[serde(default)]
  pub default_scope: Option<String>,
  #[serde(default)]
  pub teardown: TeardownConfig,
  #[serde(default)]
  pub overrides: OverrideConfig,
}

impl RuntimeConfig {
  pub fn from_yaml_str(source: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(source)?)
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    tracing::debug!(path = ?path, "loading runtime config");
    let file = StdFsFile::open(path)?;
    let reader = io::BufReader::new(file);
    serde_yaml::from_reader(reader).map_err(|e| Error::ConfigParse(e.to_string()))
  }

  /// The configured default scope. `ANY` is not a valid default.
  pub fn default_scope(&self) -> Result<Option<Scope>> {
    match self.default_scope.as_deref().map(str::trim) {
      None | Some("") => Ok(None),
      Some(name) => {
        let scope = Scope::new(name.to_string());
        if scope.is_any() {
          return Err(Error::InvalidConfigValue {
            field: "default_scope".to_string(),
            message: "ANY cannot be used as a default scope".to_string(),
          });
        }
        Ok(Some(scope))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_document_uses_defaults() {
    let config = RuntimeConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, RuntimeConfig::default());
    assert!(config.teardown.raise_on_async);
    assert!(!config.overrides.tear_down_children);
    assert!(config.default_scope().unwrap().is_none());
  }

  #[test]
  fn parses_every_section() {
    let yaml = r#"
default_scope: REQUEST
teardown:
  raise_on_async: false
overrides:
  tear_down_children: true
"#;
    let config = RuntimeConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.default_scope().unwrap(), Some(Scope::REQUEST));
    assert!(!config.teardown.raise_on_async);
    assert!(config.overrides.tear_down_children);
  }

  #[test]
  fn any_is_rejected_as_default_scope() {
    let config = RuntimeConfig::from_yaml_str("default_scope: ANY").unwrap();
    assert!(matches!(
      config.default_scope(),
      Err(Error::InvalidConfigValue { ref field, .. }) if field == "default_scope"
    ));
  }

  #[test]
  fn unknown_fields_fail_to_parse() {
    let err = RuntimeConfig::from_yaml_str("default_scop: APP").unwrap_err();
    assert!(matches!(err, Error::ConfigParse(_)));
  }

  #[test]
  fn missing_file_is_a_read_error() {
    let err = RuntimeConfig::from_file(Path::new("/nonexistent/providers.yaml")).unwrap_err();
    assert!(matches!(err, Error::ConfigRead(_)));
  }
}
