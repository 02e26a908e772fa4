use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coverage::MatchPolicy;
use crate::errors::ConfigError;

pub const DEFAULT_MAX_ANCESTOR_DEPTH: usize = 256;
pub const DEFAULT_MAX_ALIAS_HOPS: usize = 32;

/// Analysis settings, loadable from TOML.
///
/// ```toml
/// match_policy = "ancestor-chain"
/// max_ancestor_depth = 256
///
/// [throws_annotations]
/// Throws = "kotlin.jvm.Throws"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
  /// Short name to qualified name of every annotation that declares exceptions.
  pub throws_annotations: BTreeMap<String, String>,
  pub match_policy: MatchPolicy,
  /// Upper bound on superclass links followed when building an ancestor chain.
  pub max_ancestor_depth: usize,
  pub max_alias_hops: usize,
}

impl Default for UserSettings {
  fn default() -> Self {
    let mut throws_annotations = BTreeMap::new();
    throws_annotations.insert("Throws".to_string(), "kotlin.jvm.Throws".to_string());
    Self {
      throws_annotations,
      match_policy: MatchPolicy::default(),
      max_ancestor_depth: DEFAULT_MAX_ANCESTOR_DEPTH,
      max_alias_hops: DEFAULT_MAX_ALIAS_HOPS,
    }
  }
}

impl UserSettings {
  pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
    Self::parse(content, "<inline>")
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => ConfigError::FileNotFound { path: display.clone() },
      _ => ConfigError::Io { path: display.clone(), message: e.to_string() },
    })?;
    Self::parse(&content, &display)
  }

  fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
    let settings: UserSettings = toml::from_str(content).map_err(|e| ConfigError::ParseError {
      path: origin.to_string(),
      message: e.to_string(),
    })?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_ancestor_depth == 0 {
      return Err(ConfigError::ValidationFailed {
        field: "max_ancestor_depth".to_string(),
        message: "must be greater than zero".to_string(),
      });
    }
    if self.max_alias_hops == 0 {
      return Err(ConfigError::ValidationFailed {
        field: "max_alias_hops".to_string(),
        message: "must be greater than zero".to_string(),
      });
    }
    if self.throws_annotations.is_empty() {
      return Err(ConfigError::ValidationFailed {
        field: "throws_annotations".to_string(),
        message: "at least one annotation must be recognized".to_string(),
      });
    }
    for (short, qualified) in &self.throws_annotations {
      if short.is_empty() || qualified.is_empty() || !qualified.ends_with(short.as_str()) {
        return Err(ConfigError::ValidationFailed {
          field: "throws_annotations".to_string(),
          message: format!("`{}` must be a suffix of `{}`", short, qualified),
        });
      }
    }
    Ok(())
  }

  /// Whether an annotation written as `name` (short or qualified) declares exceptions.
  pub fn is_throws_annotation(&self, name: &str) -> bool {
    self
      .throws_annotations
      .iter()
      .any(|(short, qualified)| name == short || name == qualified)
  }

  /// Short name used when a new annotation has to be written.
  pub fn preferred_annotation_name(&self) -> &str {
    self
      .throws_annotations
      .iter()
      .find(|(_, qualified)| qualified.as_str() == "kotlin.jvm.Throws")
      .or_else(|| self.throws_annotations.iter().next())
      .map(|(short, _)| short.as_str())
      .unwrap_or("Throws")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_recognize_both_spellings() {
    let settings = UserSettings::default();
    assert!(settings.is_throws_annotation("Throws"));
    assert!(settings.is_throws_annotation("kotlin.jvm.Throws"));
    assert!(!settings.is_throws_annotation("Deprecated"));
    assert_eq!(settings.preferred_annotation_name(), "Throws");
  }

  #[test]
  fn test_partial_toml_keeps_defaults() {
    let settings = UserSettings::from_toml("match_policy = \"exact\"").unwrap();
    assert_eq!(settings.match_policy, MatchPolicy::Exact);
    assert_eq!(settings.max_ancestor_depth, DEFAULT_MAX_ANCESTOR_DEPTH);
    assert!(settings.is_throws_annotation("Throws"));
  }

  #[test]
  fn test_custom_annotation_table() {
    let settings = UserSettings::from_toml(
      r#"
      [throws_annotations]
      Raises = "com.acme.Raises"
      "#,
    )
    .unwrap();
    assert!(settings.is_throws_annotation("Raises"));
    assert!(settings.is_throws_annotation("com.acme.Raises"));
    assert!(!settings.is_throws_annotation("Throws"));
    assert_eq!(settings.preferred_annotation_name(), "Raises");
  }

  #[test]
  fn test_validation_rejects_zero_depth() {
    let err = UserSettings::from_toml("max_ancestor_depth = 0").unwrap_err();
    assert!(matches!(err, ConfigError::ValidationFailed { ref field, .. } if field == "max_ancestor_depth"));
  }

  #[test]
  fn test_validation_rejects_mismatched_suffix() {
    let err = UserSettings::from_toml("[throws_annotations]\nThrows = \"com.acme.Raises\"").unwrap_err();
    assert!(matches!(err, ConfigError::ValidationFailed { .. }));
  }

  #[test]
  fn test_invalid_toml_is_a_parse_error() {
    let err = UserSettings::from_toml("match_policy = ").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
  }

  #[test]
  fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "match_policy = \"simple-name\"\nmax_alias_hops = 4").unwrap();
    let settings = UserSettings::load(file.path()).unwrap();
    assert_eq!(settings.match_policy, MatchPolicy::SimpleName);
    assert_eq!(settings.max_alias_hops, 4);
  }

  #[test]
  fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = UserSettings::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
  }

  #[test]
  fn test_unreadable_path_keeps_io_message() {
    let dir = tempfile::tempdir().unwrap();
    let err = UserSettings::load(dir.path()).unwrap_err();
    match err {
      ConfigError::Io { path, message } => {
        assert_eq!(path, dir.path().display().to_string());
        assert!(!message.is_empty());
      }
      other => panic!("expected an io error, got {:?}", other),
    }
  }
}
