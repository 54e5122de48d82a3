use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

fn default_k() -> usize {
  7
}

fn default_max_expansions() -> usize {
  200_000
}

/// Bounds on one k-best search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  /// Results to return
  #[serde(default = "default_k")]
  pub k: usize,
  /// Candidate pops before the search gives up and returns what it has
  #[serde(default = "default_max_expansions")]
  pub max_expansions: usize,
  pub timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      k: default_k(),
      max_expansions: default_max_expansions(),
      timeout_ms: None,
    }
  }
}

/// Engine configuration, usually read from a TOML file:
///
/// ```toml
/// grammar = "grammars/github.grm"
/// entities = "grammars/entities.json"
///
/// [search]
/// k = 10
/// timeout_ms = 250
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub search: SearchConfig,
  pub grammar: Option<PathBuf>,
  pub entities: Option<PathBuf>,
}

impl Config {
  pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(s)?)
  }

  /// Loads a TOML file. Relative grammar and entity paths are resolved
  /// against the file's directory.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = Self::from_toml_str(&content)?;

    if let Some(dir) = path.parent() {
      for p in [&mut config.grammar, &mut config.entities].into_iter().flatten() {
        if p.is_relative() {
          *p = dir.join(&*p);
        }
      }
    }

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.search.k, 7);
    assert_eq!(config.search.max_expansions, 200_000);
  }

  #[test]
  fn test_partial_search_table() {
    let config = Config::from_toml_str(
      r#"
      grammar = "github.grm"

      [search]
      k = 3
      timeout_ms = 50
      "#,
    )
    .unwrap();
    assert_eq!(config.search.k, 3);
    assert_eq!(config.search.max_expansions, 200_000);
    assert_eq!(config.search.timeout_ms, Some(50));
    assert_eq!(config.grammar, Some(PathBuf::from("github.grm")));
  }

  #[test]
  fn test_bad_toml() {
    assert!(matches!(
      Config::from_toml_str("search = 3"),
      Err(ConfigError::Toml(_))
    ));
  }

  #[test]
  fn test_load_resolves_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "grammar = \"g.grm\"\nentities = \"/abs/e.json\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.grammar, Some(dir.path().join("g.grm")));
    assert_eq!(config.entities, Some(PathBuf::from("/abs/e.json")));
  }
}
