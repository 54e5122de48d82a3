use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, ParseError};
use crate::state_table::StateTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  /// As typed, for displaying entity names
  pub text: String,
  pub normalized: String,
}

/// A named thing the grammar can refer to through a `{category}` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
  pub id: String,
  pub name: String,
}

/// Known entity names by category, matched case-insensitively and possibly
/// spanning several tokens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityIndex {
  /// normalized name -> (category, entity)
  by_name: BTreeMap<String, Vec<(String, Entity)>>,
  max_words: usize,
}

/// Lowercases and collapses whitespace, the form literals and entity names
/// are matched in
pub fn normalize(s: &str) -> String {
  s.split_whitespace()
    .map(str::to_lowercase)
    .collect::<Vec<_>>()
    .join(" ")
}

impl EntityIndex {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn add(&mut self, category: &str, entity: Entity) -> Result<(), ConfigError> {
    let key = normalize(&entity.name);
    if key.is_empty() || entity.id.trim().is_empty() || category.trim().is_empty() {
      return Err(ConfigError::MalformedEntities(format!(
        "entity {:?} in category {:?} needs a nonblank id and name",
        entity, category
      )));
    }

    self.max_words = self.max_words.max(key.split(' ').count());
    let entries = self.by_name.entry(key).or_default();
    if !entries.iter().any(|(c, e)| c == category && e.id == entity.id) {
      entries.push((category.to_string(), entity));
    }
    Ok(())
  }

  /// Reads `{ "category": [ { "id": .., "name": .. }, .. ], .. }`
  pub fn from_json(s: &str) -> Result<Self, ConfigError> {
    let raw: BTreeMap<String, Vec<Entity>> = serde_json::from_str(s)
      .map_err(|e| ConfigError::MalformedEntities(e.to_string()))?;

    let mut index = Self::new();
    for (category, entities) in raw {
      for entity in entities {
        index.add(&category, entity)?;
      }
    }
    Ok(index)
  }

  pub fn lookup(&self, normalized: &str) -> &[(String, Entity)] {
    self.by_name.get(normalized).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn len(&self) -> usize {
    self.by_name.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.by_name.is_empty()
  }
}

/// A literal recognized over tokens [start, end)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalMatch {
  pub literal: String,
  pub start: usize,
  pub end: usize,
  /// The matched tokens as typed
  pub text: String,
  pub entity: Option<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenized {
  pub tokens: Vec<Token>,
  /// Sorted by start, then end
  pub matches: Vec<TerminalMatch>,
}

impl Tokenized {
  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tokens.is_empty()
  }

  pub fn matches_at(&self, start: usize) -> impl Iterator<Item = &TerminalMatch> {
    self.matches.iter().filter(move |m| m.start == start)
  }
}

/// Splits a query on whitespace and finds every literal of the grammar, and
/// every known entity name, over every run of tokens. Overlapping matches
/// are all kept, and the parser decides between them.
pub fn tokenize(query: &str, table: &StateTable, entities: &EntityIndex) -> Result<Tokenized, ParseError> {
  let tokens: Vec<Token> = query
    .split_whitespace()
    .map(|t| Token {
      text: t.to_string(),
      normalized: t.to_lowercase(),
    })
    .collect();

  if tokens.is_empty() {
    return Err(ParseError::EmptyInput);
  }

  let max_words = table.max_literal_words.max(entities.max_words);
  let mut matches = Vec::new();

  for start in 0..tokens.len() {
    let mut key = String::new();
    for end in start + 1..=(start + max_words).min(tokens.len()) {
      if end > start + 1 {
        key.push(' ');
      }
      key.push_str(&tokens[end - 1].normalized);

      let text = || {
        tokens[start..end]
          .iter()
          .map(|t| t.text.as_str())
          .collect::<Vec<_>>()
          .join(" ")
      };

      if !table.terminal_rules(&key).is_empty() {
        matches.push(TerminalMatch {
          literal: key.clone(),
          start,
          end,
          text: text(),
          entity: None,
        });
      }

      for (category, entity) in entities.lookup(&key) {
        let literal = format!("{{{}}}", normalize(category));
        if table.terminal_rules(&literal).is_empty() {
          continue;
        }
        matches.push(TerminalMatch {
          literal,
          start,
          end,
          text: text(),
          entity: Some(entity.clone()),
        });
      }
    }
  }

  Ok(Tokenized { tokens, matches })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::Grammar;

  fn table() -> StateTable {
    let g: Grammar = r#"
      S -> Users Follow;
      Users -> {user};
      Users -> people;
      Follow -> follow;
      Follow -> "follow up";
    "#
    .parse()
    .unwrap();
    StateTable::compile(&g).unwrap()
  }

  fn entities() -> EntityIndex {
    EntityIndex::from_json(
      r#"{ "user": [ { "id": "1", "name": "Danny" }, { "id": "2", "name": "Aang Chan" } ] }"#,
    )
    .unwrap()
  }

  #[test]
  fn test_empty_query() {
    assert_eq!(
      tokenize("   ", &table(), &entities()),
      Err(ParseError::EmptyInput)
    );
  }

  #[test]
  fn test_multi_word_matches() {
    let t = tokenize("Aang Chan follow up", &table(), &entities()).unwrap();
    assert_eq!(t.len(), 4);

    let aang = t.matches_at(0).next().unwrap();
    assert_eq!(aang.literal, "{user}");
    assert_eq!((aang.start, aang.end), (0, 2));
    assert_eq!(aang.text, "Aang Chan");
    assert_eq!(aang.entity.as_ref().unwrap().id, "2");

    // both the single word and the phrase are kept
    let follows: Vec<_> = t.matches_at(2).map(|m| m.literal.as_str()).collect();
    assert_eq!(follows, vec!["follow", "follow up"]);
  }

  #[test]
  fn test_case_insensitive() {
    let t = tokenize("PEOPLE danny", &table(), &entities()).unwrap();
    assert_eq!(t.matches_at(0).next().unwrap().literal, "people");
    assert_eq!(t.matches_at(1).next().unwrap().text, "danny");
  }

  #[test]
  fn test_mixed_case_grammar_literals() {
    let g: Grammar = r#"
      S -> Users Lang;
      Users -> {User};
      Lang -> "JavaScript";
    "#
    .parse()
    .unwrap();
    let table = StateTable::compile(&g).unwrap();
    let entities =
      EntityIndex::from_json(r#"{ "User": [ { "id": "1", "name": "Danny" } ] }"#).unwrap();

    let t = tokenize("danny javascript", &table, &entities).unwrap();
    let danny = t.matches_at(0).next().unwrap();
    assert_eq!(danny.literal, "{user}");
    assert_eq!(danny.entity.as_ref().unwrap().id, "1");
    assert_eq!(t.matches_at(1).next().unwrap().literal, "javascript");
  }

  #[test]
  fn test_malformed_entities() {
    assert!(matches!(
      EntityIndex::from_json(r#"{ "user": [ { "id": "", "name": "x" } ] }"#),
      Err(ConfigError::MalformedEntities(_))
    ));
    assert!(matches!(
      EntityIndex::from_json("[1, 2]"),
      Err(ConfigError::MalformedEntities(_))
    ));
  }
}
