#[macro_use]
extern crate lazy_static;

pub mod builder;
pub mod config;
pub mod conjugate;
pub mod edit_rules;
pub mod error;
pub mod forest;
pub mod grammar;
pub mod parse_grammar;
pub mod parser;
pub mod rules;
pub mod search;
pub mod semantic;
pub mod state_table;
pub mod syntree;
pub mod tokenizer;
pub mod utils;

use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::debug;

use crate::config::{Config, SearchConfig};
use crate::conjugate::render_text;
use crate::error::{ConfigError, GrammarError, ParseError};
use crate::forest::Forest;
use crate::grammar::Grammar;
use crate::search::{SearchLimits, SearchStats, k_best};
use crate::semantic::SemanticTree;
use crate::state_table::StateTable;
use crate::syntree::{DerivationTree, SynTree};
use crate::tokenizer::{EntityIndex, tokenize};
pub use crate::utils::Err;

/// One query to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRequest {
  pub query: String,
  /// Results wanted. The engine's configured k if unset.
  pub k: Option<usize>,
  /// Attach a labelled derivation tree to every result
  pub build_trees: bool,
  /// Hand back the parse forest along with the results
  pub keep_forest: bool,
  /// List the other phrasings that reached each result's meaning
  pub report_ambiguity: bool,
}

impl ParseRequest {
  pub fn new(query: impl Into<String>) -> Self {
    Self {
      query: query.into(),
      k: None,
      build_trees: false,
      keep_forest: false,
      report_ambiguity: false,
    }
  }

  pub fn with_k(mut self, k: usize) -> Self {
    self.k = Some(k);
    self
  }

  pub fn with_trees(mut self) -> Self {
    self.build_trees = true;
    self
  }

  pub fn with_forest(mut self) -> Self {
    self.keep_forest = true;
    self
  }

  pub fn with_ambiguity(mut self) -> Self {
    self.report_ambiguity = true;
    self
  }
}

/// A costlier derivation that means the same as the result it's attached to
#[derive(Debug, Clone, PartialEq)]
pub struct Ambiguity {
  pub text: String,
  pub cost: f64,
}

/// One interpretation of a query
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
  /// The query as the grammar would phrase it
  pub text: String,
  pub cost: f64,
  pub semantic: SemanticTree,
  pub semantic_text: String,
  pub tree: Option<SynTree<String, String>>,
  /// Filled when the request asks for ambiguity, cheapest first
  pub ambiguous: Vec<Ambiguity>,
}

/// A query whose best parse doesn't read back exactly as typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTripMismatch {
  pub query: String,
  /// The best parse's text, or None if the query had no result
  pub found: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParseResponse {
  /// Best first. Empty if the query parsed but nothing it could mean is
  /// legal.
  pub results: Vec<ParseResult>,
  pub stats: SearchStats,
  /// A search limit was hit, so there may be more results than returned
  pub truncated: bool,
  pub forest: Option<Forest>,
}

/// A compiled grammar plus the entities it can refer to. Immutable once
/// built, so one engine can serve any number of threads.
#[derive(Debug, Clone)]
pub struct Engine {
  table: StateTable,
  entities: EntityIndex,
  search: SearchConfig,
}

impl Engine {
  pub fn new(table: StateTable) -> Self {
    Self {
      table,
      entities: EntityIndex::new(),
      search: SearchConfig::default(),
    }
  }

  pub fn compile(grammar: &Grammar) -> Result<Self, GrammarError> {
    Ok(Self::new(StateTable::compile(grammar)?))
  }

  pub fn with_entities(mut self, entities: EntityIndex) -> Self {
    self.entities = entities;
    self
  }

  pub fn with_search_config(mut self, search: SearchConfig) -> Self {
    self.search = search;
    self
  }

  /// Builds an engine from a config's grammar and entity files. A `.json`
  /// grammar is read as a compiled state table, anything else as grammar
  /// text.
  pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
    let path = config
      .grammar
      .as_deref()
      .ok_or_else(|| ConfigError::Grammar(GrammarError::Syntax("no grammar configured".to_string())))?;
    let table = load_table(path)?;

    let entities = match &config.entities {
      Some(path) => EntityIndex::from_json(&std::fs::read_to_string(path)?)?,
      None => EntityIndex::new(),
    };

    Ok(
      Self::new(table)
        .with_entities(entities)
        .with_search_config(config.search.clone()),
    )
  }

  pub fn table(&self) -> &StateTable {
    &self.table
  }

  pub fn entities(&self) -> &EntityIndex {
    &self.entities
  }

  pub fn search_config(&self) -> &SearchConfig {
    &self.search
  }

  pub fn parse(&self, query: &str) -> Result<ParseResponse, ParseError> {
    self.parse_with(&ParseRequest::new(query), None)
  }

  /// Tokenizes, parses and searches one query. Setting `cancel` stops the
  /// search at its next step, keeping what it found.
  pub fn parse_with(&self, request: &ParseRequest, cancel: Option<&AtomicBool>) -> Result<ParseResponse, ParseError> {
    let mut limits = SearchLimits::from_config(&self.search);
    limits.k = request.k.unwrap_or(self.search.k);
    limits.cancel = cancel;
    limits.record_duplicates = request.report_ambiguity;

    let tokens = tokenize(&request.query, &self.table, &self.entities)?;
    let forest = parser::parse(&self.table, &tokens)?;
    let (derivations, stats) = k_best(&self.table, &forest, &limits);

    let mut results = Vec::with_capacity(derivations.len());
    for d in derivations {
      // choices always come from a walk of this forest
      let Some(tree) = DerivationTree::from_choices(&forest, &d.choices) else {
        continue;
      };
      let ambiguous = d
        .duplicates
        .iter()
        .filter_map(|dup| {
          let tree = DerivationTree::from_choices(&forest, &dup.choices)?;
          Some(Ambiguity {
            text: render_text(&self.table, &forest, &tree),
            cost: dup.cost,
          })
        })
        .collect();
      results.push(ParseResult {
        text: render_text(&self.table, &forest, &tree),
        cost: d.cost,
        semantic_text: d.semantic.to_string(),
        semantic: d.semantic,
        tree: request
          .build_trees
          .then(|| tree.labelled(&self.table, &forest)),
        ambiguous,
      });
    }

    debug!(
      query = request.query.as_str(),
      results = results.len(),
      truncated = stats.truncated,
      "parsed query"
    );

    Ok(ParseResponse {
      results,
      truncated: stats.truncated,
      stats,
      forest: request.keep_forest.then_some(forest),
    })
  }

  /// Parses independent queries on the rayon pool. Results line up with
  /// `requests`.
  pub fn parse_batch(&self, requests: &[ParseRequest]) -> Vec<Result<ParseResponse, ParseError>> {
    requests
      .par_iter()
      .map(|request| self.parse_with(request, None))
      .collect()
  }

  /// Parses every query and returns those whose best result doesn't read
  /// exactly as typed, in input order. A grammar that phrases its own
  /// output consistently returns nothing here.
  pub fn round_trip<S: AsRef<str>>(&self, queries: &[S]) -> Vec<RoundTripMismatch> {
    let requests: Vec<_> = queries
      .iter()
      .map(|q| ParseRequest::new(q.as_ref()).with_k(1))
      .collect();

    self
      .parse_batch(&requests)
      .into_iter()
      .zip(queries)
      .filter_map(|(response, query)| {
        let found = response
          .ok()
          .and_then(|r| r.results.into_iter().next())
          .map(|r| r.text);
        let query = query.as_ref();
        (found.as_deref() != Some(query)).then(|| RoundTripMismatch {
          query: query.to_string(),
          found,
        })
      })
      .collect()
  }
}

/// Reads a list of queries: one per line, skipping blank lines and `//`
/// comments
pub fn read_queries(content: &str) -> Vec<String> {
  content
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.starts_with("//"))
    .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
    .collect()
}

/// Reads a state table from either a JSON artifact or grammar text
pub fn load_table(path: &Path) -> Result<StateTable, ConfigError> {
  let content = std::fs::read_to_string(path)?;
  if path.extension().is_some_and(|ext| ext == "json") {
    return StateTable::from_json(&content);
  }
  let grammar: Grammar = content.parse()?;
  Ok(StateTable::compile(&grammar)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use std::collections::HashSet;

  const GITHUB: &str = include_str!("../grammars/github.grm");
  const ENTITIES: &str = include_str!("../grammars/entities.json");

  lazy_static! {
    static ref ENGINE: Engine = {
      let grammar: Grammar = GITHUB.parse().unwrap();
      Engine::compile(&grammar)
        .unwrap()
        .with_entities(EntityIndex::from_json(ENTITIES).unwrap())
    };
  }

  fn top(query: &str) -> ParseResult {
    ENGINE.parse(query).unwrap().results.remove(0)
  }

  #[test]
  fn test_round_trip_text() {
    for query in ["people I follow", "repos Danny has liked", "people I and Danny follow"] {
      assert_eq!(top(query).text, query);
    }
  }

  #[test]
  fn test_semantics() {
    assert_eq!(top("people I follow").semantic_text, "users(followed-by(me))");
    assert_eq!(top("people I and Danny follow").semantic_text, "users(followed-by(1,me))");
    assert_eq!(top("repos Danny has liked").semantic_text, "repos(liked-by(1))");
    assert_eq!(
      top("repos created by me and liked by Katara Water").semantic_text,
      "repos(created-by(me),liked-by(3))"
    );
    assert_eq!(
      top("female people Danny follows").semantic_text,
      "users(followed-by(1),users-gender(female))"
    );
  }

  #[test]
  fn test_corrections() {
    // pronoun case, conjugation and substitutions
    assert_eq!(top("people me follow").text, "people I follow");
    assert_eq!(top("people Danny follow").text, "people Danny follows");
    assert_eq!(top("users myself follow").text, "people I follow");
    assert_eq!(top("the repositories danny have liked").text, "repos danny has liked");
  }

  #[test]
  fn test_transposition() {
    let result = top("people follow me");
    assert_eq!(result.text, "people I follow");
    assert!(result.cost > top("people I follow").cost);
  }

  #[test]
  fn test_insertion_tolerance() {
    let inserted = top("repos by me");
    let full = top("repos liked by me");
    assert_eq!(inserted.text, "repos liked by me");
    assert_eq!(inserted.semantic, full.semantic);
    assert!((inserted.cost - full.cost - 1.0).abs() < 1e-3);
  }

  #[test]
  fn test_graceful_degradation() {
    let response = ENGINE.parse_with(&ParseRequest::new("repos by me").with_k(50), None).unwrap();
    let sems: Vec<_> = response.results.iter().map(|r| r.semantic_text.as_str()).collect();
    assert_eq!(sems, vec!["repos(liked-by(me))", "repos(created-by(me))", "repos(forked-by(me))"]);
    assert!(!response.truncated);
  }

  #[test]
  fn test_no_legal_interpretation() {
    // a repository has one creator
    let response = ENGINE.parse("repos created by me and created by Danny").unwrap();
    assert!(response.results.is_empty());
    assert!(response.stats.discarded > 0);
  }

  #[test]
  fn test_request_errors() {
    assert_eq!(ENGINE.parse("   ").unwrap_err(), ParseError::EmptyInput);
    assert!(matches!(
      ENGINE.parse("people repos"),
      Err(ParseError::NoDerivation { .. })
    ));
  }

  #[test]
  fn test_unreachable_symbol_fails_compile() {
    let err = format!("{}\nOrphan -> orphan;", GITHUB)
      .parse::<Grammar>()
      .unwrap_err();
    assert_eq!(err, GrammarError::UnreachableSymbol("Orphan".to_string()));
  }

  #[test]
  fn test_stable_ties() {
    let first: Vec<_> = ENGINE
      .parse("repos by Aang")
      .unwrap()
      .results
      .into_iter()
      .map(|r| r.text)
      .collect();
    for _ in 0..5 {
      let again: Vec<_> = ENGINE
        .parse("repos by Aang")
        .unwrap()
        .results
        .into_iter()
        .map(|r| r.text)
        .collect();
      assert_eq!(again, first);
    }
  }

  #[test]
  fn test_trees_and_forest() {
    let request = ParseRequest::new("people I follow").with_trees().with_forest();
    let response = ENGINE.parse_with(&request, None).unwrap();
    let tree = response.results[0].tree.as_ref().unwrap();
    let (root, _) = tree.get_branch().unwrap();
    assert!(root.value.starts_with("Query"));
    assert_eq!(root.span, (0, 3));
    assert!(response.forest.unwrap().root.is_some());

    let plain = ENGINE.parse("people I follow").unwrap();
    assert!(plain.results[0].tree.is_none());
    assert!(plain.forest.is_none());
  }

  #[test]
  fn test_cancelled_search_keeps_going_gracefully() {
    let cancel = AtomicBool::new(true);
    let response = ENGINE
      .parse_with(&ParseRequest::new("repos by me"), Some(&cancel))
      .unwrap();
    assert!(response.results.is_empty());
    assert!(response.truncated);
  }

  #[test]
  fn test_parse_batch_matches_sequential() {
    let queries = ["people I follow", "repos by me", "nonsense words", "repos Aang has liked"];
    let requests: Vec<_> = queries.iter().map(|q| ParseRequest::new(*q)).collect();
    let batch = ENGINE.parse_batch(&requests);
    assert_eq!(batch.len(), queries.len());

    for (query, response) in queries.iter().zip(batch) {
      match (ENGINE.parse(query), response) {
        (Ok(a), Ok(b)) => assert_eq!(a.results, b.results),
        (Err(a), Err(b)) => assert_eq!(a, b),
        _ => panic!("batch and sequential disagree on {}", query),
      }
    }
  }

  #[test]
  fn test_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    std::fs::write(dir.join("github.grm"), GITHUB).unwrap();
    std::fs::write(dir.join("entities.json"), ENTITIES).unwrap();
    std::fs::write(
      dir.join("engine.toml"),
      "grammar = \"github.grm\"\nentities = \"entities.json\"\n\n[search]\nk = 2\n",
    )
    .unwrap();

    let config = Config::load(&dir.join("engine.toml")).unwrap();
    let engine = Engine::from_config(&config).unwrap();
    assert_eq!(engine.parse("repos by Danny").unwrap().results.len(), 2);

    // a compiled table loads the same
    let table = StateTable::from_json(&engine.table().to_json().unwrap()).unwrap();
    assert_eq!(&table, engine.table());
  }

  #[test]
  fn test_mixed_case_literals() {
    let grammar: Grammar = r#"
      S -> Lang Repos;
      Repos -> repos;
      @word Lang [ accepted: JavaScript ];
    "#
    .parse()
    .unwrap();
    let engine = Engine::compile(&grammar).unwrap();
    for query in ["JavaScript repos", "javascript repos", "JAVASCRIPT  Repos"] {
      assert_eq!(engine.parse(query).unwrap().results[0].text, "JavaScript repos");
    }
  }

  #[test]
  fn test_ambiguity_report() {
    let grammar: Grammar = r#"
      @argument me;
      S -> A;
      S[ cost: 1 ] -> B;
      A[ sem: me ] -> me;
      B[ sem: me, text: myself ] -> me;
    "#
    .parse()
    .unwrap();
    let engine = Engine::compile(&grammar).unwrap();

    let plain = engine.parse("me").unwrap();
    assert!(plain.results[0].ambiguous.is_empty());

    let response = engine
      .parse_with(&ParseRequest::new("me").with_ambiguity(), None)
      .unwrap();
    assert_eq!(response.results.len(), 1);
    let result = &response.results[0];
    assert_eq!(result.text, "me");
    assert_eq!(result.ambiguous.len(), 1);
    assert_eq!(result.ambiguous[0].text, "myself");
    assert!(result.ambiguous[0].cost > result.cost);
  }

  #[test]
  fn test_round_trip_check() {
    let queries = read_queries(include_str!("../grammars/queries.txt"));
    assert!(queries.len() >= 5);
    assert_eq!(ENGINE.round_trip(&queries), Vec::new());

    let mismatches = ENGINE.round_trip(&["people I follow", "people me follow", "nonsense"]);
    assert_eq!(
      mismatches,
      vec![
        RoundTripMismatch {
          query: "people me follow".to_string(),
          found: Some("people I follow".to_string()),
        },
        RoundTripMismatch {
          query: "nonsense".to_string(),
          found: None,
        },
      ]
    );
  }

  #[test]
  fn test_read_queries() {
    let queries = read_queries("// comment\n\n  people   I follow \nrepos by me\n");
    assert_eq!(queries, vec!["people I follow", "repos by me"]);
  }

  #[test]
  fn test_engine_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>();
  }

  const WORDS: &[&str] = &[
    "people", "repos", "I", "me", "Danny", "Aang", "follow", "follows", "liked", "has", "by", "and", "the",
    "created", "forked",
  ];

  proptest! {
    #[test]
    fn prop_results_ordered_and_distinct(words in prop::collection::vec(prop::sample::select(WORDS), 1..7)) {
      let query = words.join(" ");
      if let Ok(response) = ENGINE.parse_with(&ParseRequest::new(query).with_k(20), None) {
        let results = &response.results;
        prop_assert!(results.windows(2).all(|w| w[0].cost <= w[1].cost));

        let distinct: HashSet<_> = results.iter().map(|r| &r.semantic).collect();
        prop_assert_eq!(distinct.len(), results.len());
      }
    }
  }
}
