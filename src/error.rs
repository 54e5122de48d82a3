use thiserror::Error;

/// Fatal errors found while building or compiling a grammar. No partial
/// state table is ever produced once one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
  #[error("duplicate symbol: {0}")]
  DuplicateSymbol(String),

  #[error("duplicate semantic: {0}")]
  DuplicateSemantic(String),

  #[error("duplicate rule: {lhs} -> {rhs}")]
  DuplicateRule { lhs: String, rhs: String },

  #[error("rule {lhs} -> {rhs} has more than 2 RHS symbols")]
  RhsTooLong { lhs: String, rhs: String },

  #[error("rule on {0} has an empty RHS")]
  EmptyRhs(String),

  #[error("symbol {symbol} is used in a rule of {used_by} but has no rules")]
  UndefinedSymbol { symbol: String, used_by: String },

  #[error("symbol {0} is unreachable from the start symbol")]
  UnreachableSymbol(String),

  #[error("missing start symbol: {0}")]
  MissingStart(String),

  #[error("unknown semantic: {0}")]
  UnknownSemantic(String),

  #[error("unary rule cycle through {0}")]
  UnaryCycle(String),

  #[error("malformed rule on {symbol}: {reason}")]
  MalformedRule { symbol: String, reason: String },

  #[error("grammar syntax: {0}")]
  Syntax(String),
}

impl GrammarError {
  pub fn malformed(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::MalformedRule {
      symbol: symbol.into(),
      reason: reason.into(),
    }
  }
}

/// Per-request failures. These are expected outcomes of bad queries, not
/// faults of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("empty input")]
  EmptyInput,

  #[error("no derivation found for \"{query}\"")]
  NoDerivation { query: String },
}

/// Errors from data-driven inputs: config files, entity lists and artifacts.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("malformed entity list: {0}")]
  MalformedEntities(String),

  #[error("malformed state table: {0}")]
  MalformedTable(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Toml(#[from] toml::de::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Grammar(#[from] GrammarError),
}
