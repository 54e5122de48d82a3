use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::rules::{EMPTY_SYMBOL, Rule, RuleKind, Text, TextForms};
use crate::semantic::{SemanticDef, SemanticNode};
use crate::utils::COST_EPSILON;

/// An input form that is accepted but displayed as something else
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
  pub literal: String,
  pub cost_penalty: f64,
}

impl Substitution {
  pub fn new(literal: impl Into<String>, cost_penalty: f64) -> Self {
    Self {
      literal: literal.into(),
      cost_penalty,
    }
  }
}

impl From<&str> for Substitution {
  fn from(s: &str) -> Self {
    Self::new(s, 0.0)
  }
}

/// Terminal rules for a plain word: "repos", "followers"
#[derive(Debug, Clone, Default)]
pub struct WordRules {
  /// Displayed as input. The first one is the corrected text for substitutions.
  pub accepted: Vec<String>,
  pub substitutions: Vec<Substitution>,
  pub insertion_cost: Option<f64>,
  /// Accept the empty string without penalty
  pub optional: bool,
}

/// Terminal rules for a verb, conjugated by the person-number or grammatical
/// form in effect where it is displayed
#[derive(Debug, Clone, Default)]
pub struct VerbRules {
  pub one_sg: String,
  pub three_sg: String,
  pub pl: String,
  pub past: Option<String>,
  /// Accepted regardless of person-number, and displayed as input
  pub accepted: Vec<String>,
  pub substitutions: Vec<Substitution>,
  pub insertion_cost: Option<f64>,
}

/// Terminal rules for a pronoun with nominative and objective forms; each
/// form is accepted in place of the other and corrected on display
#[derive(Debug, Clone, Default)]
pub struct PronounRules {
  pub nom: String,
  pub obj: String,
  pub substitutions: Vec<Substitution>,
  pub insertion_cost: Option<f64>,
  pub semantic: Option<Arc<SemanticNode>>,
}

/// Words removed from input: they are accepted but display nothing
#[derive(Debug, Clone, Default)]
pub struct StopWords {
  pub words: Vec<Substitution>,
}

/// An entity category, matched by the tokenizer against known entity names
#[derive(Debug, Clone)]
pub struct Placeholder {
  pub category: String,
  /// Open function applied to the matched entity's id, if any
  pub semantic: Option<Arc<SemanticNode>>,
}

impl Placeholder {
  pub fn literal(&self) -> String {
    format!("{{{}}}", self.category)
  }
}

/// Accumulates symbols, rules and semantics, then finalizes them into an
/// immutable `Grammar`.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
  start: Option<String>,
  rules: BTreeMap<String, Vec<Rule>>,
  semantics: BTreeMap<String, Arc<SemanticDef>>,
}

impl GrammarBuilder {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn set_start(&mut self, symbol: impl Into<String>) -> &mut Self {
    self.start = Some(symbol.into());
    self
  }

  pub fn start(&self) -> Option<&str> {
    self.start.as_deref()
  }

  /// Declares a symbol up front. Fails if it already exists.
  pub fn new_symbol(&mut self, name: impl Into<String>) -> Result<String, GrammarError> {
    let name = name.into();
    if self.rules.contains_key(&name) {
      return Err(GrammarError::DuplicateSymbol(name));
    }
    self.rules.insert(name.clone(), Vec::new());
    Ok(name)
  }

  pub fn define_semantic(&mut self, def: SemanticDef) -> Result<Arc<SemanticDef>, GrammarError> {
    if self.semantics.contains_key(&def.name) {
      return Err(GrammarError::DuplicateSemantic(def.name));
    }
    let def = Arc::new(def);
    self.semantics.insert(def.name.clone(), def.clone());
    Ok(def)
  }

  pub fn semantic(&self, name: &str) -> Result<Arc<SemanticDef>, GrammarError> {
    self
      .semantics
      .get(name)
      .cloned()
      .ok_or_else(|| GrammarError::UnknownSemantic(name.to_string()))
  }

  /// Adds a rule to `lhs`, creating the symbol if needed. The rule's cost
  /// gains its semantic's cost, plus a tiny increment per existing rule so
  /// rules on one symbol never tie.
  pub fn add_rule(&mut self, lhs: &str, mut rule: Rule) -> Result<&mut Self, GrammarError> {
    Grammar::validate_rule(lhs, &rule)?;

    let existing = self.rules.entry(lhs.to_string()).or_default();
    if existing.iter().any(|r| r.rhs.same_as(&rule.rhs)) {
      return Err(GrammarError::DuplicateRule {
        lhs: lhs.to_string(),
        rhs: rule.rhs.to_string(),
      });
    }

    if let Some(sem) = &rule.semantic {
      rule.cost += sem.cost();
    }
    rule.cost += existing.len() as f64 * COST_EPSILON;
    existing.push(rule);

    if self.start.is_none() {
      self.start = Some(lhs.to_string());
    }

    Ok(self)
  }

  pub fn add_word(&mut self, lhs: &str, word: WordRules) -> Result<&mut Self, GrammarError> {
    if word.accepted.is_empty() {
      return Err(GrammarError::malformed(lhs, "word has no accepted forms"));
    }
    if word.accepted.iter().any(|a| a == EMPTY_SYMBOL) {
      return Err(GrammarError::malformed(
        lhs,
        "only stop words and optional words can accept <empty>",
      ));
    }
    if word.optional && word.insertion_cost.is_some() {
      return Err(GrammarError::malformed(lhs, "optional words cannot have insertion costs"));
    }

    if word.optional {
      self.add_rule(lhs, Rule::terminal(EMPTY_SYMBOL))?;
    }

    for (idx, accepted) in word.accepted.iter().enumerate() {
      let mut rule = Rule::terminal(accepted.as_str()).with_text(accepted.as_str());
      if idx == 0 {
        rule.insertion_cost = word.insertion_cost;
      }
      self.add_rule(lhs, rule)?;
    }

    let corrected = Text::Literal(word.accepted[0].clone());
    self.add_substitutions(lhs, &word.substitutions, corrected)
  }

  pub fn add_verb(&mut self, lhs: &str, verb: VerbRules) -> Result<&mut Self, GrammarError> {
    if verb.one_sg.is_empty() || verb.three_sg.is_empty() || verb.pl.is_empty() {
      return Err(GrammarError::malformed(lhs, "verb is missing an inflection"));
    }

    let forms = Text::Forms(TextForms {
      one_sg: Some(verb.one_sg.clone()),
      three_sg: Some(verb.three_sg.clone()),
      pl: Some(verb.pl.clone()),
      past: verb.past.clone(),
      ..Default::default()
    });

    let mut inflections = vec![verb.one_sg.clone()];
    for form in [&verb.three_sg, &verb.pl].into_iter().chain(verb.past.as_ref()) {
      if !inflections.contains(form) {
        inflections.push(form.clone());
      }
    }

    for (idx, inflection) in inflections.iter().enumerate() {
      let mut rule = Rule::terminal(inflection.as_str()).with_text(forms.clone());
      if idx == 0 {
        rule.insertion_cost = verb.insertion_cost;
      }
      self.add_rule(lhs, rule)?;
    }

    for accepted in verb.accepted.iter() {
      self.add_rule(lhs, Rule::terminal(accepted.as_str()).with_text(accepted.as_str()))?;
    }

    self.add_substitutions(lhs, &verb.substitutions, forms)
  }

  pub fn add_pronoun(&mut self, lhs: &str, pronoun: PronounRules) -> Result<&mut Self, GrammarError> {
    let forms = Text::Forms(TextForms {
      nom: Some(pronoun.nom.clone()),
      obj: Some(pronoun.obj.clone()),
      ..Default::default()
    });

    let mut literals = vec![pronoun.nom.to_lowercase()];
    let obj = pronoun.obj.to_lowercase();
    if !literals.contains(&obj) {
      literals.push(obj);
    }

    for (idx, literal) in literals.into_iter().enumerate() {
      let mut rule = Rule::terminal(literal).with_text(forms.clone());
      rule.semantic = pronoun.semantic.clone();
      if idx == 0 {
        rule.insertion_cost = pronoun.insertion_cost;
      }
      self.add_rule(lhs, rule)?;
    }

    for sub in pronoun.substitutions.iter() {
      let mut rule = Rule::terminal(sub.literal.as_str())
        .with_kind(RuleKind::Substitution)
        .with_text(forms.clone())
        .with_cost(sub.cost_penalty);
      rule.semantic = pronoun.semantic.clone();
      self.add_rule(lhs, rule)?;
    }

    Ok(self)
  }

  pub fn add_stop_words(&mut self, lhs: &str, stop_words: StopWords) -> Result<&mut Self, GrammarError> {
    self.add_rule(lhs, Rule::terminal(EMPTY_SYMBOL))?;
    for word in stop_words.words.iter() {
      self.add_rule(
        lhs,
        Rule::terminal(word.literal.as_str())
          .with_kind(RuleKind::StopWord)
          .with_cost(word.cost_penalty),
      )?;
    }
    Ok(self)
  }

  pub fn add_substitutions(
    &mut self,
    lhs: &str,
    substitutions: &[Substitution],
    corrected: Text,
  ) -> Result<&mut Self, GrammarError> {
    for sub in substitutions {
      self.add_rule(
        lhs,
        Rule::terminal(sub.literal.as_str())
          .with_kind(RuleKind::Substitution)
          .with_text(corrected.clone())
          .with_cost(sub.cost_penalty),
      )?;
    }
    Ok(self)
  }

  pub fn add_placeholder(&mut self, lhs: &str, placeholder: Placeholder) -> Result<&mut Self, GrammarError> {
    let mut rule = Rule::terminal(placeholder.literal()).with_kind(RuleKind::Placeholder);
    rule.semantic = placeholder.semantic;
    self.add_rule(lhs, rule)
  }

  /// Creates `<symbol>-opt`, which produces `symbol` or nothing
  pub fn add_optional(&mut self, symbol: &str) -> Result<String, GrammarError> {
    let opt = self.new_symbol(format!("{}-opt", symbol))?;
    let mut rule = Rule::nonterminal([symbol]);
    rule.no_insert = true;
    self.add_rule(&opt, rule)?;
    self.add_rule(&opt, Rule::terminal(EMPTY_SYMBOL))?;
    Ok(opt)
  }

  pub fn build(self) -> Result<Grammar, GrammarError> {
    let start = self
      .start
      .ok_or_else(|| GrammarError::MissingStart("<none>".to_string()))?;

    let grammar = Grammar {
      start,
      rules: self.rules,
      semantics: self.semantics,
    };
    grammar.validate()?;
    Ok(grammar)
  }
}
