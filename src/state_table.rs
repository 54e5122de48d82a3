use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::edit_rules::derive_edit_rules;
use crate::error::{ConfigError, GrammarError};
use crate::grammar::Grammar;
use crate::rules::{Rhs, Rule};
use crate::tokenizer::normalize;

pub type SymbolId = usize;
pub type RuleId = usize;
pub type StateId = usize;

/// A rule with its symbols resolved to ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
  pub lhs: SymbolId,
  /// Empty for terminal rules
  pub rhs: Vec<SymbolId>,
  pub rule: Rule,
}

impl CompiledRule {
  pub fn len(&self) -> usize {
    self.rhs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rhs.is_empty()
  }
}

/// A dotted rule. `rule: None` is the augmented start rule `[start] -> start`.
/// Ordering is (rule, pos), which keeps item sets in a canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LR0 {
  pub rule: Option<RuleId>,
  pub pos: usize,
}

impl LR0 {
  fn advance(self) -> Self {
    Self {
      rule: self.rule,
      pos: self.pos + 1,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
  /// Rules completed in this state, ascending
  pub reductions: Vec<RuleId>,
  /// (symbol, target), sorted by symbol
  pub shifts: Vec<(SymbolId, StateId)>,
  /// The start symbol has been fully recognized
  pub is_final: bool,
}

/// The compiled automaton: item-set states plus everything the parser and
/// search need to know about rules. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTable {
  pub start: SymbolId,
  pub symbols: Vec<String>,
  pub rules: Vec<CompiledRule>,
  /// normalized literal -> terminal rules producing it, in rule order
  pub literals: BTreeMap<String, Vec<RuleId>>,
  pub states: Vec<State>,
  /// Longest literal, in words
  pub max_literal_words: usize,
}

impl StateTable {
  /// Derives edit rules for the grammar and builds the LR(0) automaton over
  /// the result.
  pub fn compile(grammar: &Grammar) -> Result<Self, GrammarError> {
    grammar.validate()?;
    let expanded = derive_edit_rules(grammar)?;
    let table = Self::build(&expanded)?;

    debug!(
      symbols = table.symbols.len(),
      rules = table.rules.len(),
      states = table.states.len(),
      "compiled state table"
    );

    Ok(table)
  }

  /// Builds the automaton for a grammar as-is, without deriving edit rules
  pub fn build(grammar: &Grammar) -> Result<Self, GrammarError> {
    // BTreeMap keys give every compile the same ids
    let symbols: Vec<String> = grammar.rules.keys().cloned().collect();
    let ids: HashMap<&str, SymbolId> = symbols
      .iter()
      .enumerate()
      .map(|(id, s)| (s.as_str(), id))
      .collect();
    let id_of = |name: &str, used_by: &str| {
      ids.get(name).copied().ok_or_else(|| GrammarError::UndefinedSymbol {
        symbol: name.to_string(),
        used_by: used_by.to_string(),
      })
    };

    let start = id_of(&grammar.start, &grammar.start)
      .map_err(|_| GrammarError::MissingStart(grammar.start.clone()))?;

    let mut rules = Vec::with_capacity(grammar.rule_count());
    let mut literals: BTreeMap<String, Vec<RuleId>> = BTreeMap::new();
    let mut by_lhs: Vec<Vec<RuleId>> = vec![Vec::new(); symbols.len()];

    for (lhs, rule) in grammar.iter_rules() {
      let id = rules.len();
      let lhs_id = id_of(lhs, lhs)?;
      let rhs = match &rule.rhs {
        Rhs::Terminal(lit) => {
          literals.entry(normalize(lit)).or_default().push(id);
          Vec::new()
        }
        Rhs::Nonterminal(syms) => {
          by_lhs[lhs_id].push(id);
          syms
            .iter()
            .map(|s| id_of(&s.name, lhs))
            .collect::<Result<Vec<_>, _>>()?
        }
      };
      rules.push(CompiledRule {
        lhs: lhs_id,
        rhs,
        rule: rule.clone(),
      });
    }

    let max_literal_words = literals
      .keys()
      .map(|l| l.split_whitespace().count())
      .max()
      .unwrap_or(0);

    let states = build_states(start, &rules, &by_lhs);

    Ok(Self {
      start,
      symbols,
      rules,
      literals,
      states,
      max_literal_words,
    })
  }

  pub fn symbol_id(&self, name: &str) -> Option<SymbolId> {
    self.symbols.iter().position(|s| s == name)
  }

  pub fn symbol_name(&self, id: SymbolId) -> &str {
    &self.symbols[id]
  }

  pub fn shift(&self, state: StateId, symbol: SymbolId) -> Option<StateId> {
    let shifts = &self.states[state].shifts;
    shifts
      .binary_search_by_key(&symbol, |&(sym, _)| sym)
      .ok()
      .map(|idx| shifts[idx].1)
  }

  pub fn terminal_rules(&self, literal: &str) -> &[RuleId] {
    self.literals.get(literal).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn to_json(&self) -> Result<String, ConfigError> {
    Ok(serde_json::to_string(self)?)
  }

  /// Loads a compiled artifact, checking that its indexes are in range
  pub fn from_json(s: &str) -> Result<Self, ConfigError> {
    let table: Self = serde_json::from_str(s)?;
    table.check_indexes().map_err(ConfigError::MalformedTable)?;
    Ok(table)
  }

  fn check_indexes(&self) -> Result<(), String> {
    let n_syms = self.symbols.len();
    if self.start >= n_syms || self.states.is_empty() {
      return Err("missing start symbol or initial state".to_string());
    }
    for (id, rule) in self.rules.iter().enumerate() {
      if rule.lhs >= n_syms || rule.rhs.iter().any(|&s| s >= n_syms) {
        return Err(format!("rule {} refers to an unknown symbol", id));
      }
    }
    for (id, state) in self.states.iter().enumerate() {
      if state.reductions.iter().any(|&r| r >= self.rules.len()) {
        return Err(format!("state {} reduces an unknown rule", id));
      }
      if state
        .shifts
        .iter()
        .any(|&(sym, to)| sym >= n_syms || to >= self.states.len())
      {
        return Err(format!("state {} shifts out of range", id));
      }
    }
    if self.literals.values().flatten().any(|&r| r >= self.rules.len()) {
      return Err("literal refers to an unknown rule".to_string());
    }
    Ok(())
  }

  fn fmt_rule(&self, f: &mut fmt::Formatter<'_>, id: RuleId) -> fmt::Result {
    let rule = &self.rules[id];
    write!(f, "{} -> {}", self.symbols[rule.lhs], rule.rule)
  }
}

/// Breadth-first item-set construction. Kernels are compared structurally,
/// and every item set is sorted, so a grammar always yields the same states.
fn build_states(start: SymbolId, rules: &[CompiledRule], by_lhs: &[Vec<RuleId>]) -> Vec<State> {
  let augmented = [start];
  let rhs_of = |item: &LR0| match item.rule {
    None => &augmented[..],
    Some(r) => &rules[r].rhs[..],
  };

  let mut kernels: Vec<Vec<LR0>> = vec![vec![LR0 { rule: None, pos: 0 }]];
  let mut seen: HashMap<Vec<LR0>, StateId> = HashMap::new();
  seen.insert(kernels[0].clone(), 0);
  let mut states = Vec::new();

  let mut idx = 0;
  while idx < kernels.len() {
    let mut items = kernels[idx].clone();
    let mut closed: HashSet<SymbolId> = HashSet::new();
    // next symbol -> advanced kernel, in first-encounter order
    let mut xtab: Vec<(SymbolId, Vec<LR0>)> = Vec::new();
    let mut state = State::default();

    let mut i = 0;
    while i < items.len() {
      let item = items[i];
      i += 1;
      let rhs = rhs_of(&item);

      let Some(&next) = rhs.get(item.pos) else {
        match item.rule {
          None => state.is_final = true,
          Some(r) => state.reductions.push(r),
        }
        continue;
      };

      let advanced = item.advance();
      match xtab.iter_mut().find(|(sym, _)| *sym == next) {
        Some((_, kernel)) => {
          if let Err(at) = kernel.binary_search(&advanced) {
            kernel.insert(at, advanced);
          }
        }
        None => xtab.push((next, vec![advanced])),
      }

      if closed.insert(next) {
        items.extend(by_lhs[next].iter().map(|&r| LR0 { rule: Some(r), pos: 0 }));
      }
    }

    for (sym, kernel) in xtab {
      let target = match seen.get(&kernel) {
        Some(&id) => id,
        None => {
          let id = kernels.len();
          seen.insert(kernel.clone(), id);
          kernels.push(kernel);
          id
        }
      };
      state.shifts.push((sym, target));
    }

    state.shifts.sort_unstable();
    state.reductions.sort_unstable();
    state.reductions.dedup();
    states.push(state);
    idx += 1;
  }

  states
}

impl fmt::Display for StateTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "//** start: {}", self.symbols[self.start])?;
    writeln!(f, "//** states: {}", self.states.len())?;

    for (id, state) in self.states.iter().enumerate() {
      write!(f, "State {}:", id)?;
      if state.is_final {
        write!(f, " accept")?;
      }
      writeln!(f)?;

      for &r in state.reductions.iter() {
        write!(f, "  reduce ")?;
        self.fmt_rule(f, r)?;
        writeln!(f)?;
      }
      for &(sym, to) in state.shifts.iter() {
        writeln!(f, "  shift {} => {}", self.symbols[sym], to)?;
      }
    }

    Ok(())
  }
}
