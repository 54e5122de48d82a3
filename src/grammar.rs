use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, GrammarError};
use crate::rules::{Rhs, Rule, RuleKind, Text};
use crate::semantic::SemanticDef;

/// An immutable grammar: every symbol's rules, in a stable order, plus the
/// semantics they reference. Built by `GrammarBuilder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
  pub start: String,
  pub rules: BTreeMap<String, Vec<Rule>>,
  pub semantics: BTreeMap<String, Arc<SemanticDef>>,
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "//** start: {}", self.start)?;
    writeln!(f, "//** rules: {}", self.rule_count())?;

    for (lhs, rules) in self.rules.iter() {
      for rule in rules {
        writeln!(f, "{} -> {} ({})", lhs, rule, crate::utils::fmt_cost(rule.cost))?;
      }
    }

    Ok(())
  }
}

impl Grammar {
  pub fn rules_for(&self, symbol: &str) -> &[Rule] {
    self.rules.get(symbol).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn has_symbol(&self, symbol: &str) -> bool {
    self.rules.contains_key(symbol)
  }

  pub fn rule_count(&self) -> usize {
    self.rules.values().map(Vec::len).sum()
  }

  /// Iterates (lhs, rule) pairs in the grammar's stable order
  pub fn iter_rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
    self
      .rules
      .iter()
      .flat_map(|(lhs, rules)| rules.iter().map(move |r| (lhs.as_str(), r)))
  }

  /// Checks the structural invariants every grammar must satisfy before it
  /// can be compiled.
  pub fn validate(&self) -> Result<(), GrammarError> {
    if self.rules_for(&self.start).is_empty() {
      return Err(GrammarError::MissingStart(self.start.clone()));
    }

    for (lhs, rules) in self.rules.iter() {
      if rules.is_empty() {
        return Err(GrammarError::UndefinedSymbol {
          symbol: lhs.clone(),
          used_by: lhs.clone(),
        });
      }

      for (idx, rule) in rules.iter().enumerate() {
        Self::validate_rule(lhs, rule)?;

        for sym in rule.rhs.symbols() {
          if self.rules_for(&sym.name).is_empty() {
            return Err(GrammarError::UndefinedSymbol {
              symbol: sym.name.clone(),
              used_by: lhs.clone(),
            });
          }
        }

        let is_base = rule.insertion.is_none() && !rule.transposed;
        let duplicated = rules[..idx].iter().any(|other| {
          is_base && other.insertion.is_none() && !other.transposed && other.rhs.same_as(&rule.rhs)
        });
        if duplicated {
          return Err(GrammarError::DuplicateRule {
            lhs: lhs.clone(),
            rhs: rule.rhs.to_string(),
          });
        }
      }
    }

    self.check_reachable()?;
    self.check_unary_cycles()
  }

  pub(crate) fn validate_rule(lhs: &str, rule: &Rule) -> Result<(), GrammarError> {
    match &rule.rhs {
      Rhs::Nonterminal(syms) if syms.is_empty() => Err(GrammarError::EmptyRhs(lhs.to_string())),
      Rhs::Nonterminal(syms) if syms.len() > 2 => Err(GrammarError::RhsTooLong {
        lhs: lhs.to_string(),
        rhs: rule.rhs.to_string(),
      }),
      Rhs::Terminal(lit) if lit.trim().is_empty() => Err(GrammarError::EmptyRhs(lhs.to_string())),
      _ if !(rule.cost >= 0.0) || !rule.cost.is_finite() => {
        Err(GrammarError::malformed(lhs, "cost must be a finite nonnegative number"))
      }
      _ if rule.insertion_cost.is_some_and(|c| !(c >= 0.0)) => {
        Err(GrammarError::malformed(lhs, "insertion cost must be nonnegative"))
      }
      Rhs::Terminal(_) if rule.transposition_cost.is_some() => {
        Err(GrammarError::malformed(lhs, "terminal rules cannot be transposed"))
      }
      Rhs::Nonterminal(syms) if rule.transposition_cost.is_some() && syms.len() != 2 => {
        Err(GrammarError::malformed(lhs, "only binary rules can be transposed"))
      }
      Rhs::Nonterminal(_) if rule.text.is_some() => {
        Err(GrammarError::malformed(lhs, "nonterminal rules cannot have text"))
      }
      _ => Self::check_rule_options(lhs, rule),
    }
  }

  /// Checks that a rule's kind and text fit its right-hand side
  fn check_rule_options(lhs: &str, rule: &Rule) -> Result<(), GrammarError> {
    match (&rule.rhs, rule.kind) {
      (Rhs::Nonterminal(_), RuleKind::Plain) => Ok(()),
      (Rhs::Nonterminal(_), _) => Err(GrammarError::malformed(
        lhs,
        "only terminal rules can be substitutions, stop words or placeholders",
      )),
      (Rhs::Terminal(_), RuleKind::Substitution) if rule.text.is_none() => {
        Err(GrammarError::malformed(lhs, "substitution is missing its corrected text"))
      }
      (Rhs::Terminal(lit), RuleKind::Placeholder) if !(lit.starts_with('{') && lit.ends_with('}')) => {
        Err(GrammarError::malformed(lhs, "placeholder literals look like {category}"))
      }
      (Rhs::Terminal(_), _) => match &rule.text {
        Some(Text::Forms(forms)) if forms.is_empty() => {
          Err(GrammarError::malformed(lhs, "conjugation table has no forms"))
        }
        _ => Ok(()),
      },
    }
  }

  fn check_reachable(&self) -> Result<(), GrammarError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(self.start.as_str());
    queue.push_back(self.start.as_str());

    while let Some(sym) = queue.pop_front() {
      for rule in self.rules_for(sym) {
        for next in rule.rhs.symbols() {
          if seen.insert(next.name.as_str()) {
            queue.push_back(next.name.as_str());
          }
        }
      }
    }

    match self.rules.keys().find(|k| !seen.contains(k.as_str())) {
      Some(unreachable) => Err(GrammarError::UnreachableSymbol(unreachable.clone())),
      None => Ok(()),
    }
  }

  fn check_unary_cycles(&self) -> Result<(), GrammarError> {
    let edges = self.unary_edges();
    for lhs in self.rules.keys() {
      if unary_reaches(&edges, lhs, lhs) {
        return Err(GrammarError::UnaryCycle(lhs.clone()));
      }
    }
    Ok(())
  }

  /// lhs -> every symbol it can become through one unary nonterminal rule
  pub(crate) fn unary_edges(&self) -> HashMap<&str, Vec<&str>> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for (lhs, rule) in self.iter_rules() {
      if let [only] = rule.rhs.symbols() {
        edges.entry(lhs).or_default().push(only.name.as_str());
      }
    }
    edges
  }

  pub fn to_json(&self) -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Loads a grammar artifact, checking it the same way a built grammar is
  pub fn from_json(s: &str) -> Result<Self, ConfigError> {
    let grammar: Self = serde_json::from_str(s)?;
    grammar.validate()?;
    Ok(grammar)
  }
}

/// Whether `to` is reachable from `from` through at least one unary edge
pub(crate) fn unary_reaches(edges: &HashMap<&str, Vec<&str>>, from: &str, to: &str) -> bool {
  let mut seen: HashSet<&str> = HashSet::new();
  let mut stack: Vec<&str> = edges.get(from).cloned().unwrap_or_default();

  while let Some(sym) = stack.pop() {
    if sym == to {
      return true;
    }
    if seen.insert(sym) {
      if let Some(next) = edges.get(sym) {
        stack.extend(next.iter().copied());
      }
    }
  }

  false
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rules::Rule;

  fn grammar(rules: Vec<(&str, Rule)>) -> Grammar {
    let mut map: BTreeMap<String, Vec<Rule>> = BTreeMap::new();
    for (lhs, rule) in rules {
      map.entry(lhs.to_string()).or_default().push(rule);
    }
    Grammar {
      start: "S".to_string(),
      rules: map,
      semantics: BTreeMap::new(),
    }
  }

  #[test]
  fn test_valid_grammar() {
    let g = grammar(vec![
      ("S", Rule::nonterminal(["A", "B"])),
      ("A", Rule::terminal("a")),
      ("B", Rule::terminal("b")),
    ]);
    assert_eq!(g.validate(), Ok(()));
    assert_eq!(g.rule_count(), 3);
  }

  #[test]
  fn test_unreachable_symbol() {
    let g = grammar(vec![
      ("S", Rule::nonterminal(["A"])),
      ("A", Rule::terminal("a")),
      ("Orphan", Rule::terminal("o")),
    ]);
    assert_eq!(
      g.validate(),
      Err(GrammarError::UnreachableSymbol("Orphan".to_string()))
    );
  }

  #[test]
  fn test_undefined_symbol() {
    let g = grammar(vec![("S", Rule::nonterminal(["Missing"]))]);
    assert!(matches!(
      g.validate(),
      Err(GrammarError::UndefinedSymbol { .. })
    ));
  }

  #[test]
  fn test_rhs_too_long() {
    let g = grammar(vec![
      ("S", Rule::nonterminal(["A", "A", "A"])),
      ("A", Rule::terminal("a")),
    ]);
    assert!(matches!(g.validate(), Err(GrammarError::RhsTooLong { .. })));
  }

  #[test]
  fn test_unary_cycle() {
    let g = grammar(vec![
      ("S", Rule::nonterminal(["A"])),
      ("A", Rule::nonterminal(["B"])),
      ("A", Rule::terminal("a")),
      ("B", Rule::nonterminal(["A"])),
    ]);
    assert!(matches!(g.validate(), Err(GrammarError::UnaryCycle(_))));
  }

  #[test]
  fn test_json_checks_rule_options() {
    let g = grammar(vec![
      ("S", Rule::nonterminal(["A"])),
      ("A", Rule::terminal("repositories").with_kind(RuleKind::Substitution)),
    ]);
    let json = serde_json::to_string(&g).unwrap();
    assert!(matches!(
      Grammar::from_json(&json),
      Err(ConfigError::Grammar(GrammarError::MalformedRule { .. }))
    ));

    let g = grammar(vec![
      ("S", Rule::nonterminal(["A"])),
      ("A", Rule::terminal("user").with_kind(RuleKind::Placeholder)),
    ]);
    assert!(matches!(g.validate(), Err(GrammarError::MalformedRule { .. })));
  }

  #[test]
  fn test_json_round_trip_validates() {
    let g = grammar(vec![("S", Rule::terminal("a"))]);
    let json = g.to_json().unwrap();
    assert_eq!(Grammar::from_json(&json).unwrap(), g);
  }
}
