use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::GrammarError;
use crate::grammar::{Grammar, unary_reaches};
use crate::rules::{Insertion, PersonNumber, Rhs, RhsSymbol, Rule, RuleKind, TextPiece};
use crate::semantic::SemanticNode;

/// The cheapest way to produce a symbol without consuming any input
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionRecipe {
  pub cost: f64,
  pub text: Vec<TextPiece>,
  pub semantic: Option<Arc<SemanticNode>>,
  pub person_number: Option<PersonNumber>,
}

/// What a single rule would insert, if every one of its children can be
/// inserted too
fn rule_recipe(insertable: &HashMap<String, InsertionRecipe>, rule: &Rule) -> Option<InsertionRecipe> {
  if rule.no_insert {
    return None;
  }

  match &rule.rhs {
    Rhs::Terminal(_) if rule.rhs.is_empty_string() => Some(InsertionRecipe {
      cost: rule.cost,
      text: Vec::new(),
      semantic: rule.semantic.clone(),
      person_number: rule.person_number,
    }),
    Rhs::Terminal(_) => {
      let insertion_cost = rule.insertion_cost?;
      if rule.kind == RuleKind::Placeholder {
        return None;
      }
      let text = rule
        .display_text()
        .map(|text| TextPiece { text, form: None })
        .into_iter()
        .collect();
      Some(InsertionRecipe {
        cost: rule.cost + insertion_cost,
        text,
        semantic: rule.semantic.clone(),
        person_number: rule.person_number,
      })
    }
    Rhs::Nonterminal(syms) => {
      let children = syms
        .iter()
        .map(|s| insertable.get(&s.name).map(|r| (s, r)))
        .collect::<Option<Vec<_>>>()?;

      let mut text = Vec::new();
      for (sym, child) in children.iter() {
        text.extend(child.text.iter().map(|piece| TextPiece {
          text: piece.text.clone(),
          form: piece.form.or(sym.form),
        }));
      }

      let args: Vec<_> = children.iter().filter_map(|(_, c)| c.semantic.clone()).collect();
      let semantic = combine_semantics(rule.semantic.as_ref(), args)?;

      Some(InsertionRecipe {
        cost: rule.cost + children.iter().map(|(_, c)| c.cost).sum::<f64>(),
        text,
        semantic,
        person_number: rule
          .person_number
          .or_else(|| children.iter().find_map(|(_, c)| c.person_number)),
      })
    }
  }
}

/// A rule's semantic applied to the semantics its inserted children produce.
/// The outer None means the combination can't be expressed as one semantic.
fn combine_semantics(
  semantic: Option<&Arc<SemanticNode>>,
  mut args: Vec<Arc<SemanticNode>>,
) -> Option<Option<Arc<SemanticNode>>> {
  match (semantic, args.len()) {
    (None, 0) => Some(None),
    (None, 1) => Some(args.pop()),
    (None, _) => None,
    (Some(sem), 0) => Some(Some(sem.clone())),
    (Some(sem), _) if sem.is_open() => SemanticNode::reduce(sem, args).map(Some),
    (Some(_), _) => None,
  }
}

/// Finds every symbol that can be produced from no input, keeping the
/// cheapest recipe for each. Iterates to a fixed point, since a recipe can
/// only get cheaper as more children become insertable.
pub fn find_insertable(grammar: &Grammar) -> HashMap<String, InsertionRecipe> {
  let mut insertable: HashMap<String, InsertionRecipe> = HashMap::new();

  let mut changed = true;
  while changed {
    changed = false;
    for (lhs, rule) in grammar.iter_rules() {
      let Some(recipe) = rule_recipe(&insertable, rule) else {
        continue;
      };
      let better = insertable.get(lhs).is_none_or(|old| recipe.cost < old.cost);
      if better {
        insertable.insert(lhs.to_string(), recipe);
        changed = true;
      }
    }
  }

  insertable
}

/// Two derived rules are the same rule if they match the same input and
/// mean the same thing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
  rhs: Vec<String>,
  semantic: Option<String>,
  inserted: Option<String>,
  transposed: bool,
}

impl DedupKey {
  fn of(rule: &Rule) -> Self {
    let rhs = match &rule.rhs {
      Rhs::Terminal(lit) => vec![lit.clone()],
      Rhs::Nonterminal(syms) => syms.iter().map(|s| s.name.clone()).collect(),
    };
    Self {
      rhs,
      semantic: rule.semantic.as_ref().map(|s| s.to_string()),
      inserted: rule
        .insertion
        .as_ref()
        .and_then(|i| i.semantic.as_ref())
        .map(|s| s.to_string()),
      transposed: rule.transposed,
    }
  }
}

/// Collects one symbol's rules, keeping the cheapest of any duplicates in
/// the position the first one was added
#[derive(Debug, Default)]
struct RuleSet {
  rules: Vec<Rule>,
  index: HashMap<DedupKey, usize>,
}

impl RuleSet {
  fn add(&mut self, rule: Rule) -> bool {
    let key = DedupKey::of(&rule);
    match self.index.get(&key) {
      Some(&idx) => {
        if rule.cost < self.rules[idx].cost {
          self.rules[idx] = rule;
        }
        false
      }
      None => {
        self.index.insert(key, self.rules.len());
        self.rules.push(rule);
        true
      }
    }
  }
}

fn derived(base: &Rule, rhs: Vec<RhsSymbol>, cost: f64) -> Rule {
  Rule {
    rhs: Rhs::Nonterminal(rhs),
    cost,
    insertion_cost: None,
    transposition_cost: None,
    insertion: None,
    transposed: false,
    ..base.clone()
  }
}

/// Expands a grammar with the rules that tolerate edits to the input:
///
/// * `X -> A B` where `B` is insertable gains `X -> A`, and likewise for `A`,
///   costing the base rule plus the cheapest insertion
/// * `X -> A B` with a transposition cost gains `X -> B A`
/// * `<empty>` rules are folded into insertions and removed
///
/// Rules referring to symbols left with no rules are pruned.
pub fn derive_edit_rules(grammar: &Grammar) -> Result<Grammar, GrammarError> {
  let insertable = find_insertable(grammar);
  let mut unary = grammar.unary_edges();
  let mut sets: BTreeMap<&str, RuleSet> = BTreeMap::new();
  let mut derived_count = 0;

  for (lhs, rule) in grammar.iter_rules() {
    let set = sets.entry(lhs).or_default();
    if rule.rhs.is_empty_string() {
      continue;
    }
    set.add(rule.clone());

    let [a, b] = rule.rhs.symbols() else {
      continue;
    };

    if !rule.no_insert {
      for (index, kept, inserted) in [(1, a, b), (0, b, a)] {
        let Some(recipe) = insertable.get(&inserted.name) else {
          continue;
        };
        // X -> A where A already reaches X through unary rules would loop
        if kept.name == lhs || unary_reaches(&unary, &kept.name, lhs) {
          continue;
        }

        let mut edit = derived(rule, vec![kept.clone()], rule.cost + recipe.cost);
        edit.insertion = Some(Insertion {
          index,
          text: recipe
            .text
            .iter()
            .map(|piece| TextPiece {
              text: piece.text.clone(),
              form: piece.form.or(inserted.form),
            })
            .collect(),
          semantic: recipe.semantic.clone(),
          person_number: recipe.person_number,
        });
        if set.add(edit) {
          unary.entry(lhs).or_default().push(kept.name.as_str());
          derived_count += 1;
        }
      }
    }

    if let Some(penalty) = rule.transposition_cost {
      let mut edit = derived(rule, vec![b.clone(), a.clone()], rule.cost + penalty);
      edit.transposed = true;
      if set.add(edit) {
        derived_count += 1;
      }
    }
  }

  let mut rules: BTreeMap<String, Vec<Rule>> = sets
    .into_iter()
    .map(|(lhs, set)| (lhs.to_string(), set.rules))
    .collect();
  prune_undefined(&mut rules);

  if rules.get(&grammar.start).is_none_or(Vec::is_empty) {
    return Err(GrammarError::MissingStart(grammar.start.clone()));
  }

  debug!(
    base = grammar.rule_count(),
    derived = derived_count,
    insertable = insertable.len(),
    "derived edit rules"
  );

  Ok(Grammar {
    start: grammar.start.clone(),
    rules,
    semantics: grammar.semantics.clone(),
  })
}

/// Removes symbols without rules, and every rule that refers to one, until
/// nothing else changes
fn prune_undefined(rules: &mut BTreeMap<String, Vec<Rule>>) {
  loop {
    rules.retain(|_, rs| !rs.is_empty());
    let defined: Vec<String> = rules.keys().cloned().collect();

    let mut removed = false;
    for rs in rules.values_mut() {
      let before = rs.len();
      rs.retain(|r| {
        r.rhs
          .symbols()
          .iter()
          .all(|s| defined.binary_search(&s.name).is_ok())
      });
      removed |= rs.len() != before;
    }

    if !removed {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{GrammarBuilder, StopWords, WordRules};
  use crate::rules::Text;
  use crate::semantic::SemanticDef;

  fn repos_by_me() -> Grammar {
    let mut b = GrammarBuilder::new();
    let me = b.define_semantic(SemanticDef::argument("me", 0.0)).unwrap();
    b.add_rule("S", Rule::nonterminal(["Repos", "LikedBy"])).unwrap();
    b.add_rule("LikedBy", Rule::nonterminal(["Liked", "ByMe"])).unwrap();
    b.add_rule("ByMe", Rule::nonterminal(["By", "Me"])).unwrap();
    b.add_word(
      "Repos",
      WordRules {
        accepted: vec!["repos".into()],
        ..Default::default()
      },
    )
    .unwrap();
    b.add_word(
      "Liked",
      WordRules {
        accepted: vec!["liked".into()],
        insertion_cost: Some(1.5),
        ..Default::default()
      },
    )
    .unwrap();
    b.add_rule("By", Rule::terminal("by")).unwrap();
    b.add_rule("Me", Rule::terminal("me").with_semantic(SemanticNode::leaf(me)))
      .unwrap();
    b.build().unwrap()
  }

  #[test]
  fn test_insertion_rule() {
    let g = derive_edit_rules(&repos_by_me()).unwrap();
    let liked_by = g.rules_for("LikedBy");
    assert_eq!(liked_by.len(), 2);

    let edit = &liked_by[1];
    assert_eq!(edit.rhs, Rhs::Nonterminal(vec![RhsSymbol::new("ByMe")]));
    assert_eq!(edit.cost, 1.5);

    let insertion = edit.insertion.as_ref().unwrap();
    assert_eq!(insertion.index, 0);
    assert_eq!(insertion.text.len(), 1);
    assert_eq!(insertion.text[0].text, Text::Literal("liked".into()));
  }

  #[test]
  fn test_nonterminal_insertion_carries_semantic() {
    let mut b = GrammarBuilder::new();
    let me = b.define_semantic(SemanticDef::argument("me", 0.0)).unwrap();
    b.add_rule("S", Rule::nonterminal(["A", "ByMe"])).unwrap();
    b.add_rule("A", Rule::terminal("a")).unwrap();
    b.add_rule("ByMe", Rule::nonterminal(["By", "Me"])).unwrap();
    b.add_rule("By", Rule::terminal("by").with_insertion_cost(1.0)).unwrap();
    b.add_rule(
      "Me",
      Rule::terminal("me")
        .with_semantic(SemanticNode::leaf(me))
        .with_insertion_cost(0.5),
    )
    .unwrap();
    let grammar = b.build().unwrap();

    let insertable = find_insertable(&grammar);
    let by_me = &insertable["ByMe"];
    assert_eq!(by_me.cost, 1.5);
    assert_eq!(by_me.text.len(), 2);
    assert_eq!(by_me.semantic.as_ref().unwrap().to_string(), "me");

    let g = derive_edit_rules(&grammar).unwrap();
    let s = g.rules_for("S");
    assert_eq!(s.len(), 2);
    assert_eq!(s[1].insertion.as_ref().unwrap().index, 1);
  }

  #[test]
  fn test_transposition() {
    let mut b = GrammarBuilder::new();
    b.add_rule("S", Rule::nonterminal(["A", "B"]).with_transposition_cost(2.0))
      .unwrap();
    b.add_rule("A", Rule::terminal("a")).unwrap();
    b.add_rule("B", Rule::terminal("b")).unwrap();
    let g = derive_edit_rules(&b.build().unwrap()).unwrap();

    let s = g.rules_for("S");
    assert_eq!(s.len(), 2);
    assert!(s[1].transposed);
    assert_eq!(s[1].rhs.to_string(), "B A");
    assert_eq!(s[1].cost, 2.0);
  }

  #[test]
  fn test_empty_rules_folded() {
    let mut b = GrammarBuilder::new();
    b.add_rule("S", Rule::nonterminal(["Stop", "Only"])).unwrap();
    b.add_stop_words(
      "Stop",
      StopWords {
        words: vec!["the".into()],
      },
    )
    .unwrap();
    b.add_rule("Only", Rule::terminal("x")).unwrap();
    b.add_rule("Only", Rule::nonterminal(["Empty"])).unwrap();
    b.add_rule("Empty", Rule::terminal(crate::rules::EMPTY_SYMBOL))
      .unwrap();
    let g = derive_edit_rules(&b.build().unwrap()).unwrap();

    assert!(g.rules_for("Stop").iter().all(|r| !r.rhs.is_empty_string()));
    // Empty had nothing but <empty>, so it and its users are gone
    assert!(!g.has_symbol("Empty"));
    assert_eq!(g.rules_for("Only").len(), 1);

    let s: Vec<_> = g.rules_for("S").iter().map(|r| r.rhs.to_string()).collect();
    assert_eq!(s, vec!["Stop Only", "Stop", "Only"]);
  }

  #[test]
  fn test_no_insert_respected() {
    let mut b = GrammarBuilder::new();
    let mut rule = Rule::nonterminal(["A", "B"]);
    rule.no_insert = true;
    b.add_rule("S", rule).unwrap();
    b.add_rule("A", Rule::terminal("a").with_insertion_cost(1.0)).unwrap();
    b.add_rule("B", Rule::terminal("b")).unwrap();
    let g = derive_edit_rules(&b.build().unwrap()).unwrap();
    assert_eq!(g.rules_for("S").len(), 1);
  }

  #[test]
  fn test_unary_cycle_not_derived() {
    let mut b = GrammarBuilder::new();
    b.add_rule("S", Rule::nonterminal(["S", "Stop"])).unwrap();
    b.add_rule("S", Rule::terminal("s")).unwrap();
    b.add_stop_words("Stop", StopWords { words: vec!["the".into()] })
      .unwrap();
    let g = derive_edit_rules(&b.build().unwrap()).unwrap();
    assert!(g.rules_for("S").iter().all(|r| r.len() != 1 || r.is_terminal()));
  }
}
