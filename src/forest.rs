use std::collections::HashMap;
use std::fmt;

use crate::state_table::{RuleId, StateTable, SymbolId};
use crate::tokenizer::TerminalMatch;
use crate::utils::fmt_cost;

pub type NodeId = usize;

/// One way of deriving a forest node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alternative {
  /// A terminal rule over a tokenizer match (an index into `Forest::matches`)
  Terminal { rule: RuleId, matched: usize },
  /// A nonterminal rule over child nodes, in input order
  Branch { rule: RuleId, children: Vec<NodeId> },
}

impl Alternative {
  pub fn rule(&self) -> RuleId {
    match self {
      Self::Terminal { rule, .. } | Self::Branch { rule, .. } => *rule,
    }
  }

  pub fn children(&self) -> &[NodeId] {
    match self {
      Self::Terminal { .. } => &[],
      Self::Branch { children, .. } => children,
    }
  }
}

/// Every derivation of `symbol` over tokens [start, end)
#[derive(Debug, Clone, PartialEq)]
pub struct ForestNode {
  pub symbol: SymbolId,
  pub start: usize,
  pub end: usize,
  pub alternatives: Vec<Alternative>,
}

/// A packed parse forest. Nodes live in an arena and are unique per
/// (symbol, span), so ambiguity only ever adds alternatives.
#[derive(Debug, Clone, Default)]
pub struct Forest {
  pub nodes: Vec<ForestNode>,
  index: HashMap<(SymbolId, usize, usize), NodeId>,
  pub matches: Vec<TerminalMatch>,
  pub root: Option<NodeId>,
}

impl Forest {
  pub fn new(matches: Vec<TerminalMatch>) -> Self {
    Self {
      matches,
      ..Default::default()
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, id: NodeId) -> &ForestNode {
    &self.nodes[id]
  }

  pub fn find(&self, symbol: SymbolId, start: usize, end: usize) -> Option<NodeId> {
    self.index.get(&(symbol, start, end)).copied()
  }

  /// Looks up the node for (symbol, span), creating it if needed
  pub fn node(&mut self, symbol: SymbolId, start: usize, end: usize) -> NodeId {
    let nodes = &mut self.nodes;
    *self.index.entry((symbol, start, end)).or_insert_with(|| {
      nodes.push(ForestNode {
        symbol,
        start,
        end,
        alternatives: Vec::new(),
      });
      nodes.len() - 1
    })
  }

  /// Adds an alternative unless the node already has it. Returns whether it
  /// was added.
  pub fn add_alternative(&mut self, id: NodeId, alt: Alternative) -> bool {
    let alts = &mut self.nodes[id].alternatives;
    if alts.contains(&alt) {
      false
    } else {
      alts.push(alt);
      true
    }
  }

  pub fn alternative_count(&self) -> usize {
    self.nodes.iter().map(|n| n.alternatives.len()).sum()
  }

  /// Orders every node's alternatives by rule, so the search meets them in
  /// grammar order however the parser happened to find them
  pub fn sort_alternatives(&mut self) {
    for node in self.nodes.iter_mut() {
      node.alternatives.sort_by(|a, b| {
        a.rule()
          .cmp(&b.rule())
          .then_with(|| a.children().cmp(b.children()))
      });
    }
  }

  /// The cheapest complete derivation of every node, indexed by node id
  pub fn min_costs(&self, table: &StateTable) -> Vec<f64> {
    let mut memo: Vec<Option<f64>> = vec![None; self.nodes.len()];
    for id in 0..self.nodes.len() {
      self.min_cost(table, id, &mut memo);
    }
    memo.into_iter().map(|c| c.unwrap_or(f64::INFINITY)).collect()
  }

  fn min_cost(&self, table: &StateTable, id: NodeId, memo: &mut Vec<Option<f64>>) -> f64 {
    if let Some(cost) = memo[id] {
      return cost;
    }

    let mut best = f64::INFINITY;
    for alt in self.nodes[id].alternatives.iter() {
      let mut cost = table.rules[alt.rule()].rule.cost;
      for &child in alt.children() {
        cost += self.min_cost(table, child, memo);
      }
      best = best.min(cost);
    }

    memo[id] = Some(best);
    best
  }

  /// Borrows the symbol names needed to print the forest
  pub fn display<'a>(&'a self, table: &'a StateTable) -> ForestDisplay<'a> {
    ForestDisplay { forest: self, table }
  }

  /// Graphviz rendering: a box per node, a point per alternative
  pub fn to_dot(&self, table: &StateTable) -> String {
    let mut out = String::from("digraph forest {\n  node [shape=box];\n");

    for (id, node) in self.nodes.iter().enumerate() {
      let root = if self.root == Some(id) { ", peripheries=2" } else { "" };
      out.push_str(&format!(
        "  n{} [label=\"{} {}..{}\"{}];\n",
        id,
        table.symbol_name(node.symbol),
        node.start,
        node.end,
        root
      ));

      for (alt_idx, alt) in node.alternatives.iter().enumerate() {
        let alt_name = format!("n{}a{}", id, alt_idx);
        let label = fmt_cost(table.rules[alt.rule()].rule.cost);
        out.push_str(&format!("  {} [shape=point];\n", alt_name));
        out.push_str(&format!("  n{} -> {} [label=\"{}\"];\n", id, alt_name, label));
        match alt {
          Alternative::Terminal { matched, .. } => {
            let text = self.matches[*matched].text.replace('"', "\\\"");
            out.push_str(&format!("  {}t [shape=plaintext, label=\"{}\"];\n", alt_name, text));
            out.push_str(&format!("  {} -> {}t;\n", alt_name, alt_name));
          }
          Alternative::Branch { children, .. } => {
            for child in children {
              out.push_str(&format!("  {} -> n{};\n", alt_name, child));
            }
          }
        }
      }
    }

    out.push_str("}\n");
    out
  }
}

pub struct ForestDisplay<'a> {
  forest: &'a Forest,
  table: &'a StateTable,
}

impl fmt::Display for ForestDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = |id: NodeId| {
      let node = self.forest.get(id);
      format!("{}[{}..{}]", self.table.symbol_name(node.symbol), node.start, node.end)
    };

    for (id, node) in self.forest.nodes.iter().enumerate() {
      let marker = if self.forest.root == Some(id) { "*" } else { "" };
      write!(f, "{}{} =", marker, name(id))?;

      for (idx, alt) in node.alternatives.iter().enumerate() {
        if idx > 0 {
          write!(f, " |")?;
        }
        match alt {
          Alternative::Terminal { matched, .. } => {
            write!(f, " \"{}\"", self.forest.matches[*matched].text)?;
          }
          Alternative::Branch { children, .. } => {
            for &child in children {
              write!(f, " {}", name(child))?;
            }
          }
        }
        write!(f, " ({})", fmt_cost(self.table.rules[alt.rule()].rule.cost))?;
      }
      writeln!(f)?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::Grammar;

  #[test]
  fn test_nodes_are_unique_per_span() {
    let mut forest = Forest::default();
    let a = forest.node(0, 0, 2);
    let b = forest.node(0, 0, 2);
    let c = forest.node(0, 0, 3);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(forest.find(0, 0, 3), Some(c));
    assert_eq!(forest.len(), 2);
  }

  #[test]
  fn test_duplicate_alternatives() {
    let mut forest = Forest::default();
    let a = forest.node(0, 0, 1);
    let b = forest.node(1, 0, 1);
    assert!(forest.add_alternative(b, Alternative::Branch { rule: 1, children: vec![a] }));
    assert!(!forest.add_alternative(b, Alternative::Branch { rule: 1, children: vec![a] }));
    assert!(forest.add_alternative(b, Alternative::Branch { rule: 0, children: vec![a] }));

    forest.sort_alternatives();
    assert_eq!(forest.get(b).alternatives[0].rule(), 0);
  }

  #[test]
  fn test_min_costs() {
    let g: Grammar = r#"
      S -> A;
      A[ cost: 1 ] -> a;
      A[ cost: 3 ] -> "a a";
    "#
    .parse()
    .unwrap();
    let table = StateTable::compile(&g).unwrap();
    let rule_of = |lit: &str| table.terminal_rules(lit)[0];

    let mut forest = Forest::default();
    let a = forest.node(table.symbol_id("A").unwrap(), 0, 1);
    let s = forest.node(table.symbol_id("S").unwrap(), 0, 1);
    forest.add_alternative(a, Alternative::Terminal { rule: rule_of("a"), matched: 0 });
    forest.add_alternative(a, Alternative::Terminal { rule: rule_of("a a"), matched: 0 });
    let s_rule = table.rules.iter().position(|r| r.len() == 1).unwrap();
    forest.add_alternative(s, Alternative::Branch { rule: s_rule, children: vec![a] });

    let costs = forest.min_costs(&table);
    assert_eq!(costs[a], 1.0);
    assert_eq!(costs[s], 1.0);
  }
}
