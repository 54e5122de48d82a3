use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::forest::{Alternative, Forest, NodeId};
use crate::state_table::{StateId, StateTable};
use crate::tokenizer::Tokenized;

type VertexId = usize;

/// A link back to an earlier vertex, labelled with the forest node that was
/// recognized between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
  node: NodeId,
  to: VertexId,
}

/// A graph-structured-stack vertex: an automaton state reached at a position
#[derive(Debug)]
struct Vertex {
  state: StateId,
  pos: usize,
  edges: Vec<Edge>,
}

/// Generalized LR driver. Every stack that the automaton allows is kept
/// alive at once, sharing vertices per (state, position), and every
/// completed (symbol, span) is packed into one forest node.
struct Parser<'a> {
  table: &'a StateTable,
  forest: Forest,
  vertices: Vec<Vertex>,
  /// position -> state -> vertex, ordered so runs are reproducible
  levels: Vec<BTreeMap<StateId, VertexId>>,
  /// position -> (vertex, edge index) pairs waiting for their reductions
  pending: Vec<Vec<(VertexId, usize)>>,
}

impl<'a> Parser<'a> {
  fn new(table: &'a StateTable, input: &Tokenized) -> Self {
    let n = input.len();
    let mut parser = Self {
      table,
      forest: Forest::new(input.matches.clone()),
      vertices: Vec::new(),
      levels: vec![BTreeMap::new(); n + 1],
      pending: vec![Vec::new(); n + 1],
    };
    parser.vertex(0, 0);
    parser
  }

  fn vertex(&mut self, state: StateId, pos: usize) -> VertexId {
    if let Some(&v) = self.levels[pos].get(&state) {
      return v;
    }
    let v = self.vertices.len();
    self.vertices.push(Vertex {
      state,
      pos,
      edges: Vec::new(),
    });
    self.levels[pos].insert(state, v);
    v
  }

  /// Pushes `node` from vertex `from` through the automaton, linking the
  /// resulting vertex back to `from`. New edges are queued for reduction.
  fn goto(&mut self, from: VertexId, node: NodeId) {
    let symbol = self.forest.get(node).symbol;
    let pos = self.forest.get(node).end;
    let Some(target) = self.table.shift(self.vertices[from].state, symbol) else {
      return;
    };

    let v = self.vertex(target, pos);
    let edge = Edge { node, to: from };
    if !self.vertices[v].edges.contains(&edge) {
      self.vertices[v].edges.push(edge);
      let idx = self.vertices[v].edges.len() - 1;
      self.pending[pos].push((v, idx));
    }
  }

  /// Applies every reduction of `v`'s state that passes through its edge
  fn reduce(&mut self, v: VertexId, edge_idx: usize) {
    let table = self.table;
    let edge = self.vertices[v].edges[edge_idx];
    let pos = self.vertices[v].pos;
    let state = self.vertices[v].state;

    for &rule_id in table.states[state].reductions.iter() {
      let rule = &table.rules[rule_id];

      // (origin vertex, children) for every path of the rule's length
      let paths: Vec<(VertexId, Vec<NodeId>)> = match rule.len() {
        1 => vec![(edge.to, vec![edge.node])],
        2 => self.vertices[edge.to]
          .edges
          .iter()
          .map(|e| (e.to, vec![e.node, edge.node]))
          .collect(),
        _ => Vec::new(),
      };

      for (origin, children) in paths {
        let start = self.vertices[origin].pos;
        let node = self.forest.node(rule.lhs, start, pos);
        self.forest.add_alternative(
          node,
          Alternative::Branch {
            rule: rule_id,
            children,
          },
        );
        self.goto(origin, node);
      }
    }
  }

  /// Shifts every match starting at `pos` onto every vertex there
  fn shift(&mut self, pos: usize) {
    let table = self.table;
    let frontier: Vec<VertexId> = self.levels[pos].values().copied().collect();
    let mut nodes = Vec::new();

    for matched in 0..self.forest.matches.len() {
      let m = &self.forest.matches[matched];
      if m.start != pos {
        continue;
      }
      let (literal, end) = (m.literal.clone(), m.end);
      for &rule in table.terminal_rules(&literal) {
        let node = self.forest.node(table.rules[rule].lhs, pos, end);
        self.forest.add_alternative(node, Alternative::Terminal { rule, matched });
        if !nodes.contains(&node) {
          nodes.push(node);
        }
      }
    }

    for &v in frontier.iter() {
      for &node in nodes.iter() {
        self.goto(v, node);
      }
    }
  }

  fn run(mut self, n: usize) -> Forest {
    for pos in 0..=n {
      while let Some((v, edge)) = self.pending[pos].pop() {
        self.reduce(v, edge);
      }
      trace!(pos, vertices = self.levels[pos].len(), "reduced");
      if pos < n {
        self.shift(pos);
      }
    }

    let accepted = self.levels[n]
      .iter()
      .any(|(&state, _)| self.table.states[state].is_final);
    self.forest.root = self
      .forest
      .find(self.table.start, 0, n)
      .filter(|_| accepted);
    self.forest
  }
}

/// Parses tokenized input into a packed forest rooted at the start symbol
/// spanning all of it. Fails with `NoDerivation` if there is no such root.
pub fn parse(table: &StateTable, input: &Tokenized) -> Result<Forest, ParseError> {
  let n = input.len();
  let mut forest = Parser::new(table, input).run(n);

  debug!(
    nodes = forest.len(),
    alternatives = forest.alternative_count(),
    accepted = forest.root.is_some(),
    "parsed forest"
  );

  if forest.root.is_none() {
    let query = input
      .tokens
      .iter()
      .map(|t| t.text.as_str())
      .collect::<Vec<_>>()
      .join(" ");
    return Err(ParseError::NoDerivation { query });
  }

  forest.sort_alternatives();
  Ok(forest)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::Grammar;
  use crate::tokenizer::{EntityIndex, tokenize};

  fn parse_str(grammar: &str, input: &str) -> Result<(StateTable, Forest), ParseError> {
    let g: Grammar = grammar.parse().unwrap();
    let table = StateTable::compile(&g).unwrap();
    let tokens = tokenize(input, &table, &EntityIndex::new())?;
    let forest = parse(&table, &tokens)?;
    Ok((table, forest))
  }

  #[test]
  fn test_ambiguity_is_packed() {
    // x x x has two bracketings, which share every sub-span node
    let (table, forest) = parse_str("S -> S S; S -> x;", "x x x").unwrap();
    let root = forest.get(forest.root.unwrap());
    assert_eq!((root.start, root.end), (0, 3));
    assert_eq!(root.alternatives.len(), 2);

    // S over [0,1) [1,2) [2,3) [0,2) [1,3) [0,3)
    let s = table.symbol_id("S").unwrap();
    assert!(forest.nodes.iter().all(|n| n.symbol == s));
    assert_eq!(forest.len(), 6);
  }

  #[test]
  fn test_no_derivation() {
    let err = parse_str("S -> A B; A -> a; B -> b;", "b a").unwrap_err();
    assert_eq!(
      err,
      ParseError::NoDerivation {
        query: "b a".to_string()
      }
    );
  }

  #[test]
  fn test_partial_input_rejected() {
    assert!(parse_str("S -> A B; A -> a; B -> b;", "a").is_err());
    assert!(parse_str("S -> A B; A -> a; B -> b;", "a b b").is_err());
  }

  #[test]
  fn test_multi_token_literal() {
    let (_, forest) = parse_str(r#"S -> A B; A -> "a a"; A -> a; B -> b; B -> "a b";"#, "a a b").unwrap();
    let root = forest.get(forest.root.unwrap());
    // "a a" + "b", or "a" + "a b"
    assert_eq!(root.alternatives.len(), 2);
  }

  #[test]
  fn test_insertion_parses_shorter_input() {
    let (table, forest) = parse_str("S -> A B; A -> a; B[ insert: 1 ] -> b;", "a").unwrap();
    let root = forest.get(forest.root.unwrap());
    let rule = &table.rules[root.alternatives[0].rule()];
    assert!(rule.rule.insertion.is_some());
  }

  #[test]
  fn test_transposition_parses_swapped_input() {
    let (table, forest) = parse_str("S[ transpose: 1 ] -> A B; A -> a; B -> b;", "b a").unwrap();
    let root = forest.get(forest.root.unwrap());
    assert!(table.rules[root.alternatives[0].rule()].rule.transposed);
  }
}
