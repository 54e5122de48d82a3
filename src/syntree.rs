use std::fmt;

use crate::forest::{Alternative, Forest, NodeId};
use crate::state_table::{RuleId, StateTable};
use crate::utils::fmt_cost;

#[derive(Debug, PartialEq, Clone)]
pub struct Constituent<T> {
  pub value: T,
  pub span: (usize, usize),
}

impl<T> fmt::Display for Constituent<T>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Word<U> {
  pub value: U,
  pub span: (usize, usize),
}

impl<U> fmt::Display for Word<U>
where
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub enum SynTree<T, U> {
  Branch(Constituent<T>, Vec<SynTree<T, U>>),
  Leaf(Word<U>),
}

impl<T, U> SynTree<T, U> {
  pub fn get_branch(&self) -> Option<(&Constituent<T>, &Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn get_leaf(&self) -> Option<&Word<U>> {
    match self {
      Self::Leaf(w) => Some(w),
      _ => None,
    }
  }
}

/// The rule picked for a forest node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
  pub node: NodeId,
  pub rule: RuleId,
}

/// A derivation as a tree of rule choices. Leaves index `Forest::matches`.
pub type DerivationTree = SynTree<Choice, usize>;

impl SynTree<Choice, usize> {
  /// Rebuilds a derivation from the (node, alternative) choices a search
  /// made, in pre-order. None if the choices don't describe a whole tree.
  pub fn from_choices(forest: &Forest, choices: &[(NodeId, usize)]) -> Option<Self> {
    let mut iter = choices.iter().copied();
    let &(root, _) = choices.first()?;
    let tree = Self::build(forest, root, &mut iter)?;
    iter.next().is_none().then_some(tree)
  }

  fn build(forest: &Forest, node: NodeId, choices: &mut impl Iterator<Item = (NodeId, usize)>) -> Option<Self> {
    let (chosen, alt_idx) = choices.next()?;
    if chosen != node {
      return None;
    }

    let fnode = forest.get(node);
    let alt = fnode.alternatives.get(alt_idx)?;
    let span = (fnode.start, fnode.end);
    let children = match alt {
      Alternative::Terminal { matched, .. } => vec![SynTree::Leaf(Word {
        value: *matched,
        span,
      })],
      Alternative::Branch { children, .. } => children
        .iter()
        .map(|&child| Self::build(forest, child, choices))
        .collect::<Option<Vec<_>>>()?,
    };

    Some(SynTree::Branch(
      Constituent {
        value: Choice {
          node,
          rule: alt.rule(),
        },
        span,
      },
      children,
    ))
  }

  /// Total rule cost of the subtree
  pub fn cost(&self, table: &StateTable) -> f64 {
    match self {
      Self::Leaf(_) => 0.0,
      Self::Branch(cons, children) => {
        table.rules[cons.value.rule].rule.cost + children.iter().map(|c| c.cost(table)).sum::<f64>()
      }
    }
  }

  /// A printable tree: symbols with subtree costs at the branches, the
  /// matched input at the leaves
  pub fn labelled(&self, table: &StateTable, forest: &Forest) -> SynTree<String, String> {
    match self {
      Self::Leaf(w) => SynTree::Leaf(Word {
        value: forest.matches[w.value].text.clone(),
        span: w.span,
      }),
      Self::Branch(cons, children) => {
        let rule = &table.rules[cons.value.rule];
        let mut label = format!("{} ({})", table.symbol_name(rule.lhs), fmt_cost(self.cost(table)));
        if rule.rule.transposed {
          label.push_str(" transposed");
        }
        if rule.rule.insertion.is_some() {
          label.push_str(" +insertion");
        }
        SynTree::Branch(
          Constituent {
            value: label,
            span: cons.span,
          },
          children.iter().map(|c| c.labelled(table, forest)).collect(),
        )
      }
    }
  }
}

impl<T, U> fmt::Display for SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(t) => write!(f, "{}", t),
      Self::Branch(t, ts) => {
        write!(f, "({}", t)?;
        if ts.len() == 1 {
          write!(f, " ({}))", ts[0])
        } else {
          for t in ts.iter() {
            let fmt = format!("{}", t);
            for line in fmt.lines() {
              write!(f, "\n  {}", line)?;
            }
          }
          write!(f, ")")
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::forest::Alternative;
  use crate::tokenizer::TerminalMatch;

  fn forest() -> Forest {
    let m = |start: usize, text: &str| TerminalMatch {
      literal: text.to_string(),
      start,
      end: start + 1,
      text: text.to_string(),
      entity: None,
    };
    let mut forest = Forest::new(vec![m(0, "a"), m(1, "b")]);
    let a = forest.node(1, 0, 1);
    let b = forest.node(2, 1, 2);
    let s = forest.node(0, 0, 2);
    forest.add_alternative(a, Alternative::Terminal { rule: 1, matched: 0 });
    forest.add_alternative(b, Alternative::Terminal { rule: 2, matched: 1 });
    forest.add_alternative(s, Alternative::Branch { rule: 0, children: vec![a, b] });
    forest.root = Some(s);
    forest
  }

  #[test]
  fn test_from_choices() {
    let forest = forest();
    let tree = DerivationTree::from_choices(&forest, &[(2, 0), (0, 0), (1, 0)]).unwrap();
    let (cons, children) = tree.get_branch().unwrap();
    assert_eq!(cons.value, Choice { node: 2, rule: 0 });
    assert_eq!(cons.span, (0, 2));
    assert_eq!(children.len(), 2);

    let (_, leaves) = children[1].get_branch().unwrap();
    assert_eq!(leaves[0].get_leaf().unwrap().value, 1);
  }

  #[test]
  fn test_from_bad_choices() {
    let forest = forest();
    // wrong order
    assert!(DerivationTree::from_choices(&forest, &[(2, 0), (1, 0), (0, 0)]).is_none());
    // left over
    assert!(DerivationTree::from_choices(&forest, &[(2, 0), (0, 0), (1, 0), (1, 0)]).is_none());
    // missing alternative
    assert!(DerivationTree::from_choices(&forest, &[(2, 1), (0, 0), (1, 0)]).is_none());
  }
}
