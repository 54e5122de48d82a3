use crate::forest::Forest;
use crate::rules::{GrammaticalForm, Insertion, PersonNumber, RuleKind};
use crate::state_table::StateTable;
use crate::syntree::{DerivationTree, SynTree};

/// Renders a derivation's display text. Pure: the same derivation always
/// renders the same way.
///
/// * A grammatical form set on a RHS symbol applies to that child's subtree,
///   and an inner one overrides it.
/// * A person-number set on a rule applies from that rule on, in rendering
///   order, and is set again after its subtree so an enclosing rule (like a
///   conjunction) wins over its parts.
/// * Transposed rules render in their original order.
pub fn render_text(table: &StateTable, forest: &Forest, tree: &DerivationTree) -> String {
  let mut renderer = Renderer {
    table,
    forest,
    person_number: None,
    words: Vec::new(),
  };
  renderer.node(tree, None);
  renderer.words.join(" ")
}

struct Renderer<'a> {
  table: &'a StateTable,
  forest: &'a Forest,
  person_number: Option<PersonNumber>,
  words: Vec<String>,
}

impl Renderer<'_> {
  fn push(&mut self, text: &str) {
    if !text.is_empty() {
      self.words.push(text.to_string());
    }
  }

  fn insertion(&mut self, insertion: &Insertion, form: Option<GrammaticalForm>) {
    if let Some(pn) = insertion.person_number {
      self.person_number = Some(pn);
    }
    for piece in insertion.text.iter() {
      if let Some(text) = piece.text.resolve(piece.form.or(form), self.person_number) {
        self.push(text);
      }
    }
  }

  fn node(&mut self, tree: &DerivationTree, form: Option<GrammaticalForm>) {
    let SynTree::Branch(cons, children) = tree else {
      return;
    };
    let rule = &self.table.rules[cons.value.rule].rule;
    if let Some(pn) = rule.person_number {
      self.person_number = Some(pn);
    }

    if rule.is_terminal() {
      if rule.kind == RuleKind::Placeholder {
        // entities display as the user typed them
        if let Some(leaf) = children.first().and_then(|c| c.get_leaf()) {
          let text = self.forest.matches[leaf.value].text.clone();
          self.push(&text);
        }
      } else if let Some(text) = rule.display_text() {
        if let Some(resolved) = text.resolve(form, self.person_number) {
          self.push(resolved);
        }
      }
      return;
    }

    let mut kids: Vec<_> = children
      .iter()
      .enumerate()
      .map(|(idx, child)| (child, rule.form_at(idx).or(form)))
      .collect();
    if rule.transposed {
      kids.reverse();
    }

    match &rule.insertion {
      Some(insertion) if insertion.index == 0 => {
        self.insertion(insertion, form);
        for (child, child_form) in kids {
          self.node(child, child_form);
        }
      }
      Some(insertion) => {
        for (child, child_form) in kids {
          self.node(child, child_form);
        }
        self.insertion(insertion, form);
      }
      None => {
        for (child, child_form) in kids {
          self.node(child, child_form);
        }
      }
    }

    if let Some(pn) = rule.person_number {
      self.person_number = Some(pn);
    }
  }
}
