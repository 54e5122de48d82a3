use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::semantic::SemanticNode;

/// The literal that matches no input. Rules producing it make their LHS
/// optional, and are folded away by the edit-rule deriver.
pub const EMPTY_SYMBOL: &str = "<empty>";

/// Inflection selected on a child through its parent rule, e.g. the nominative
/// "I" versus the objective "me", or the past-tense "liked"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrammaticalForm {
  Nom,
  Obj,
  Past,
}

/// Grammatical person-number of a subject, which conjugates the verbs that
/// follow it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonNumber {
  OneSg,
  ThreeSg,
  Pl,
}

/// A conjugation table for one terminal rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TextForms {
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub one_sg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub three_sg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub pl: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub past: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub nom: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub obj: Option<String>,
}

impl TextForms {
  pub fn is_empty(&self) -> bool {
    self.first().is_none()
  }

  pub fn form(&self, form: GrammaticalForm) -> Option<&str> {
    match form {
      GrammaticalForm::Nom => self.nom.as_deref(),
      GrammaticalForm::Obj => self.obj.as_deref(),
      GrammaticalForm::Past => self.past.as_deref(),
    }
  }

  pub fn person_number(&self, pn: PersonNumber) -> Option<&str> {
    match pn {
      PersonNumber::OneSg => self.one_sg.as_deref(),
      PersonNumber::ThreeSg => self.three_sg.as_deref(),
      PersonNumber::Pl => self.pl.as_deref(),
    }
  }

  /// The first defined form, in declaration order
  pub fn first(&self) -> Option<&str> {
    [
      &self.one_sg,
      &self.three_sg,
      &self.pl,
      &self.past,
      &self.nom,
      &self.obj,
    ]
    .into_iter()
    .find_map(|f| f.as_deref())
  }

  /// Picks the inflection for the given markers: the grammatical form wins,
  /// then the person-number, then the first form defined.
  pub fn resolve(&self, form: Option<GrammaticalForm>, pn: Option<PersonNumber>) -> Option<&str> {
    form
      .and_then(|f| self.form(f))
      .or_else(|| pn.and_then(|pn| self.person_number(pn)))
      .or_else(|| self.first())
  }
}

/// Display text attached to a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Text {
  Literal(String),
  Forms(TextForms),
}

impl Text {
  pub fn resolve(&self, form: Option<GrammaticalForm>, pn: Option<PersonNumber>) -> Option<&str> {
    match self {
      Self::Literal(s) => Some(s),
      Self::Forms(forms) => forms.resolve(form, pn),
    }
  }
}

impl From<&str> for Text {
  fn from(s: &str) -> Self {
    Self::Literal(s.to_string())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
  #[default]
  Plain,
  /// Input is accepted but displayed as the rule's corrected text
  Substitution,
  /// Input is accepted and displays nothing
  StopWord,
  /// Matches an entity of a category, e.g. `{user}`
  Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhsSymbol {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub form: Option<GrammaticalForm>,
}

impl RhsSymbol {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      form: None,
    }
  }

  pub fn with_form(name: impl Into<String>, form: GrammaticalForm) -> Self {
    Self {
      name: name.into(),
      form: Some(form),
    }
  }
}

impl fmt::Display for RhsSymbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name)?;
    if let Some(form) = self.form {
      write!(f, "[{:?}]", form)?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rhs {
  /// One or two symbols
  Nonterminal(Vec<RhsSymbol>),
  /// A literal surface form, possibly several words, or `<empty>`
  Terminal(String),
}

impl Rhs {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Terminal(_))
  }

  pub fn symbols(&self) -> &[RhsSymbol] {
    match self {
      Self::Nonterminal(syms) => syms,
      Self::Terminal(_) => &[],
    }
  }

  pub fn is_empty_string(&self) -> bool {
    matches!(self, Self::Terminal(s) if s == EMPTY_SYMBOL)
  }

  /// Whether two RHSs would be the same rule: forms don't distinguish them
  pub fn same_as(&self, other: &Rhs) -> bool {
    match (self, other) {
      (Self::Terminal(a), Self::Terminal(b)) => a == b,
      (Self::Nonterminal(a), Self::Nonterminal(b)) => {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
      }
      _ => false,
    }
  }
}

impl fmt::Display for Rhs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Terminal(s) => write!(f, "\"{}\"", s),
      Self::Nonterminal(syms) => {
        for (idx, s) in syms.iter().enumerate() {
          if idx > 0 {
            write!(f, " ")?;
          }
          write!(f, "{}", s)?;
        }
        Ok(())
      }
    }
  }
}

/// A piece of display text that an insertion contributes without consuming
/// any input
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPiece {
  pub text: Text,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub form: Option<GrammaticalForm>,
}

/// Records the symbol an edit rule synthesized in place of input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insertion {
  /// Where the inserted text goes relative to the remaining RHS symbol: 0 is
  /// before it, 1 after it
  pub index: usize,
  pub text: Vec<TextPiece>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub semantic: Option<Arc<SemanticNode>>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub person_number: Option<PersonNumber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
  pub rhs: Rhs,
  pub cost: f64,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub insertion_cost: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub transposition_cost: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub semantic: Option<Arc<SemanticNode>>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub text: Option<Text>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub person_number: Option<PersonNumber>,
  #[serde(default)]
  pub kind: RuleKind,
  /// Blocks insertions that would synthesize this rule's children
  #[serde(default)]
  pub no_insert: bool,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub insertion: Option<Insertion>,
  /// Derived by swapping the two RHS symbols of a base rule
  #[serde(default)]
  pub transposed: bool,
}

impl Rule {
  pub fn new(rhs: Rhs, cost: f64) -> Self {
    Self {
      rhs,
      cost,
      insertion_cost: None,
      transposition_cost: None,
      semantic: None,
      text: None,
      person_number: None,
      kind: RuleKind::Plain,
      no_insert: false,
      insertion: None,
      transposed: false,
    }
  }

  pub fn nonterminal<I, S>(rhs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(
      Rhs::Nonterminal(rhs.into_iter().map(RhsSymbol::new).collect()),
      0.0,
    )
  }

  pub fn terminal(literal: impl Into<String>) -> Self {
    Self::new(Rhs::Terminal(literal.into()), 0.0)
  }

  pub fn with_cost(mut self, cost: f64) -> Self {
    self.cost = cost;
    self
  }

  pub fn with_semantic(mut self, semantic: Arc<SemanticNode>) -> Self {
    self.semantic = Some(semantic);
    self
  }

  pub fn with_text(mut self, text: impl Into<Text>) -> Self {
    self.text = Some(text.into());
    self
  }

  pub fn with_person_number(mut self, pn: PersonNumber) -> Self {
    self.person_number = Some(pn);
    self
  }

  pub fn with_insertion_cost(mut self, cost: f64) -> Self {
    self.insertion_cost = Some(cost);
    self
  }

  pub fn with_transposition_cost(mut self, cost: f64) -> Self {
    self.transposition_cost = Some(cost);
    self
  }

  pub fn with_kind(mut self, kind: RuleKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn len(&self) -> usize {
    match &self.rhs {
      Rhs::Nonterminal(syms) => syms.len(),
      Rhs::Terminal(_) => 1,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_terminal(&self) -> bool {
    self.rhs.is_terminal()
  }

  /// Grammatical form for a child, indexed in surface (input) order
  pub fn form_at(&self, idx: usize) -> Option<GrammaticalForm> {
    self.rhs.symbols().get(idx).and_then(|s| s.form)
  }

  /// Text the terminal rule displays for its own literal. Stop words show
  /// nothing; plain rules without text show the literal itself.
  pub fn display_text(&self) -> Option<Text> {
    match (&self.rhs, self.kind, &self.text) {
      (_, RuleKind::StopWord, _) => None,
      (_, _, Some(text)) => Some(text.clone()),
      (Rhs::Terminal(lit), RuleKind::Plain, None) if lit != EMPTY_SYMBOL => {
        Some(Text::Literal(lit.clone()))
      }
      _ => None,
    }
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.rhs)?;
    if let Some(sem) = &self.semantic {
      write!(f, " {{{}}}", sem)?;
    }
    if self.transposed {
      write!(f, " (transposed)")?;
    }
    if self.insertion.is_some() {
      write!(f, " (insertion)")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn verb_forms() -> TextForms {
    TextForms {
      one_sg: Some("like".into()),
      three_sg: Some("likes".into()),
      pl: Some("like".into()),
      past: Some("liked".into()),
      ..Default::default()
    }
  }

  #[test]
  fn test_resolve_prefers_form() {
    let forms = verb_forms();
    assert_eq!(
      forms.resolve(Some(GrammaticalForm::Past), Some(PersonNumber::ThreeSg)),
      Some("liked")
    );
    assert_eq!(forms.resolve(None, Some(PersonNumber::ThreeSg)), Some("likes"));
    assert_eq!(forms.resolve(None, None), Some("like"));
    // no nominative form on a verb, so fall through to person-number
    assert_eq!(
      forms.resolve(Some(GrammaticalForm::Nom), Some(PersonNumber::Pl)),
      Some("like")
    );
  }

  #[test]
  fn test_display_text() {
    assert_eq!(
      Rule::terminal("repos").display_text(),
      Some(Text::Literal("repos".into()))
    );
    assert_eq!(
      Rule::terminal("repositories")
        .with_kind(RuleKind::Substitution)
        .with_text("repos")
        .display_text(),
      Some(Text::Literal("repos".into()))
    );
    assert_eq!(
      Rule::terminal("the").with_kind(RuleKind::StopWord).display_text(),
      None
    );
    assert_eq!(Rule::terminal(EMPTY_SYMBOL).display_text(), None);
  }

  #[test]
  fn test_rhs_same_ignores_forms() {
    let a = Rhs::Nonterminal(vec![RhsSymbol::with_form("Pronoun", GrammaticalForm::Nom)]);
    let b = Rhs::Nonterminal(vec![RhsSymbol::new("Pronoun")]);
    assert!(a.same_as(&b));
    assert!(!a.same_as(&Rhs::Terminal("pronoun".into())));
  }
}
