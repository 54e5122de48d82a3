use regex::Regex;
/// Simple recursive-descent parsing of grammar files
use std::str::FromStr;
use std::sync::Arc;

use crate::builder::{GrammarBuilder, Placeholder, PronounRules, StopWords, Substitution, VerbRules, WordRules};
use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::rules::{EMPTY_SYMBOL, GrammaticalForm, PersonNumber, Rhs, RhsSymbol, Rule, RuleKind, Text, TextForms};
use crate::semantic::{SemanticDef, SemanticNode};

impl FromStr for Grammar {
  type Err = GrammarError;

  /// Parses a grammar from a string. Assumes the first rule's symbol
  /// is the start symbol, unless an `@start` directive says otherwise.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut builder = GrammarBuilder::new();
    parse_into(&mut builder, s)?;
    if builder.start().is_none() {
      return Err(GrammarError::Syntax("empty ruleset".to_string()));
    }
    builder.build()
  }
}

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), GrammarError>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

fn syntax<T>(what: &str, s: &str) -> Result<T, GrammarError> {
  let context: String = s.chars().take(40).collect();
  Err(GrammarError::Syntax(format!("{} at \"{}\"", what, context)))
}

/// Try to consume a regex, returning None if it doesn't match at the start
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  if let Some(m) = re.find(s) {
    if m.start() > 0 {
      return (None, s);
    }
    let (_, rest) = s.split_at(m.end());
    (Some(m.as_str()), rest)
  } else {
    (None, s)
  }
}

/// Try to consume a regex, failing if it doesn't match
fn needed_re<'a>(re: &'static Regex, what: &str, s: &'a str) -> ParseResult<'a, &'a str> {
  match optional_re(re, s) {
    (Some(c), rest) => Ok((c, rest)),
    _ => syntax(&format!("expected {}", what), s),
  }
}

/// Try to consume a char, returning None if it doesn't match
fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

/// Try to consume a char, failing if it doesn't match
fn needed_char(c: char, s: &str) -> ParseResult<'_, char> {
  match optional_char(c, s) {
    (Some(c), rest) => Ok((c, rest)),
    _ => syntax(&format!("expected '{}'", c), s),
  }
}

/// Skips whitespace and // comments
fn skip_whitespace(s: &str) -> &str {
  regex_static!(WHITESPACE_OR_COMMENT, r"^(\s|//[^\n]*)*");
  optional_re(&WHITESPACE_OR_COMMENT, s).1
}

/// Tries to parse a symbol name made of letters, numbers, -, _ and +
fn parse_name(s: &str) -> ParseResult<'_, &str> {
  regex_static!(NAME, r"^[a-zA-Z0-9\-_+]+");
  needed_re(&NAME, "name", s)
}

/// A bare or double-quoted value
fn parse_atom(s: &str) -> ParseResult<'_, String> {
  regex_static!(QUOTED, r#"^"([^"]*)""#);
  regex_static!(BARE, r#"^[^\s,;:|\[\]\(\)\{\}"]+"#);

  if let Some(caps) = QUOTED.captures(s) {
    let whole = caps.get(0).map_or(0, |m| m.end());
    let inner = caps.get(1).map_or("", |m| m.as_str());
    return Ok((inner.to_string(), &s[whole..]));
  }
  let (atom, rest) = needed_re(&BARE, "value", s)?;
  Ok((atom.to_string(), rest))
}

/// A semantic expression as written: `name` or `name(arg, ...)`
#[derive(Debug, Clone, PartialEq)]
struct SemExpr {
  name: String,
  args: Vec<SemExpr>,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
  /// One or more `|`-separated atoms
  Atoms(Vec<String>),
  /// `{ key: atom, ... }`
  Table(Vec<(String, String)>),
  Sem(SemExpr),
}

fn parse_sem(s: &str) -> ParseResult<'_, SemExpr> {
  let (name, s) = parse_atom(s)?;
  let s = skip_whitespace(s);
  let (open, mut rem) = optional_char('(', s);
  let mut args = Vec::new();

  if open.is_some() {
    loop {
      rem = skip_whitespace(rem);
      if let (Some(_), s) = optional_char(')', rem) {
        rem = s;
        break;
      }
      let (arg, s) = parse_sem(rem)?;
      args.push(arg);
      let s = skip_whitespace(s);
      rem = optional_char(',', s).1;
    }
  }

  Ok((SemExpr { name, args }, rem))
}

fn parse_table(s: &str) -> ParseResult<'_, Vec<(String, String)>> {
  let mut pairs = Vec::new();
  let mut rem = needed_char('{', s)?.1;
  loop {
    rem = skip_whitespace(rem);
    if let (Some(_), s) = optional_char('}', rem) {
      return Ok((pairs, s));
    }
    let (key, s) = parse_name(rem)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(':', s)?;
    let s = skip_whitespace(s);
    let (value, s) = parse_atom(s)?;
    pairs.push((key.to_string(), value));
    let s = skip_whitespace(s);
    rem = optional_char(',', s).1;
  }
}

fn parse_value<'a>(key: &str, s: &'a str) -> ParseResult<'a, Value> {
  if key == "sem" {
    let (sem, s) = parse_sem(s)?;
    return Ok((Value::Sem(sem), s));
  }
  if s.starts_with('{') {
    let (table, s) = parse_table(s)?;
    return Ok((Value::Table(table), s));
  }

  let mut atoms = Vec::new();
  let mut rem = s;
  loop {
    let (atom, s) = parse_atom(rem)?;
    atoms.push(atom);
    let s = skip_whitespace(s);
    match optional_char('|', s) {
      (Some(_), s) => rem = skip_whitespace(s),
      (None, s) => return Ok((Value::Atoms(atoms), s)),
    }
  }
}

/// Parses `[ key: value, ... ]`, or nothing if there's no opening bracket
fn parse_options(s: &str) -> ParseResult<'_, Options> {
  let mut options = Options::default();
  let (open, mut rem) = optional_char('[', s);
  if open.is_none() {
    return Ok((options, s));
  }

  loop {
    rem = skip_whitespace(rem);
    if let (Some(_), s) = optional_char(']', rem) {
      return Ok((options, s));
    }
    let (key, s) = parse_name(rem)?;
    let s = skip_whitespace(s);
    let (_, s) = needed_char(':', s)?;
    let s = skip_whitespace(s);
    let (value, s) = parse_value(key, s)?;
    options.0.push((key.to_string(), value));
    let s = skip_whitespace(s);
    rem = optional_char(',', s).1;
  }
}

#[derive(Debug, Default)]
struct Options(Vec<(String, Value)>);

impl Options {
  /// Removes and returns an option so that leftovers can be reported
  fn take(&mut self, key: &str) -> Option<Value> {
    let idx = self.0.iter().position(|(k, _)| k == key)?;
    Some(self.0.remove(idx).1)
  }

  fn atoms(&mut self, key: &str) -> Result<Vec<String>, GrammarError> {
    match self.take(key) {
      None => Ok(Vec::new()),
      Some(Value::Atoms(atoms)) => Ok(atoms),
      Some(other) => Err(GrammarError::Syntax(format!("{}: expected words, got {:?}", key, other))),
    }
  }

  fn atom(&mut self, key: &str) -> Result<Option<String>, GrammarError> {
    let mut atoms = self.atoms(key)?;
    match atoms.len() {
      0 => Ok(None),
      1 => Ok(atoms.pop()),
      _ => Err(GrammarError::Syntax(format!("{}: expected a single value", key))),
    }
  }

  fn required(&mut self, key: &str) -> Result<String, GrammarError> {
    self
      .atom(key)?
      .ok_or_else(|| GrammarError::Syntax(format!("missing required option {}", key)))
  }

  fn number(&mut self, key: &str) -> Result<Option<f64>, GrammarError> {
    self
      .atom(key)?
      .map(|n| {
        n.parse::<f64>()
          .map_err(|_| GrammarError::Syntax(format!("{}: {} is not a number", key, n)))
      })
      .transpose()
  }

  fn flag(&mut self, key: &str) -> Result<bool, GrammarError> {
    match self.atom(key)?.as_deref() {
      None | Some("false") => Ok(false),
      Some("true") => Ok(true),
      Some(other) => Err(GrammarError::Syntax(format!("{}: {} is not a boolean", key, other))),
    }
  }

  fn substitutions(&mut self) -> Result<Vec<Substitution>, GrammarError> {
    let penalty = self.number("sub-cost")?.unwrap_or(0.0);
    Ok(
      self
        .atoms("subs")?
        .into_iter()
        .map(|lit| Substitution::new(lit, penalty))
        .collect(),
    )
  }

  fn semantic(&mut self, b: &GrammarBuilder) -> Result<Option<Arc<SemanticNode>>, GrammarError> {
    match self.take("sem") {
      None => Ok(None),
      Some(Value::Sem(expr)) => build_semantic(b, &expr).map(Some),
      Some(other) => Err(GrammarError::Syntax(format!("sem: unexpected {:?}", other))),
    }
  }

  fn finish(self, context: &str) -> Result<(), GrammarError> {
    match self.0.first() {
      None => Ok(()),
      Some((key, _)) => Err(GrammarError::Syntax(format!("unknown option {} on {}", key, context))),
    }
  }
}

fn build_semantic(b: &GrammarBuilder, expr: &SemExpr) -> Result<Arc<SemanticNode>, GrammarError> {
  let def = b.semantic(&expr.name)?;
  if expr.args.is_empty() {
    return Ok(SemanticNode::leaf(def));
  }
  let args = expr
    .args
    .iter()
    .map(|a| build_semantic(b, a))
    .collect::<Result<Vec<_>, _>>()?;
  SemanticNode::apply(&def, args)
    .ok_or_else(|| GrammarError::malformed(&expr.name, "semantic arguments violate its arity"))
}

fn parse_form(s: &str) -> Result<GrammaticalForm, GrammarError> {
  match s {
    "nom" => Ok(GrammaticalForm::Nom),
    "obj" => Ok(GrammaticalForm::Obj),
    "past" => Ok(GrammaticalForm::Past),
    _ => Err(GrammarError::Syntax(format!("unknown grammatical form {}", s))),
  }
}

fn parse_person_number(s: &str) -> Result<PersonNumber, GrammarError> {
  match s {
    "one-sg" => Ok(PersonNumber::OneSg),
    "three-sg" => Ok(PersonNumber::ThreeSg),
    "pl" => Ok(PersonNumber::Pl),
    _ => Err(GrammarError::Syntax(format!("unknown person-number {}", s))),
  }
}

fn parse_kind(s: &str) -> Result<RuleKind, GrammarError> {
  match s {
    "substitution" => Ok(RuleKind::Substitution),
    "stop-word" => Ok(RuleKind::StopWord),
    "placeholder" => Ok(RuleKind::Placeholder),
    _ => Err(GrammarError::Syntax(format!("unknown rule kind {}", s))),
  }
}

fn text_forms(pairs: Vec<(String, String)>) -> Result<TextForms, GrammarError> {
  let mut forms = TextForms::default();
  for (key, value) in pairs {
    let slot = match key.as_str() {
      "one-sg" => &mut forms.one_sg,
      "three-sg" => &mut forms.three_sg,
      "pl" => &mut forms.pl,
      "past" => &mut forms.past,
      "nom" => &mut forms.nom,
      "obj" => &mut forms.obj,
      _ => return Err(GrammarError::Syntax(format!("unknown text form {}", key))),
    };
    *slot = Some(value);
  }
  Ok(forms)
}

/// A right-hand-side entry as written
enum Production {
  Literal(String),
  Symbol(RhsSymbol),
}

fn parse_production(s: &str) -> ParseResult<'_, Production> {
  regex_static!(PLACEHOLDER, r"^\{[a-zA-Z0-9\-_]+\}");

  if s.starts_with('"') {
    let (lit, s) = parse_atom(s)?;
    return Ok((Production::Literal(lit), s));
  }
  if let Some(rest) = s.strip_prefix(EMPTY_SYMBOL) {
    return Ok((Production::Literal(EMPTY_SYMBOL.to_string()), rest));
  }
  if let (Some(lit), rest) = optional_re(&PLACEHOLDER, s) {
    return Ok((Production::Literal(lit.to_string()), rest));
  }

  let (name, s) = parse_name(s)?;
  if name.starts_with(|c: char| c.is_lowercase() || c.is_ascii_digit()) {
    // lower-case names are literals, like the words they match
    return Ok((Production::Literal(name.to_string()), s));
  }

  let s = skip_whitespace(s);
  let (mut options, s) = parse_options(s)?;
  let form = options.atom("form")?.map(|f| parse_form(&f)).transpose()?;
  options.finish(name)?;

  Ok((
    Production::Symbol(RhsSymbol {
      name: name.to_string(),
      form,
    }),
    s,
  ))
}

/// Symbol, options, productions, terminated by ;
fn parse_rule<'a>(b: &mut GrammarBuilder, s: &'a str) -> Result<&'a str, GrammarError> {
  regex_static!(ARROW, "^->");

  let (lhs, s) = parse_name(s)?;
  let s = skip_whitespace(s);
  let (mut options, s) = parse_options(s)?;
  let s = skip_whitespace(s);
  let (_, s) = needed_re(&ARROW, "->", s)?;

  let mut prods = Vec::new();
  let mut rem = s;
  loop {
    rem = skip_whitespace(rem);
    if let (Some(_), s) = optional_char(';', rem) {
      rem = s;
      break;
    }
    let (prod, s) = parse_production(rem)?;
    prods.push(prod);
    rem = s;
  }

  let rhs = match prods.as_slice() {
    [Production::Literal(lit)] => Rhs::Terminal(lit.clone()),
    _ => Rhs::Nonterminal(
      prods
        .into_iter()
        .map(|p| match p {
          Production::Symbol(sym) => Ok(sym),
          Production::Literal(lit) => Err(GrammarError::malformed(
            lhs,
            format!("literal {} in a nonterminal rule", lit),
          )),
        })
        .collect::<Result<Vec<_>, _>>()?,
    ),
  };

  let mut rule = Rule::new(rhs, options.number("cost")?.unwrap_or(0.0));
  rule.insertion_cost = options.number("insert")?;
  rule.transposition_cost = options.number("transpose")?;
  rule.semantic = options.semantic(b)?;
  rule.person_number = options.atom("pn")?.map(|p| parse_person_number(&p)).transpose()?;
  rule.no_insert = options.flag("no-insert")?;
  if let Some(kind) = options.atom("kind")? {
    rule.kind = parse_kind(&kind)?;
  }
  rule.text = match options.take("text") {
    None => None,
    Some(Value::Table(pairs)) => Some(Text::Forms(text_forms(pairs)?)),
    Some(Value::Atoms(mut atoms)) if atoms.len() == 1 => atoms.pop().map(Text::Literal),
    Some(other) => return Err(GrammarError::Syntax(format!("text: unexpected {:?}", other))),
  };
  options.finish(lhs)?;

  b.add_rule(lhs, rule)?;
  Ok(rem)
}

/// `@directive Name [options];`
fn parse_directive<'a>(b: &mut GrammarBuilder, s: &'a str) -> Result<&'a str, GrammarError> {
  let (_, s) = needed_char('@', s)?;
  let (directive, s) = parse_name(s)?;
  let s = skip_whitespace(s);
  let (name, s) = parse_name(s)?;
  let s = skip_whitespace(s);
  let (mut options, s) = parse_options(s)?;
  let s = skip_whitespace(s);
  let (_, rest) = needed_char(';', s)?;

  match directive {
    "start" => {
      b.set_start(name);
    }
    "function" => {
      let min = options.number("min")?.unwrap_or(1.0) as usize;
      let max = options.number("max")?.unwrap_or(1.0) as usize;
      let cost = options.number("cost")?.unwrap_or(0.0);
      let mut def = SemanticDef::function(name, cost, min, max);
      if options.flag("forbids-multiple")? {
        def = def.forbidding_multiple();
      }
      if options.flag("people")? {
        def = def.describing_people();
      }
      b.define_semantic(def)?;
    }
    "argument" => {
      let cost = options.number("cost")?.unwrap_or(0.0);
      b.define_semantic(SemanticDef::argument(name, cost))?;
    }
    "word" => {
      let word = WordRules {
        accepted: options.atoms("accepted")?,
        substitutions: options.substitutions()?,
        insertion_cost: options.number("insert")?,
        optional: options.flag("optional")?,
      };
      b.add_word(name, word)?;
    }
    "verb" => {
      let verb = VerbRules {
        one_sg: options.required("one-sg")?,
        three_sg: options.required("three-sg")?,
        pl: options.required("pl")?,
        past: options.atom("past")?,
        accepted: options.atoms("accepted")?,
        substitutions: options.substitutions()?,
        insertion_cost: options.number("insert")?,
      };
      b.add_verb(name, verb)?;
    }
    "pronoun" => {
      let pronoun = PronounRules {
        nom: options.required("nom")?,
        obj: options.required("obj")?,
        substitutions: options.substitutions()?,
        insertion_cost: options.number("insert")?,
        semantic: options.semantic(b)?,
      };
      b.add_pronoun(name, pronoun)?;
    }
    "stop-words" => {
      let penalty = options.number("sub-cost")?.unwrap_or(0.0);
      let words = options
        .atoms("words")?
        .into_iter()
        .map(|w| Substitution::new(w, penalty))
        .collect();
      b.add_stop_words(name, StopWords { words })?;
    }
    "placeholder" => {
      let placeholder = Placeholder {
        category: options.required("category")?,
        semantic: options.semantic(b)?,
      };
      b.add_placeholder(name, placeholder)?;
    }
    "optional" => {
      b.add_optional(name)?;
    }
    _ => return syntax(&format!("unknown directive @{}", directive), s),
  }

  options.finish(name)?;
  Ok(rest)
}

/// Parses grammar text into an existing builder, so text and programmatic
/// rules can be mixed
pub fn parse_into(b: &mut GrammarBuilder, s: &str) -> Result<(), GrammarError> {
  let mut rem = s;
  loop {
    rem = skip_whitespace(rem);
    if rem.is_empty() {
      return Ok(());
    }
    rem = if rem.starts_with('@') {
      parse_directive(b, rem)?
    } else {
      parse_rule(b, rem)?
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::semantic::SemanticKind;

  #[test]
  fn test_parse_simple() {
    let g: Grammar = r#"
      // comments are skipped
      S -> A B;
      A -> a;
      B -> "b c";
    "#
    .parse()
    .unwrap();

    assert_eq!(g.start, "S");
    assert_eq!(g.rule_count(), 3);
    assert_eq!(g.rules_for("B")[0].rhs, Rhs::Terminal("b c".to_string()));
  }

  #[test]
  fn test_parse_options() {
    let g: Grammar = r#"
      @function followers [ min: 1, max: 2, cost: 0.5 ];
      @argument me;
      S[ sem: followers, pn: pl, transpose: 0.1 ] -> Me[ form: obj ] X;
      Me[ sem: me, text: { nom: I, obj: me } ] -> me;
      X[ insert: 2, kind: substitution, text: "the x" ] -> x;
    "#
    .parse()
    .unwrap();

    let s = &g.rules_for("S")[0];
    assert_eq!(s.person_number, Some(PersonNumber::Pl));
    assert_eq!(s.transposition_cost, Some(0.1));
    assert_eq!(s.form_at(0), Some(GrammaticalForm::Obj));
    assert_eq!(s.cost, 0.5);
    assert!(s.semantic.as_ref().unwrap().is_open());

    let me = &g.rules_for("Me")[0];
    assert_eq!(
      me.text.as_ref().unwrap().resolve(Some(GrammaticalForm::Nom), None),
      Some("I")
    );

    let x = &g.rules_for("X")[0];
    assert_eq!(x.kind, RuleKind::Substitution);
    assert_eq!(x.insertion_cost, Some(2.0));
    assert_eq!(x.text, Some(Text::Literal("the x".to_string())));
  }

  #[test]
  fn test_parse_directives() {
    let g: Grammar = r#"
      @start S;
      @argument me;
      A -> a;
      S -> Follow Pronoun;
      S -> Stop A;
      @verb Follow [ one-sg: follow, three-sg: follows, pl: follow, past: followed, subs: "subscribe to" | following ];
      @pronoun Pronoun [ nom: I, obj: me, sem: me ];
      @stop-words Stop [ words: the | all ];
    "#
    .parse()
    .unwrap();

    assert_eq!(g.start, "S");
    assert_eq!(g.rules_for("Follow").len(), 5);
    assert_eq!(g.rules_for("Pronoun").len(), 2);
    assert_eq!(g.rules_for("Stop").len(), 3);
  }

  #[test]
  fn test_function_flags() {
    let g: Grammar = r#"
      @function gender [ cost: 0.5, people: true, forbids-multiple: true ];
      @function liked-by [ max: 3 ];
      @argument female;
      S[ sem: gender(female) ] -> female;
      S[ sem: liked-by ] -> liked;
    "#
    .parse()
    .unwrap();

    assert!(g.semantics["gender"].is_people());
    assert!(!g.semantics["liked-by"].is_people());
    assert_eq!(
      g.semantics["gender"].kind,
      SemanticKind::Function {
        min_params: 1,
        max_params: 1,
        forbids_multiple: true,
        people: true,
      }
    );
  }

  #[test]
  fn test_nested_semantic() {
    let g: Grammar = r#"
      @function not;
      @function followers;
      S[ sem: not(followers) ] -> a;
    "#
    .parse()
    .unwrap();

    let sem = g.rules_for("S")[0].semantic.as_ref().unwrap();
    assert_eq!(sem.to_string(), "not(followers())");
    assert!(sem.is_open());
  }

  #[test]
  fn test_errors() {
    assert!(matches!("".parse::<Grammar>(), Err(GrammarError::Syntax(_))));
    assert!(matches!(
      "S[ bogus: 1 ] -> a;".parse::<Grammar>(),
      Err(GrammarError::Syntax(_))
    ));
    assert!(matches!(
      "S -> A b; A -> a;".parse::<Grammar>(),
      Err(GrammarError::MalformedRule { .. })
    ));
    assert!(matches!(
      "S[ sem: nope ] -> a;".parse::<Grammar>(),
      Err(GrammarError::UnknownSemantic(_))
    ));
    assert!(matches!(
      "S -> A; A -> a; B -> b;".parse::<Grammar>(),
      Err(GrammarError::UnreachableSymbol(_))
    ));
  }
}
