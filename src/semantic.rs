use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SemanticKind {
  /// Applied to the semantics of a rule's children, e.g. `followers(me)`
  Function {
    min_params: usize,
    max_params: usize,
    /// At most one application of this function may appear among siblings,
    /// e.g. a repository has exactly one creator
    forbids_multiple: bool,
    /// Applications describe people. Among siblings, they can't be mixed
    /// with applications of functions that don't.
    #[serde(default)]
    people: bool,
  },
  /// A leaf, e.g. `me` or an entity id
  Argument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticDef {
  pub name: String,
  pub cost: f64,
  pub kind: SemanticKind,
}

impl SemanticDef {
  pub fn function(name: impl Into<String>, cost: f64, min_params: usize, max_params: usize) -> Self {
    Self {
      name: name.into(),
      cost,
      kind: SemanticKind::Function {
        min_params,
        max_params,
        forbids_multiple: false,
        people: false,
      },
    }
  }

  pub fn argument(name: impl Into<String>, cost: f64) -> Self {
    Self {
      name: name.into(),
      cost,
      kind: SemanticKind::Argument,
    }
  }

  pub fn forbidding_multiple(mut self) -> Self {
    if let SemanticKind::Function {
      ref mut forbids_multiple,
      ..
    } = self.kind
    {
      *forbids_multiple = true;
    }
    self
  }

  pub fn describing_people(mut self) -> Self {
    if let SemanticKind::Function { ref mut people, .. } = self.kind {
      *people = true;
    }
    self
  }

  pub fn is_people(&self) -> bool {
    matches!(self.kind, SemanticKind::Function { people: true, .. })
  }

  pub fn is_argument(&self) -> bool {
    matches!(self.kind, SemanticKind::Argument)
  }

  fn forbids_multiple(&self) -> bool {
    matches!(
      self.kind,
      SemanticKind::Function {
        forbids_multiple: true,
        ..
      }
    )
  }
}

/// One application (or argument) in a semantic tree. Equality, ordering and
/// hashing only look at names and arguments, never at costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticNode {
  pub def: Arc<SemanticDef>,
  pub args: Vec<Arc<SemanticNode>>,
}

impl SemanticNode {
  pub fn leaf(def: Arc<SemanticDef>) -> Arc<Self> {
    Arc::new(Self {
      def,
      args: Vec::new(),
    })
  }

  /// A bare argument that doesn't come from a declared semantic, like an
  /// entity id matched by the tokenizer.
  pub fn entity(id: &str) -> Arc<Self> {
    Self::leaf(Arc::new(SemanticDef::argument(id, 0.0)))
  }

  pub fn name(&self) -> &str {
    &self.def.name
  }

  /// An open semantic still waits for its children's semantics: a function
  /// with no arguments, or a function wrapping exactly one open semantic.
  pub fn is_open(&self) -> bool {
    if self.def.is_argument() {
      return false;
    }
    match self.args.as_slice() {
      [] => true,
      [only] => only.is_open(),
      _ => false,
    }
  }

  /// Nested object form: arguments are strings, applications are
  /// `{ "semantic": name, "args": [..] }`
  pub fn to_object(&self) -> Value {
    if self.def.is_argument() {
      return Value::String(self.def.name.clone());
    }
    json!({
      "semantic": self.def.name,
      "args": self.args.iter().map(|a| a.to_object()).collect::<Vec<_>>(),
    })
  }

  /// Summed cost of every def in the tree
  pub fn cost(&self) -> f64 {
    self.def.cost + self.args.iter().map(|a| a.cost()).sum::<f64>()
  }

  /// Applies `def` to `args`, returning None if the application is illegal:
  /// wrong arity, identical siblings, repeated forbids-multiple functions, or
  /// people filters mixed with other filters.
  pub fn apply(def: &Arc<SemanticDef>, mut args: Vec<Arc<SemanticNode>>) -> Option<Arc<Self>> {
    let (min, max) = match def.kind {
      SemanticKind::Argument => return None,
      SemanticKind::Function {
        min_params,
        max_params,
        ..
      } => (min_params, max_params),
    };

    if !check_siblings(&mut args) || args.len() < min || args.len() > max {
      return None;
    }

    Some(Arc::new(Self {
      def: def.clone(),
      args,
    }))
  }

  /// Fills the innermost open function of `open` with `args`
  pub fn reduce(open: &Arc<SemanticNode>, args: Vec<Arc<SemanticNode>>) -> Option<Arc<Self>> {
    match open.args.as_slice() {
      [] => Self::apply(&open.def, args),
      [inner] => {
        let inner = Self::reduce(inner, args)?;
        Self::apply(&open.def, vec![inner])
      }
      _ => None,
    }
  }
}

/// Sorts siblings into canonical order and checks that they can coexist.
fn check_siblings(args: &mut [Arc<SemanticNode>]) -> bool {
  args.sort();

  for pair in args.windows(2) {
    if pair[0] == pair[1] {
      return false;
    }
    if pair[0].def.forbids_multiple() && pair[0].name() == pair[1].name() {
      return false;
    }
  }

  // arguments (entity ids, `me`) fit either kind of filter
  let mut filters = args.iter().filter(|a| !a.def.is_argument());
  match filters.next() {
    Some(first) => filters.all(|a| a.def.is_people() == first.def.is_people()),
    None => true,
  }
}

impl PartialEq for SemanticNode {
  fn eq(&self, other: &Self) -> bool {
    self.def.name == other.def.name && self.args == other.args
  }
}

impl Eq for SemanticNode {}

impl Hash for SemanticNode {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.def.name.hash(state);
    self.args.hash(state);
  }
}

impl PartialOrd for SemanticNode {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for SemanticNode {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .def
      .name
      .cmp(&other.def.name)
      .then_with(|| self.args.cmp(&other.args))
  }
}

impl fmt::Display for SemanticNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.def.name)?;
    if self.def.is_argument() {
      return Ok(());
    }
    write!(f, "(")?;
    for (idx, arg) in self.args.iter().enumerate() {
      if idx > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", arg)?;
    }
    write!(f, ")")
  }
}

/// The complete meaning of a parse: the sibling semantics left at the root
/// once every rule has been reduced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticTree {
  pub roots: Vec<Arc<SemanticNode>>,
}

impl SemanticTree {
  /// Builds the root from loose sibling semantics. None if the siblings
  /// conflict, or if one of them was never given its arguments.
  pub fn from_roots(mut roots: Vec<Arc<SemanticNode>>) -> Option<Self> {
    if roots.iter().any(|r| r.is_open()) || !check_siblings(&mut roots) {
      return None;
    }
    Some(Self { roots })
  }

  pub fn is_empty(&self) -> bool {
    self.roots.is_empty()
  }

  /// The roots in object form, see `SemanticNode::to_object`
  pub fn to_object(&self) -> Value {
    Value::Array(self.roots.iter().map(|r| r.to_object()).collect())
  }
}

impl fmt::Display for SemanticTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, root) in self.roots.iter().enumerate() {
      if idx > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", root)?;
    }
    Ok(())
  }
}

/// Interns structurally identical semantic nodes, so candidates that build
/// the same meaning share one allocation.
#[derive(Debug, Default)]
pub struct SemanticCache {
  nodes: HashSet<Arc<SemanticNode>>,
}

impl SemanticCache {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn intern(&mut self, node: Arc<SemanticNode>) -> Arc<SemanticNode> {
    if let Some(existing) = self.nodes.get(&node) {
      return existing.clone();
    }
    self.nodes.insert(node.clone());
    node
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}
