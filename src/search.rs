use std::cmp::Ordering;
use im::Vector;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::SearchConfig;
use crate::forest::{Alternative, Forest, NodeId};
use crate::rules::RuleKind;
use crate::semantic::{SemanticCache, SemanticNode, SemanticTree};
use crate::state_table::StateTable;

/// When a search should stop early
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits<'a> {
  pub k: usize,
  pub max_expansions: usize,
  pub deadline: Option<Instant>,
  pub cancel: Option<&'a AtomicBool>,
  /// Keep the choices of parses dropped for repeating a found meaning
  pub record_duplicates: bool,
}

impl Default for SearchLimits<'_> {
  fn default() -> Self {
    Self::from_config(&SearchConfig::default())
  }
}

impl<'a> SearchLimits<'a> {
  pub fn from_config(config: &SearchConfig) -> Self {
    Self {
      k: config.k,
      max_expansions: config.max_expansions,
      deadline: config
        .timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms)),
      cancel: None,
      record_duplicates: false,
    }
  }

  pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
    self.cancel = Some(cancel);
    self
  }

  fn exceeded(&self, expansions: usize) -> bool {
    expansions >= self.max_expansions
      || self.deadline.is_some_and(|d| Instant::now() >= d)
      || self.cancel.is_some_and(|c| c.load(atomic::Ordering::Relaxed))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
  /// Candidates popped off the queue
  pub expansions: usize,
  /// Branches dropped for illegal semantics
  pub discarded: usize,
  /// Complete parses dropped because an earlier one meant the same thing
  pub duplicates: usize,
  /// Stopped by a limit before finding k results or running out
  pub truncated: bool,
}

/// A later parse that reached an already-found meaning
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicate {
  pub cost: f64,
  pub choices: Vec<(NodeId, usize)>,
}

/// One complete parse: its cost, meaning, and the alternative picked at
/// every node it visited, in pre-order
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
  pub cost: f64,
  pub semantic: SemanticTree,
  pub choices: Vec<(NodeId, usize)>,
  /// Cheapest first. Only filled when `SearchLimits::record_duplicates` is set.
  pub duplicates: Vec<Duplicate>,
}

#[derive(Debug, Clone, Copy)]
enum Step {
  Expand(NodeId),
  /// Close the innermost semantic frame
  Reduce,
}

/// A rule's semantic and the argument semantics its children have produced
/// so far
#[derive(Debug, Clone)]
struct Frame {
  semantic: Option<Arc<SemanticNode>>,
  args: Vector<Arc<SemanticNode>>,
}

/// An immutable partial parse. Every field is a persistent vector, so the
/// candidates expanded from one parent share structure instead of copying.
/// `steps` and `frames` are stacks with their top at the front.
#[derive(Debug, Clone)]
struct Candidate {
  cost: f64,
  /// `cost` plus the cheapest completion of every pending node. Exact for
  /// the best completion, so it never overestimates.
  bound: f64,
  steps: Vector<Step>,
  frames: Vector<Frame>,
  choices: Vector<(NodeId, usize)>,
}

/// Heap entry: lowest bound first, then the earliest pushed
struct Queued {
  seq: u64,
  candidate: Candidate,
}

impl PartialEq for Queued {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Queued {
  // BinaryHeap is a max-heap, so both comparisons are reversed
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .candidate
      .bound
      .total_cmp(&self.candidate.bound)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

/// Lets a single open semantic among siblings take the others as its
/// arguments. Two open siblings can't be combined.
fn combine_siblings(mut args: Vec<Arc<SemanticNode>>) -> Option<Vec<Arc<SemanticNode>>> {
  let mut open = args.iter().enumerate().filter(|(_, a)| a.is_open()).map(|(i, _)| i);
  let (first, second) = (open.next(), open.next());

  match (first, second) {
    (None, _) => Some(args),
    (Some(_), Some(_)) => None,
    (Some(_), None) if args.len() == 1 => Some(args),
    (Some(idx), None) => {
      let func = args.remove(idx);
      SemanticNode::reduce(&func, args).map(|n| vec![n])
    }
  }
}

/// The semantics a frame hands to its parent once all its children are done
fn close_frame(frame: &Frame) -> Option<Vec<Arc<SemanticNode>>> {
  let args = combine_siblings(frame.args.iter().cloned().collect())?;

  match &frame.semantic {
    None => Some(args),
    Some(sem) if sem.is_open() && args.is_empty() => Some(vec![sem.clone()]),
    Some(sem) if sem.is_open() => SemanticNode::reduce(sem, args).map(|n| vec![n]),
    Some(sem) => {
      let mut all = args;
      all.push(sem.clone());
      Some(all)
    }
  }
}

/// Adds argument semantics to the innermost frame
fn with_args(frames: &Vector<Frame>, args: Vec<Arc<SemanticNode>>) -> Vector<Frame> {
  let mut frames = frames.clone();
  if let Some(top) = frames.front_mut() {
    top.args.extend(args);
  }
  frames
}

/// Best-first enumeration of a forest's derivations, cheapest first
pub struct Search<'a> {
  table: &'a StateTable,
  forest: &'a Forest,
  min_costs: Vec<f64>,
  cache: SemanticCache,
  stats: SearchStats,
}

impl<'a> Search<'a> {
  pub fn new(table: &'a StateTable, forest: &'a Forest) -> Self {
    Self {
      table,
      forest,
      min_costs: forest.min_costs(table),
      cache: SemanticCache::new(),
      stats: SearchStats::default(),
    }
  }

  fn intern_all(&mut self, nodes: Vec<Arc<SemanticNode>>) -> Vec<Arc<SemanticNode>> {
    nodes.into_iter().map(|n| self.cache.intern(n)).collect()
  }

  /// Semantics of a terminal alternative. Placeholders feed their entity to
  /// the rule's open semantic, if it has one.
  fn terminal_semantics(&mut self, rule_id: usize, matched: usize) -> Option<Vec<Arc<SemanticNode>>> {
    let rule = &self.table.rules[rule_id].rule;
    let entity = self.forest.matches[matched]
      .entity
      .as_ref()
      .filter(|_| rule.kind == RuleKind::Placeholder)
      .map(|e| SemanticNode::entity(&e.id));

    let sems = match (&rule.semantic, entity) {
      (None, None) => Vec::new(),
      (None, Some(entity)) => vec![entity],
      (Some(sem), None) => vec![sem.clone()],
      (Some(sem), Some(entity)) if sem.is_open() => vec![SemanticNode::reduce(sem, vec![entity])?],
      (Some(sem), Some(entity)) => vec![sem.clone(), entity],
    };
    Some(self.intern_all(sems))
  }

  /// Closes every finished frame at the front of the candidate's steps.
  /// None if one of them combines illegally.
  fn settle(&mut self, mut candidate: Candidate) -> Option<Candidate> {
    while matches!(candidate.steps.front(), Some(Step::Reduce)) {
      candidate.steps.pop_front();
      let frame = candidate.frames.pop_front()?;
      let sems = close_frame(&frame)?;
      let sems = self.intern_all(sems);

      candidate.frames = with_args(&candidate.frames, sems);
    }
    Some(candidate)
  }

  /// Every candidate that picks one alternative for the candidate's next node
  fn expand(&mut self, candidate: &Candidate, node: NodeId) -> Vec<Candidate> {
    let (table, forest) = (self.table, self.forest);
    let mut rest = candidate.steps.clone();
    if rest.pop_front().is_none() {
      return Vec::new();
    }
    let mut out = Vec::new();

    for (alt_idx, alt) in forest.get(node).alternatives.iter().enumerate() {
      let rule = &table.rules[alt.rule()].rule;
      let child_bound: f64 = alt.children().iter().map(|&c| self.min_costs[c]).sum();

      let mut next = Candidate {
        cost: candidate.cost + rule.cost,
        bound: candidate.bound - self.min_costs[node] + rule.cost + child_bound,
        steps: rest.clone(),
        frames: candidate.frames.clone(),
        choices: candidate.choices.clone(),
      };
      next.choices.push_back((node, alt_idx));

      match alt {
        Alternative::Terminal { rule: rule_id, matched } => {
          let Some(sems) = self.terminal_semantics(*rule_id, *matched) else {
            self.stats.discarded += 1;
            continue;
          };
          next.frames = with_args(&next.frames, sems);
        }
        Alternative::Branch { children, .. } => {
          let mut args = Vector::new();
          if let Some(sem) = rule.insertion.as_ref().and_then(|i| i.semantic.as_ref()) {
            args.push_back(self.cache.intern(sem.clone()));
          }
          next.frames.push_front(Frame {
            semantic: rule.semantic.clone(),
            args,
          });

          next.steps.push_front(Step::Reduce);
          for &child in children.iter().rev() {
            next.steps.push_front(Step::Expand(child));
          }
        }
      }

      match self.settle(next) {
        Some(next) => out.push(next),
        None => self.stats.discarded += 1,
      }
    }

    out
  }

  /// The root frame's semantics as a finished tree
  fn finish(&mut self, candidate: &Candidate) -> Option<SemanticTree> {
    let root = candidate.frames.front()?;
    let roots = close_frame(root)?;
    SemanticTree::from_roots(self.intern_all(roots))
  }

  /// Finds up to `limits.k` derivations with distinct semantics, in
  /// nondecreasing cost order
  pub fn run(mut self, limits: &SearchLimits<'_>) -> (Vec<Derivation>, SearchStats) {
    let mut results: Vec<Derivation> = Vec::new();
    let Some(root) = self.forest.root else {
      return (results, self.stats);
    };
    if limits.k == 0 {
      return (results, self.stats);
    }

    // semantic -> index of the result that has it
    let mut seen: HashMap<SemanticTree, usize> = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0;
    heap.push(Queued {
      seq,
      candidate: Candidate {
        cost: 0.0,
        bound: self.min_costs[root],
        steps: Vector::unit(Step::Expand(root)),
        frames: Vector::unit(Frame {
          semantic: None,
          args: Vector::new(),
        }),
        choices: Vector::new(),
      },
    });

    while let Some(Queued { candidate, .. }) = heap.pop() {
      if limits.exceeded(self.stats.expansions) {
        self.stats.truncated = true;
        debug!(expansions = self.stats.expansions, found = results.len(), "search truncated");
        break;
      }
      self.stats.expansions += 1;

      match candidate.steps.front().copied() {
        Some(Step::Expand(node)) => {
          for next in self.expand(&candidate, node) {
            seq += 1;
            heap.push(Queued {
              seq,
              candidate: next,
            });
          }
        }
        // settle() never leaves a Reduce at the front
        Some(Step::Reduce) => {}
        None => {
          let Some(semantic) = self.finish(&candidate) else {
            self.stats.discarded += 1;
            continue;
          };
          let choices: Vec<_> = candidate.choices.iter().copied().collect();
          if let Some(&idx) = seen.get(&semantic) {
            self.stats.duplicates += 1;
            trace!(%semantic, cost = candidate.cost, "duplicate semantic");
            if limits.record_duplicates {
              results[idx].duplicates.push(Duplicate {
                cost: candidate.cost,
                choices,
              });
            }
            continue;
          }

          seen.insert(semantic.clone(), results.len());
          results.push(Derivation {
            cost: candidate.cost,
            semantic,
            choices,
            duplicates: Vec::new(),
          });
          if results.len() == limits.k {
            break;
          }
        }
      }
    }

    // bounds are summed in a different order than costs, so float noise
    // could swap near-equal neighbours
    results.sort_by(|a, b| a.cost.total_cmp(&b.cost));

    debug!(
      results = results.len(),
      expansions = self.stats.expansions,
      discarded = self.stats.discarded,
      duplicates = self.stats.duplicates,
      interned = self.cache.len(),
      "search finished"
    );
    (results, self.stats)
  }
}

/// Runs a k-best search over a parsed forest
pub fn k_best(table: &StateTable, forest: &Forest, limits: &SearchLimits<'_>) -> (Vec<Derivation>, SearchStats) {
  Search::new(table, forest).run(limits)
}
