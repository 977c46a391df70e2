//! Stage dependency graph and execution ordering.
//!
//! The graph has one node per stage; edges run from a dependency to its
//! dependent and come from two places: the stage's base (`FROM <stage>`) and
//! its cross-stage copies (`COPY --from=<stage>`). The graph provides a
//! topological execution order and parallel execution waves.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::spec::{BuildSpec, Instruction, ResolvedArgs, expand};

/// A stage base after name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBase {
  /// External image reference; materialized as an empty snapshot.
  Image(String),
  /// A prior stage of the same spec, by index.
  Stage(usize),
}

/// Errors detected while building the graph, before any execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  /// A stage transitively depends on itself.
  #[error("stage dependency cycle detected")]
  Cycle,

  /// A copy source names a stage that was never declared.
  #[error("stage {stage} references undeclared stage {reference}")]
  UnresolvedReference { stage: String, reference: String },
}

/// The resolved stage graph of one specification.
#[derive(Debug)]
pub struct StageGraph {
  graph: DiGraph<usize, ()>,
  nodes: Vec<NodeIndex>,
  bases: Vec<ResolvedBase>,
  /// Per stage: instruction index of each `COPY --from` -> source stage.
  copy_sources: Vec<BTreeMap<usize, usize>>,
  order: Vec<usize>,
}

impl StageGraph {
  /// Build and validate the graph for a specification.
  ///
  /// `FROM` operands are expanded against the preamble scope and matched
  /// against declared stage names (or numeric indices); anything else is an
  /// external image. `COPY --from` operands are expanded against the owning
  /// stage's scope and must resolve to a declared stage.
  ///
  /// # Errors
  ///
  /// [`GraphError::UnresolvedReference`] for an unknown copy source,
  /// [`GraphError::Cycle`] when the resulting graph is not acyclic.
  pub fn build(spec: &BuildSpec, args: &ResolvedArgs) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..spec.stages.len()).map(|i| graph.add_node(i)).collect();

    let preamble_bindings = args.preamble.bindings();
    let mut bases = Vec::with_capacity(spec.stages.len());
    let mut copy_sources = vec![BTreeMap::new(); spec.stages.len()];

    for (index, stage) in spec.stages.iter().enumerate() {
      let base_ref = expand(&stage.base, &preamble_bindings);
      let base = match spec.stage_index(&base_ref) {
        Some(source) => {
          graph.add_edge(nodes[source], nodes[index], ());
          ResolvedBase::Stage(source)
        }
        None => ResolvedBase::Image(base_ref),
      };
      bases.push(base);

      let stage_bindings = args.stages[index].bindings();
      for (instr_idx, instruction) in stage.instructions.iter().enumerate() {
        if let Instruction::Copy { from: Some(from), .. } = instruction {
          let reference = expand(from, &stage_bindings);
          let source = spec
            .stage_index(&reference)
            .ok_or_else(|| GraphError::UnresolvedReference {
              stage: stage.label(index),
              reference: reference.clone(),
            })?;
          graph.add_edge(nodes[source], nodes[index], ());
          copy_sources[index].insert(instr_idx, source);
        }
      }
    }

    let order = toposort(&graph, None)
      .map_err(|_| GraphError::Cycle)?
      .into_iter()
      .map(|idx| graph[idx])
      .collect();

    Ok(Self {
      graph,
      nodes,
      bases,
      copy_sources,
      order,
    })
  }

  /// Stages in a topologically valid execution order.
  pub fn execution_order(&self) -> &[usize] {
    &self.order
  }

  /// The resolved base of a stage.
  pub fn base(&self, index: usize) -> &ResolvedBase {
    &self.bases[index]
  }

  /// Source stage of a `COPY --from` instruction, by instruction index.
  pub fn copy_source(&self, stage: usize, instruction: usize) -> Option<usize> {
    self.copy_sources[stage].get(&instruction).copied()
  }

  /// All `COPY --from` sources of a stage, keyed by instruction index.
  pub fn copy_sources(&self, stage: usize) -> &BTreeMap<usize, usize> {
    &self.copy_sources[stage]
  }

  /// Direct dependencies of a stage (base stage plus copy sources).
  pub fn dependencies(&self, index: usize) -> Vec<usize> {
    let mut deps: Vec<usize> = self
      .graph
      .neighbors_directed(self.nodes[index], Direction::Incoming)
      .map(|n| self.graph[n])
      .collect();
    deps.sort_unstable();
    deps.dedup();
    deps
  }

  pub fn stage_count(&self) -> usize {
    self.nodes.len()
  }

  /// Stages grouped into parallel execution waves.
  ///
  /// Each wave contains stages whose dependencies all sit in earlier waves,
  /// so the stages of one wave may run concurrently or in any order.
  pub fn waves(&self) -> Vec<Vec<usize>> {
    // Kahn's algorithm variant: peel off zero-in-degree nodes level by level.
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let mut ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

      // Graph was validated acyclic in build(), so progress is guaranteed.
      debug_assert!(!ready.is_empty());

      ready.sort_by_key(|&idx| self.graph[idx]);

      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      waves.push(ready.into_iter().map(|idx| self.graph[idx]).collect());
    }

    waves
  }
}
