//! Pipeline definition: steps plus their dependency edges, validated once
//! at build time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use briefwise_shared::{BriefwiseError, Result};

use crate::state::JobState;
use crate::step::{DynStep, Step, StepAdapter, StepDescriptor};

/// How a failed step affects the rest of the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A step becomes ready only if its dependencies succeeded and the job
    /// has no errors at all.
    StrictChain,
    /// A step becomes ready once its own dependencies succeeded; failures
    /// elsewhere do not block it.
    #[default]
    Tiered,
}

pub(crate) struct StepNode<S: JobState> {
    pub(crate) descriptor: Arc<StepDescriptor>,
    pub(crate) step: Arc<dyn DynStep<S>>,
    /// Indices of the steps this one depends on.
    pub(crate) deps: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects steps, then validates the graph in [`build`](Self::build).
pub struct PipelineBuilder<S: JobState> {
    mode: ExecutionMode,
    steps: Vec<(StepDescriptor, Arc<dyn DynStep<S>>)>,
}

impl<S: JobState> PipelineBuilder<S> {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            steps: Vec::new(),
        }
    }

    /// Add a step. Its dependencies come from its descriptor's `reads`.
    pub fn step<T: Step<S>>(mut self, step: T) -> Self {
        let descriptor = step.descriptor();
        self.steps.push((descriptor, Arc::new(StepAdapter(step))));
        self
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    ///
    /// [`BriefwiseError::Graph`] for an empty pipeline, a duplicate step name,
    /// two steps writing the same slot, a self-dependency, an unknown
    /// dependency, or a cycle.
    pub fn build(self) -> Result<Pipeline<S>> {
        if self.steps.is_empty() {
            return Err(BriefwiseError::graph("pipeline has no steps"));
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut written: HashSet<&str> = HashSet::new();

        for (i, (descriptor, _)) in self.steps.iter().enumerate() {
            if index.contains_key(&descriptor.name) {
                return Err(BriefwiseError::graph(format!(
                    "duplicate step name '{}'",
                    descriptor.name
                )));
            }
            if !written.insert(descriptor.writes.as_str()) {
                return Err(BriefwiseError::graph(format!(
                    "slot '{}' is written by more than one step",
                    descriptor.writes
                )));
            }
            index.insert(descriptor.name.clone(), graph.add_node(i));
        }

        for (descriptor, _) in &self.steps {
            let target = index[&descriptor.name];
            for dep in &descriptor.reads {
                if dep == &descriptor.name {
                    return Err(BriefwiseError::graph(format!(
                        "step '{dep}' depends on itself"
                    )));
                }
                let source = index.get(dep).ok_or_else(|| {
                    BriefwiseError::graph(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        descriptor.name
                    ))
                })?;
                // Edge direction: dependency → dependent
                graph.update_edge(*source, target, ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| {
            let name = &self.steps[graph[cycle.node_id()]].0.name;
            BriefwiseError::graph(format!("dependency cycle through step '{name}'"))
        })?;
        let order: Vec<usize> = sorted.into_iter().map(|n| graph[n]).collect();

        let nodes: Vec<StepNode<S>> = self
            .steps
            .into_iter()
            .map(|(descriptor, step)| {
                let deps = descriptor
                    .reads
                    .iter()
                    .map(|dep| graph[index[dep]])
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                StepNode {
                    descriptor: Arc::new(descriptor),
                    step,
                    deps,
                }
            })
            .collect();

        let tiers = compute_tiers(&nodes, &order);

        Ok(Pipeline {
            mode: self.mode,
            nodes,
            order,
            tiers,
        })
    }
}

/// Level of a step = 1 + the deepest level among its dependencies.
fn compute_tiers<S: JobState>(nodes: &[StepNode<S>], order: &[usize]) -> Vec<Vec<usize>> {
    let mut level = vec![0usize; nodes.len()];
    for &i in order {
        level[i] = nodes[i]
            .deps
            .iter()
            .map(|&d| level[d] + 1)
            .max()
            .unwrap_or(0);
    }

    let depth = level.iter().copied().max().map_or(0, |m| m + 1);
    let mut tiers = vec![Vec::new(); depth];
    for &i in order {
        tiers[level[i]].push(i);
    }
    tiers
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A validated, immutable step graph shared by every job that runs it.
pub struct Pipeline<S: JobState> {
    mode: ExecutionMode,
    pub(crate) nodes: Vec<StepNode<S>>,
    order: Vec<usize>,
    tiers: Vec<Vec<usize>>,
}

impl<S: JobState> Pipeline<S> {
    pub fn builder(mode: ExecutionMode) -> PipelineBuilder<S> {
        PipelineBuilder::new(mode)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Option<&StepDescriptor> {
        self.nodes
            .iter()
            .map(|n| n.descriptor.as_ref())
            .find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.nodes.iter().map(|n| n.descriptor.as_ref())
    }

    /// Steps with no dependencies.
    pub fn entry_steps(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.deps.is_empty())
            .map(|n| n.descriptor.name.as_str())
            .collect()
    }

    /// One valid sequential execution order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.nodes[i].descriptor.name.as_str())
            .collect()
    }

    /// Groups of steps that may run concurrently, in execution order.
    pub fn tiers(&self) -> Vec<Vec<&str>> {
        self.tiers
            .iter()
            .map(|tier| {
                tier.iter()
                    .map(|&i| self.nodes[i].descriptor.name.as_str())
                    .collect()
            })
            .collect()
    }

    /// `(step name, progress weight)` pairs for a job's progress ledger.
    pub fn progress_weights(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.nodes
            .iter()
            .map(|n| (n.descriptor.name.clone(), n.descriptor.weight))
    }
}

impl<S: JobState> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("mode", &self.mode)
            .field("tiers", &self.tiers())
            .finish()
    }
}
