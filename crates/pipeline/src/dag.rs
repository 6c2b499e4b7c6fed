//! Resolves the stage catalog against one run's parameters.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{Command, InputSource, StageKind, StageSpec, Upstream, WorkLayout, CATALOG};
use crate::error::PipelineError;
use crate::event::PipelineParameters;

/// Position of a stage in its DAG's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StageId(usize);

/// One concrete stage of one run.
#[derive(Debug, Clone, Serialize)]
pub struct StageInstance {
    pub id: StageId,
    pub kind: StageKind,
    pub job_name: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub command: Command,
    pub predecessors: Vec<StageId>,
    job_id: Option<String>,
}

impl StageInstance {
    /// Backend job id, once submitted.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

/// Stages of one run plus a topological order over them.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineDag {
    run_id: Uuid,
    stages: Vec<StageInstance>,
    order: Vec<StageId>,
}

impl PipelineDag {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// `None` for an id this DAG never issued.
    pub fn stage(&self, id: StageId) -> Option<&StageInstance> {
        self.stages.get(id.0)
    }

    /// Ids from this DAG's own stages and execution order always resolve.
    pub(crate) fn node(&self, id: StageId) -> &StageInstance {
        &self.stages[id.0]
    }

    /// Predecessors always come before their successors.
    pub fn execution_order(&self) -> &[StageId] {
        &self.order
    }

    pub fn ordered_stages(&self) -> impl Iterator<Item = &StageInstance> {
        self.order.iter().map(|id| &self.stages[id.0])
    }

    pub fn find(&self, kind: StageKind) -> Option<&StageInstance> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.ordered_stages().map(|s| s.kind).collect()
    }

    /// `(predecessor, successor)` pairs by kind, in execution order.
    pub fn edges(&self) -> Vec<(StageKind, StageKind)> {
        self.ordered_stages()
            .flat_map(|s| {
                s.predecessors
                    .iter()
                    .map(move |p| (self.stages[p.0].kind, s.kind))
            })
            .collect()
    }

    pub(crate) fn assign_job_id(&mut self, id: StageId, job_id: String) {
        self.stages[id.0].job_id = Some(job_id);
    }
}

/// Catalog row instantiated for this run, before wiring.
struct Draft<'c> {
    spec: &'c StageSpec,
    /// Chain head at the moment this row was reached.
    chain_head: Option<StageId>,
}

/// Builds [`PipelineDag`]s from a stage catalog.
#[derive(Debug, Clone)]
pub struct DagBuilder {
    catalog: &'static [StageSpec],
    layout: WorkLayout,
}

impl DagBuilder {
    pub fn new(layout: WorkLayout) -> Self {
        Self::with_catalog(&CATALOG, layout)
    }

    pub fn with_catalog(catalog: &'static [StageSpec], layout: WorkLayout) -> Self {
        Self { catalog, layout }
    }

    /// Instantiate, wire, validate and resolve the stages for `params`.
    pub fn build(&self, params: &PipelineParameters) -> Result<PipelineDag, PipelineError> {
        let drafts = self.instantiate(params);

        let by_kind: HashMap<StageKind, StageId> = drafts
            .iter()
            .enumerate()
            .rev()
            .map(|(i, d)| (d.spec.kind, StageId(i)))
            .collect();

        let predecessors = drafts
            .iter()
            .map(|draft| wire(draft, &by_kind))
            .collect::<Result<Vec<_>, _>>()?;

        let order = topological_order(&drafts, &predecessors)?;

        // Resolve paths and commands in dependency order so every input
        // refers to an output that is already known.
        let mut outputs: Vec<Option<String>> = vec![None; drafts.len()];
        let mut resolved: Vec<Option<StageInstance>> = vec![None; drafts.len()];

        for &id in &order {
            let draft = &drafts[id.0];
            let kind = draft.spec.kind;

            let input_path = match draft.spec.input {
                InputSource::SourceObject => params.source_uri(),
                InputSource::OutputOf(upstream) => {
                    let from = resolve(upstream, draft, &by_kind)?;
                    if !predecessors[id.0].contains(&from) {
                        return Err(PipelineError::InvalidCatalog(format!(
                            "{kind} reads from {} without depending on it",
                            drafts[from.0].spec.kind
                        )));
                    }
                    outputs[from.0].clone().ok_or_else(|| {
                        PipelineError::InvalidCatalog(format!(
                            "{kind} reads from {}, which has no output",
                            drafts[from.0].spec.kind
                        ))
                    })?
                }
            };

            outputs[id.0] = kind.output_path(params, &input_path, &self.layout);

            resolved[id.0] = Some(StageInstance {
                id,
                kind,
                job_name: kind.job_name(params),
                command: kind.command(params, &input_path, &self.layout),
                input_path,
                output_path: outputs[id.0].clone(),
                predecessors: predecessors[id.0].clone(),
                job_id: None,
            });
        }

        let dag = PipelineDag {
            run_id: Uuid::new_v4(),
            stages: resolved.into_iter().flatten().collect(),
            order,
        };

        debug!(
            run_id = %dag.run_id,
            stages = ?dag.kinds(),
            "Built pipeline DAG"
        );

        Ok(dag)
    }

    /// Rows that apply to this run, with the chain head each one sees.
    fn instantiate(&self, params: &PipelineParameters) -> Vec<Draft<'static>> {
        let mut drafts = Vec::with_capacity(self.catalog.len());
        let mut chain_head = None;

        for spec in self.catalog.iter().filter(|s| s.condition.applies(params)) {
            let id = StageId(drafts.len());
            drafts.push(Draft { spec, chain_head });
            if spec.extends_chain {
                chain_head = Some(id);
            }
        }

        drafts
    }
}

fn resolve(
    upstream: Upstream,
    draft: &Draft<'_>,
    by_kind: &HashMap<StageKind, StageId>,
) -> Result<StageId, PipelineError> {
    let kind = draft.spec.kind;
    match upstream {
        Upstream::Stage(target) => by_kind.get(&target).copied().ok_or_else(|| {
            PipelineError::InvalidCatalog(format!("{kind} references {target}, which is not part of this run"))
        }),
        Upstream::ChainHead => draft.chain_head.ok_or_else(|| {
            PipelineError::InvalidCatalog(format!("{kind} references the chain head before any chain stage"))
        }),
    }
}

fn wire(draft: &Draft<'_>, by_kind: &HashMap<StageKind, StageId>) -> Result<Vec<StageId>, PipelineError> {
    let mut resolved: Vec<StageId> = Vec::with_capacity(draft.spec.predecessors.len());
    for &upstream in draft.spec.predecessors {
        let id = resolve(upstream, draft, by_kind)?;
        if !resolved.contains(&id) {
            resolved.push(id);
        }
    }
    Ok(resolved)
}

/// Kahn's algorithm over the wired drafts.
///
/// Ties are broken by catalog position, so the catalog's own order comes
/// out whenever it is already valid.
fn topological_order(
    drafts: &[Draft<'_>],
    predecessors: &[Vec<StageId>],
) -> Result<Vec<StageId>, PipelineError> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<StageId>> = vec![Vec::new(); drafts.len()];
    for (i, preds) in predecessors.iter().enumerate() {
        for p in preds {
            dependents[p.0].push(StageId(i));
        }
    }

    let mut queue: VecDeque<StageId> = (0..drafts.len())
        .filter(|&i| in_degree[i] == 0)
        .map(StageId)
        .collect();

    let mut order = Vec::with_capacity(drafts.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &dep in &dependents[node.0] {
            in_degree[dep.0] -= 1;
            if in_degree[dep.0] == 0 {
                queue.push_back(dep);
            }
        }
    }

    if order.len() != drafts.len() {
        let in_cycle: Vec<&str> = (0..drafts.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| drafts[i].spec.kind.name())
            .collect();
        return Err(PipelineError::CycleDetected(in_cycle.join(", ")));
    }

    Ok(order)
}
