//! Graph evaluation: regions in topological order, levels in parallel.

use mdo_core::{CompId, RegionId, Timer};
use mdo_graph::{Graph, Region};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::context::{EvalCounters, RunContext};
use crate::cycle::{ConvergenceSolver, CycleReport};
use crate::error::{SolverError, SolverResult};
use crate::local;

/// Evaluation settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Run the regions of one level concurrently.
    pub parallel: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl EvaluateOptions {
    pub fn sequential() -> Self {
        Self { parallel: false }
    }
}

/// What happened during one full graph evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationReport {
    /// One report per coupled region, in topological order.
    pub cycles: Vec<CycleReport>,
    pub counters: EvalCounters,
    pub elapsed_s: f64,
}

impl EvaluationReport {
    /// Whether every coupled region converged.
    pub fn converged(&self) -> bool {
        self.cycles.iter().all(CycleReport::converged)
    }

    pub fn unconverged(&self) -> impl Iterator<Item = &CycleReport> {
        self.cycles.iter().filter(|c| !c.converged())
    }

    /// The first unconverged region as an error, if any.
    pub fn first_failure(&self) -> Option<SolverError> {
        self.unconverged().next().map(CycleReport::to_error)
    }
}

struct RegionOutcome {
    counters: EvalCounters,
    cycle: Option<CycleReport>,
}

fn run_region(graph: &Graph, region: &Region, values: &mut [f64]) -> SolverResult<RegionOutcome> {
    if region.is_coupled() {
        let (report, counters) = ConvergenceSolver::new(graph, region.id).solve(values)?;
        return Ok(RegionOutcome {
            counters,
            cycle: Some(report),
        });
    }

    let mut counters = EvalCounters::default();
    let (mut u, mut y) = (Vec::new(), Vec::new());
    for &comp in &region.members {
        let node = graph.node(comp);
        graph.gather_inputs(comp, values, &mut u);
        graph.gather_outputs(comp, values, &mut y);
        local::solve_component(graph, node, &u, &mut y, &region.config, &mut counters)?;
        graph.scatter_outputs(comp, &y, values);
        graph.scatter_inputs(comp, &u, values);
    }
    Ok(RegionOutcome {
        counters,
        cycle: None,
    })
}

/// Copy a component's inputs and outputs from `src` to `dst`.
fn copy_component(graph: &Graph, comp: CompId, src: &[f64], dst: &mut [f64]) {
    let reg = graph.registry();
    for &vid in reg.inputs_of(comp).iter().chain(reg.outputs_of(comp)) {
        let r = graph.var(vid).range();
        dst[r.clone()].copy_from_slice(&src[r]);
    }
}

/// Evaluate the whole graph from the context's current values.
///
/// Explicit regions run each component exactly once; coupled regions are
/// handed to their convergence solver. Unconverged regions do not fail the
/// evaluation; they are listed in the report. Component failures abort it.
pub fn evaluate(graph: &Graph, ctx: &mut RunContext, opts: &EvaluateOptions) -> SolverResult<EvaluationReport> {
    let timer = Timer::start();
    let mut report = EvaluationReport::default();
    report.counters.evaluations = 1;

    for level in graph.levels() {
        let outcomes: Vec<(RegionId, RegionOutcome)> = if opts.parallel && level.len() > 1 {
            let snapshot = ctx.values().as_slice();
            let results: Vec<SolverResult<(Vec<f64>, RegionOutcome)>> = level
                .par_iter()
                .map(|rid| {
                    let mut buf = snapshot.to_vec();
                    let outcome = run_region(graph, graph.region(*rid), &mut buf)?;
                    Ok((buf, outcome))
                })
                .collect();

            let mut merged = Vec::with_capacity(level.len());
            for (rid, result) in level.iter().zip(results) {
                let (buf, outcome) = result?;
                for &comp in &graph.region(*rid).members {
                    copy_component(graph, comp, &buf, ctx.values_mut().as_mut_slice());
                }
                merged.push((*rid, outcome));
            }
            merged
        } else {
            let mut seq = Vec::with_capacity(level.len());
            for rid in level {
                let outcome = run_region(
                    graph,
                    graph.region(*rid),
                    ctx.values_mut().as_mut_slice(),
                )?;
                seq.push((*rid, outcome));
            }
            seq
        };

        for (_, outcome) in outcomes {
            report.counters += outcome.counters;
            if let Some(cycle) = outcome.cycle {
                ctx.timings.cycles.record(cycle.elapsed_s);
                ctx.store_cycle(cycle.clone());
                report.cycles.push(cycle);
            }
        }
    }

    report.elapsed_s = timer.stop_into(&ctx.timings.evaluations);
    ctx.counters += report.counters;

    let unconverged = report.unconverged().count();
    if unconverged > 0 {
        warn!(unconverged, "evaluation finished with unconverged cycles");
    }
    debug!(
        components = report.counters.component_calls,
        cycles = report.cycles.len(),
        elapsed_s = report.elapsed_s,
        "graph evaluated"
    );
    Ok(report)
}

/// Like [`evaluate`], but an unconverged region is an error.
pub fn evaluate_strict(
    graph: &Graph,
    ctx: &mut RunContext,
    opts: &EvaluateOptions,
) -> SolverResult<EvaluationReport> {
    let report = evaluate(graph, ctx, opts)?;
    match report.first_failure() {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
