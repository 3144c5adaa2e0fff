//! Per-run mutable state.

use mdo_core::{RunTimings, VarId, VarInfo, Values};
use mdo_graph::Graph;

use crate::cycle::CycleReport;
use crate::error::{SolverError, SolverResult};

/// Evaluation counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalCounters {
    /// Full graph evaluations.
    pub evaluations: u64,
    /// Individual `compute` / `apply_residuals` calls.
    pub component_calls: u64,
    /// Convergence iterations across all coupled regions.
    pub cycle_iterations: u64,
    /// Local partial Jacobians computed.
    pub partials: u64,
}

impl std::ops::AddAssign for EvalCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.evaluations += rhs.evaluations;
        self.component_calls += rhs.component_calls;
        self.cycle_iterations += rhs.cycle_iterations;
        self.partials += rhs.partials;
    }
}

/// All mutable state of one run: current values, the last convergence report
/// of every coupled region, counters and timers.
///
/// The graph itself is immutable and shared; everything that changes while
/// evaluating lives here and is passed explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    values: Values,
    cycles: Vec<Option<CycleReport>>,
    pub counters: EvalCounters,
    pub timings: RunTimings,
}

impl RunContext {
    /// Fresh context with every variable at its declared default.
    pub fn new(graph: &Graph) -> Self {
        Self {
            values: graph.registry().initial_values(),
            cycles: vec![None; graph.regions().len()],
            counters: EvalCounters::default(),
            timings: RunTimings::default(),
        }
    }

    /// Copy of the values and cycle state with fresh counters and timers,
    /// for isolated perturbed evaluations.
    pub fn fork(&self) -> Self {
        Self {
            values: self.values.clone(),
            cycles: self.cycles.clone(),
            counters: EvalCounters::default(),
            timings: RunTimings::default(),
        }
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    /// Replace every value at once (restoring a previous iterate).
    pub fn restore(&mut self, values: &Values) -> SolverResult<()> {
        if values.len() != self.values.len() {
            return Err(SolverError::Setup {
                what: format!(
                    "cannot restore {} values into a context of {}",
                    values.len(),
                    self.values.len()
                ),
            });
        }
        self.values.clone_from(values);
        Ok(())
    }

    pub fn reset(&mut self, graph: &Graph) {
        *self = Self::new(graph);
    }

    pub fn get(&self, var: &VarInfo) -> &[f64] {
        self.values.get(var)
    }

    pub fn value(&self, graph: &Graph, id: VarId) -> &[f64] {
        self.values.get(graph.var(id))
    }

    /// Value of `comp.var`.
    pub fn get_path(&self, graph: &Graph, path: &str) -> SolverResult<&[f64]> {
        let id = graph.resolve(path)?;
        Ok(self.value(graph, id))
    }

    pub fn set(&mut self, graph: &Graph, id: VarId, value: &[f64]) -> SolverResult<()> {
        self.values.set(graph.var(id), value)?;
        Ok(())
    }

    /// Set `comp.var`. Connected inputs are overwritten on the next
    /// evaluation; set their source instead.
    pub fn set_path(&mut self, graph: &Graph, path: &str, value: &[f64]) -> SolverResult<()> {
        let id = graph.resolve(path)?;
        self.set(graph, id, value)
    }

    /// Last convergence report of a coupled region.
    pub fn cycle_report(&self, region: mdo_core::RegionId) -> Option<&CycleReport> {
        self.cycles.get(region.idx()).and_then(Option::as_ref)
    }

    pub fn cycle_reports(&self) -> impl Iterator<Item = &CycleReport> {
        self.cycles.iter().flatten()
    }

    pub(crate) fn store_cycle(&mut self, report: CycleReport) {
        let i = report.region.idx();
        self.cycles[i] = Some(report);
    }
}
