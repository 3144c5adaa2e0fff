//! Convergence solver for coupled regions.
//!
//! One solver instance drives one region through
//! `Initialized -> Iterating -> Converged | MaxIterExceeded | Diverged`.
//! Every iteration leaves an immutable [`CycleSnapshot`]; the last one is
//! always kept, all of them when the region's config asks for it.

use std::cell::{Cell, RefCell};

use mdo_core::{ConvergenceConfig, ConvergencePolicy, RegionId, Timer, max_abs};
use mdo_graph::{Graph, Region};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::context::EvalCounters;
use crate::error::{SolverError, SolverResult};
use crate::local;
use crate::newton::{Bounds, line_search, newton_direction, residual_norm};
use crate::partials::local_partials;

/// Aitken relaxation factor limits.
const AITKEN_MIN: f64 = 0.1;
const AITKEN_MAX: f64 = 1.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Initialized,
    Iterating,
    Converged,
    MaxIterExceeded,
    Diverged,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleState::Converged | CycleState::MaxIterExceeded | CycleState::Diverged
        )
    }

    pub fn is_converged(&self) -> bool {
        *self == CycleState::Converged
    }
}

/// Region outputs after one iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleSnapshot {
    pub iteration: usize,
    pub residual: f64,
    pub values: Vec<f64>,
}

/// Outcome of resolving one coupled region.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub region: RegionId,
    pub members: Vec<String>,
    pub policy: &'static str,
    pub state: CycleState,
    pub iterations: usize,
    pub residual: f64,
    pub initial_residual: f64,
    pub elapsed_s: f64,
    /// Every iteration when recording, otherwise only the last one.
    pub snapshots: Vec<CycleSnapshot>,
}

impl CycleReport {
    pub fn converged(&self) -> bool {
        self.state.is_converged()
    }

    pub fn last_snapshot(&self) -> Option<&CycleSnapshot> {
        self.snapshots.last()
    }

    pub fn to_error(&self) -> SolverError {
        SolverError::CycleResolutionFailure {
            members: self.members.join(", "),
            state: self.state,
            iterations: self.iterations,
            residual: self.residual,
        }
    }
}

/// Iterative solver for one coupled region.
pub struct ConvergenceSolver<'g> {
    graph: &'g Graph,
    region: &'g Region,
    config: ConvergenceConfig,
    /// Flat value ranges of every region output, in member order.
    unknowns: Vec<std::ops::Range<usize>>,
    /// Per registry variable: offset among the unknowns.
    unknown_offset: Vec<Option<usize>>,
    size: usize,
    bounds: Bounds,
    state: CycleState,
    iteration: usize,
    residual: f64,
    initial_residual: f64,
    snapshots: Vec<CycleSnapshot>,
    counters: EvalCounters,
    // Aitken memory
    prev_delta: Option<Vec<f64>>,
    theta: f64,
}

impl<'g> ConvergenceSolver<'g> {
    pub fn new(graph: &'g Graph, region: RegionId) -> Self {
        let region = graph.region(region);
        let mut unknowns = Vec::new();
        let mut unknown_offset = vec![None; graph.registry().vars().len()];
        let mut bounds = Bounds::default();
        let mut size = 0;
        for &comp in &region.members {
            for &vid in graph.registry().outputs_of(comp) {
                let var = graph.var(vid);
                unknown_offset[vid.idx()] = Some(size);
                size += var.size();
                unknowns.push(var.range());
            }
            let b = local::output_bounds(graph, comp);
            bounds.lower.extend(b.lower);
            bounds.upper.extend(b.upper);
        }
        Self {
            graph,
            region,
            config: region.config,
            unknowns,
            unknown_offset,
            size,
            bounds,
            state: CycleState::Initialized,
            iteration: 0,
            residual: f64::NAN,
            initial_residual: f64::NAN,
            snapshots: Vec::new(),
            counters: EvalCounters::default(),
            prev_delta: None,
            theta: 1.0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn snapshots(&self) -> &[CycleSnapshot] {
        &self.snapshots
    }

    /// Iterate until a terminal state. Component failures are errors;
    /// running out of iterations or diverging is reported in the returned
    /// [`CycleReport`].
    pub fn solve(mut self, values: &mut [f64]) -> SolverResult<(CycleReport, EvalCounters)> {
        let timer = Timer::start();
        while !self.state.is_terminal() {
            self.step(values)?;
        }
        self.sync_inputs(values);

        let members: Vec<String> = self
            .region
            .members
            .iter()
            .map(|c| self.graph.node(*c).name.clone())
            .collect();
        match self.state {
            CycleState::Converged => debug!(
                members = ?members,
                iterations = self.iteration,
                residual = self.residual,
                "cycle converged"
            ),
            state => warn!(
                members = ?members,
                state = ?state,
                iterations = self.iteration,
                residual = self.residual,
                "cycle not converged"
            ),
        }

        self.counters.cycle_iterations += self.iteration as u64;
        let report = CycleReport {
            region: self.region.id,
            members,
            policy: self.config.policy.name(),
            state: self.state,
            iterations: self.iteration,
            residual: self.residual,
            initial_residual: self.initial_residual,
            elapsed_s: timer.elapsed(),
            snapshots: self.snapshots,
        };
        Ok((report, self.counters))
    }

    /// Advance by one iteration (or initialise).
    pub fn step(&mut self, values: &mut [f64]) -> SolverResult<CycleState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        match self.config.policy {
            ConvergencePolicy::GaussSeidel { aitken } => self.gauss_seidel_step(values, aitken)?,
            ConvergencePolicy::Newton { max_line_search } => {
                self.newton_step(values, max_line_search)?
            }
        }
        Ok(self.state)
    }

    fn unknown_values(&self, values: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.size);
        for r in &self.unknowns {
            out.extend_from_slice(&values[r.clone()]);
        }
        out
    }

    fn write_unknowns(&self, x: &[f64], values: &mut [f64]) {
        let mut off = 0;
        for r in &self.unknowns {
            let n = r.len();
            values[r.clone()].copy_from_slice(&x[off..off + n]);
            off += n;
        }
    }

    fn sync_inputs(&self, values: &mut [f64]) {
        let mut u = Vec::new();
        for &comp in &self.region.members {
            self.graph.gather_inputs(comp, values, &mut u);
            self.graph.scatter_inputs(comp, &u, values);
        }
    }

    fn record(&mut self, values: Vec<f64>) {
        let snap = CycleSnapshot {
            iteration: self.iteration,
            residual: self.residual,
            values,
        };
        if !self.config.record_snapshots {
            self.snapshots.clear();
        }
        self.snapshots.push(snap);
    }

    /// Terminal-state checks shared by both policies, given that the
    /// convergence test itself already failed.
    fn check_progress(&mut self) {
        if !self.residual.is_finite() {
            self.state = CycleState::Diverged;
        } else if self.initial_residual > 0.0
            && self.residual > self.config.divergence_limit * self.initial_residual
        {
            self.state = CycleState::Diverged;
        } else if self.iteration >= self.config.max_iterations {
            self.state = CycleState::MaxIterExceeded;
        } else {
            self.state = CycleState::Iterating;
        }
    }

    fn gauss_seidel_step(&mut self, values: &mut [f64], aitken: bool) -> SolverResult<()> {
        let before = self.unknown_values(values);

        let (mut u, mut y) = (Vec::new(), Vec::new());
        // Largest residual left by an implicit member whose local solve failed.
        let mut unsolved: Option<f64> = None;
        for &comp in &self.region.members {
            let node = self.graph.node(comp);
            self.graph.gather_inputs(comp, values, &mut u);
            self.graph.gather_outputs(comp, values, &mut y);
            let outcome =
                local::solve_component(self.graph, node, &u, &mut y, &self.config, &mut self.counters)?;
            if !outcome.converged {
                unsolved = Some(unsolved.map_or(outcome.residual, |r| r.max(outcome.residual)));
            }
            self.graph.scatter_outputs(comp, &y, values);
            self.graph.scatter_inputs(comp, &u, values);
        }

        let mut after = self.unknown_values(values);
        let delta: Vec<f64> = after.iter().zip(&before).map(|(a, b)| a - b).collect();
        if aitken {
            if let Some(prev) = &self.prev_delta {
                let diff: Vec<f64> = delta.iter().zip(prev).map(|(d, p)| d - p).collect();
                let norm2: f64 = diff.iter().map(|d| d * d).sum();
                if norm2 > 0.0 {
                    let dot: f64 = diff.iter().zip(&delta).map(|(a, b)| a * b).sum();
                    self.theta = (self.theta * (1.0 - dot / norm2)).clamp(AITKEN_MIN, AITKEN_MAX);
                }
            }
            for ((a, b), d) in after.iter_mut().zip(&before).zip(&delta) {
                *a = b + self.theta * d;
            }
            self.write_unknowns(&after, values);
            self.prev_delta = Some(delta.clone());
        }

        self.iteration += 1;
        self.residual = match unsolved {
            Some(r) => max_abs(&delta).max(r),
            None => max_abs(&delta),
        };
        if self.iteration == 1 {
            self.initial_residual = self.residual;
        }
        let scale = max_abs(&after);
        let converged = unsolved.is_none() && self.residual <= self.config.tol.threshold(scale);
        self.record(after);

        if converged {
            self.state = CycleState::Converged;
        } else {
            self.check_progress();
        }
        Ok(())
    }

    /// Region residual with the unknowns set to `x`, evaluated on `scratch`.
    fn newton_residual(&self, x: &[f64], scratch: &mut [f64], calls: &Cell<u64>) -> SolverResult<DVector<f64>> {
        self.write_unknowns(x, scratch);
        let mut r = Vec::with_capacity(self.size);
        let (mut u, mut y) = (Vec::new(), Vec::new());
        for &comp in &self.region.members {
            let node = self.graph.node(comp);
            self.graph.gather_inputs(comp, scratch, &mut u);
            self.graph.gather_outputs(comp, scratch, &mut y);
            calls.set(calls.get() + 1);
            r.extend(local::residuals(node, &u, &y)?);
        }
        Ok(DVector::from_vec(r))
    }

    /// Region Jacobian `dF/dy` assembled from local partials. Connected
    /// inputs fed by region outputs contribute `dR/du * scale` to the
    /// source's columns.
    fn newton_jacobian(&self, values: &[f64]) -> SolverResult<DMatrix<f64>> {
        let mut jac = DMatrix::zeros(self.size, self.size);
        let (mut u, mut y) = (Vec::new(), Vec::new());
        for &comp in &self.region.members {
            let node = self.graph.node(comp);
            self.graph.gather_inputs(comp, values, &mut u);
            self.graph.gather_outputs(comp, values, &mut y);
            let local = local_partials(node, &u, &y, true)?;

            let outputs = self.graph.registry().outputs_of(comp);
            let row0 = outputs
                .first()
                .and_then(|v| self.unknown_offset[v.idx()])
                .unwrap_or(0);
            let ny = y.len();
            jac.view_mut((row0, row0), (ny, ny)).copy_from(&local.dr_dy);

            let mut col = 0;
            for &vid in self.graph.registry().inputs_of(comp) {
                let n = self.graph.var(vid).size();
                if let Some(conn) = self.graph.source_of(vid) {
                    if let Some(src_off) = self.unknown_offset[conn.src.idx()] {
                        let block = local.dr_du.columns(col, n) * conn.conv.scale;
                        let mut target = jac.view_mut((row0, src_off), (ny, n));
                        target += block;
                    }
                }
                col += n;
            }
        }
        Ok(jac)
    }

    fn newton_step(&mut self, values: &mut [f64], max_line_search: usize) -> SolverResult<()> {
        let x = DVector::from_vec(self.unknown_values(values));
        let calls = Cell::new(0u64);

        if self.state == CycleState::Initialized {
            let r = self.newton_residual(x.as_slice(), values, &calls)?;
            self.counters.component_calls += calls.get();
            self.residual = residual_norm(&r);
            self.initial_residual = self.residual;
            if self.residual <= self.config.tol.abs {
                self.state = CycleState::Converged;
                self.record(x.as_slice().to_vec());
            } else if !self.residual.is_finite() {
                self.state = CycleState::Diverged;
                self.record(x.as_slice().to_vec());
            } else {
                self.state = CycleState::Iterating;
            }
            return Ok(());
        }

        let r = self.newton_residual(x.as_slice(), values, &calls)?;
        let r_norm = residual_norm(&r);
        let jac = self.newton_jacobian(values)?;
        self.counters.partials += self.region.members.len() as u64;
        let dx = match newton_direction(&jac, &r) {
            Ok(dx) => dx,
            Err(e) => {
                warn!(error = %e, "Newton direction unavailable");
                self.counters.component_calls += calls.get();
                self.iteration += 1;
                self.state = CycleState::Diverged;
                self.record(x.as_slice().to_vec());
                return Ok(());
            }
        };

        let bounds = (!self.bounds.is_unbounded()).then_some(&self.bounds);
        let scratch = RefCell::new(values.to_vec());
        let residual_fn = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            self.newton_residual(x.as_slice(), &mut scratch.borrow_mut(), &calls)
        };
        let step = line_search(&x, &dx, r_norm, &residual_fn, 0.5, max_line_search, bounds)?;

        self.counters.component_calls += calls.get();
        self.write_unknowns(step.x.as_slice(), values);
        self.iteration += 1;
        self.residual = step.r_norm;
        self.record(step.x.as_slice().to_vec());

        let tol = self.config.tol;
        if self.residual <= tol.abs || self.residual <= tol.rel * self.initial_residual {
            self.state = CycleState::Converged;
        } else {
            self.check_progress();
        }
        Ok(())
    }
}
