//! The optimization loop.

use std::fmt;
use std::time::{Duration, Instant};

use mdo_core::{VarId, Values};
use mdo_derivs::{DerivError, TotalJacobian, derivatives};
use mdo_solver::{RunContext, SolverError, evaluate};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::iterate::{History, Iterate, IterateFlags};
use crate::optimizer::{DesignSpace, Evaluation, Optimizer, Verdict};
use crate::problem::OptProblem;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Tolerances or optimality conditions met at a feasible point.
    Converged,
    MaxIterations,
    MaxEvaluations,
    TimedOut,
    /// The best iterate violates the constraints beyond `ctol`.
    Infeasible,
    /// Repeated evaluation failures, a failing starting point, or no
    /// improving step; the last good iterate is kept.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Converged => "converged",
            RunStatus::MaxIterations => "max_iterations",
            RunStatus::MaxEvaluations => "max_evaluations",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Infeasible => "infeasible",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            RunStatus::Converged,
            RunStatus::MaxIterations,
            RunStatus::MaxEvaluations,
            RunStatus::TimedOut,
            RunStatus::Infeasible,
            RunStatus::Failed,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
    }

    pub fn is_converged(&self) -> bool {
        *self == RunStatus::Converged
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notifications of a running optimization.
#[derive(Clone, Debug, PartialEq)]
pub enum DriverProgressEvent {
    Started {
        algorithm: &'static str,
        design_entries: usize,
    },
    Accepted {
        iteration: usize,
        evaluations: u64,
        objective: f64,
        max_violation: f64,
        merit: f64,
    },
    Rejected {
        evaluations: u64,
        reason: String,
    },
    Finished {
        status: RunStatus,
        iterations: usize,
        evaluations: u64,
    },
}

#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub status: RunStatus,
    /// Lowest-merit accepted iterate; `None` only when the starting point
    /// itself could not be evaluated.
    pub best: Option<Iterate>,
    pub history: History,
    pub evaluations: u64,
    /// Accepted iterates after the starting point.
    pub iterations: usize,
    pub elapsed: Duration,
    pub message: String,
}

/// Minimize `problem` starting from the declared defaults.
pub fn optimize(problem: &OptProblem<'_>, config: &DriverConfig) -> DriverResult<OptimizationResult> {
    optimize_with_progress(problem, config, |_| {})
}

pub fn optimize_with_progress(
    problem: &OptProblem<'_>,
    config: &DriverConfig,
    mut progress: impl FnMut(&DriverProgressEvent),
) -> DriverResult<OptimizationResult> {
    let mut ctx = RunContext::new(problem.graph());
    optimize_in(problem, config, &mut ctx, &mut progress)
}

/// Minimize `problem` starting from the values held by `ctx`. On return
/// `ctx` holds the values of the best iterate.
pub fn optimize_in(
    problem: &OptProblem<'_>,
    config: &DriverConfig,
    ctx: &mut RunContext,
    progress: &mut dyn FnMut(&DriverProgressEvent),
) -> DriverResult<OptimizationResult> {
    problem.validate()?;
    config.validate()?;

    let (lower, upper) = problem.scaled_bounds();
    let (n_ineq, n_eq) = problem.constraint_counts();
    let space = DesignSpace {
        lower,
        upper,
        n_ineq,
        n_eq,
    };
    let optimizer = config.algorithm.build(&space)?;
    Driver {
        problem,
        config,
        space,
        optimizer,
        history: History::default(),
        accepted: Vec::new(),
        evaluations: 0,
        blocked: Vec::new(),
        started: Instant::now(),
    }
    .run(ctx, progress)
}

/// A candidate that evaluated cleanly enough to be judged.
struct Candidate {
    eval: Evaluation,
    design: Vec<f64>,
    objective: f64,
    constraints: Vec<f64>,
    flags: IterateFlags,
}

struct Driver<'a, 'g> {
    problem: &'a OptProblem<'g>,
    config: &'a DriverConfig,
    space: DesignSpace,
    optimizer: Box<dyn Optimizer>,
    history: History,
    /// Objective and constraint terms of each history entry, for re-scoring
    /// merits when the algorithm's merit function changes.
    accepted: Vec<Evaluation>,
    evaluations: u64,
    /// Design variables known to have no derivatives.
    blocked: Vec<VarId>,
    started: Instant,
}

impl Driver<'_, '_> {
    fn run(
        mut self,
        ctx: &mut RunContext,
        progress: &mut dyn FnMut(&DriverProgressEvent),
    ) -> DriverResult<OptimizationResult> {
        info!(
            problem = self.problem.name.as_str(),
            algorithm = self.optimizer.name(),
            design_entries = self.space.dim(),
            "optimization started"
        );
        progress(&DriverProgressEvent::Started {
            algorithm: self.optimizer.name(),
            design_entries: self.space.dim(),
        });

        let x0 = self.space.project(&self.problem.scaled_start(ctx.values()));
        let start = match self.evaluate_candidate(ctx, &x0)? {
            Ok(c) => c,
            Err(reason) => {
                warn!(reason = reason.as_str(), "starting point failed");
                return Ok(self.finish(
                    ctx,
                    RunStatus::Failed,
                    format!("starting point could not be evaluated: {reason}"),
                    progress,
                ));
            }
        };
        self.optimizer.start(&self.space, &start.eval);
        self.record(ctx, start, progress);
        let mut last_good: Values = ctx.values().clone();
        let mut failures = 0usize;

        let (status, message) = loop {
            if let Some(limit) = self.config.timeout {
                if self.started.elapsed() >= limit {
                    break (RunStatus::TimedOut, format!("timeout of {limit:?} reached"));
                }
            }
            if let Some(t) = self.optimizer.terminate() {
                break termination_status(t);
            }
            if self.history.len() > self.config.max_iterations {
                break (
                    RunStatus::MaxIterations,
                    format!("{} iterations", self.config.max_iterations),
                );
            }
            if self.evaluations >= self.config.max_evaluations as u64 {
                break (
                    RunStatus::MaxEvaluations,
                    format!("{} evaluations", self.config.max_evaluations),
                );
            }

            let x = self.space.project(&self.optimizer.propose());
            if let Some(t) = self.optimizer.terminate() {
                break termination_status(t);
            }

            let candidate = match self.evaluate_candidate(ctx, &x)? {
                Ok(c) => c,
                Err(reason) => {
                    failures += 1;
                    debug!(reason = reason.as_str(), failures, "candidate failed");
                    ctx.restore(&last_good)?;
                    self.optimizer.accept(None);
                    progress(&DriverProgressEvent::Rejected {
                        evaluations: self.evaluations,
                        reason: reason.clone(),
                    });
                    if failures >= self.config.max_failures {
                        break (
                            RunStatus::Failed,
                            format!("{failures} consecutive failed evaluations, last: {reason}"),
                        );
                    }
                    continue;
                }
            };
            failures = 0;

            match self.optimizer.accept(Some(&candidate.eval)) {
                Verdict::Accept => {
                    let previous = self.history.last().map(|p| (p.objective, p.design.clone()));
                    let feasible = candidate.eval.max_violation() <= self.config.ctol;
                    let step = self.space_step(previous.as_ref().map(|p| p.1.as_slice()), &candidate.design);
                    let df = previous.as_ref().map(|p| (candidate.objective - p.0).abs());
                    let f_scale = candidate.objective.abs().max(1.0);
                    self.record(ctx, candidate, progress);
                    last_good.clone_from(ctx.values());

                    if self.optimizer.uses_step_tolerances() && feasible {
                        if df.is_some_and(|df| df <= self.config.ftol * f_scale) {
                            break (RunStatus::Converged, "objective change below ftol".to_string());
                        }
                        if step.is_some_and(|s| s <= self.config.xtol) {
                            break (RunStatus::Converged, "design change below xtol".to_string());
                        }
                    }
                }
                Verdict::Reject => {
                    ctx.restore(&last_good)?;
                    progress(&DriverProgressEvent::Rejected {
                        evaluations: self.evaluations,
                        reason: "not accepted by the optimizer".to_string(),
                    });
                }
            }
        };

        Ok(self.finish(ctx, status, message, progress))
    }

    /// Relative infinity-norm change of the scaled design.
    fn space_step(&self, previous: Option<&[f64]>, design: &[f64]) -> Option<f64> {
        let previous = previous?;
        let scale = |flat: &[f64]| -> DVector<f64> {
            let mut out = Vec::with_capacity(flat.len());
            let mut k = 0;
            for dv in self.problem.design_vars() {
                for _ in 0..dv.size() {
                    out.push((flat[k] + dv.adder) * dv.scaler);
                    k += 1;
                }
            }
            DVector::from_vec(out)
        };
        let (a, b) = (scale(previous), scale(design));
        Some((&b - &a).amax() / b.amax().max(1.0))
    }

    fn record(
        &mut self,
        ctx: &RunContext,
        candidate: Candidate,
        progress: &mut dyn FnMut(&DriverProgressEvent),
    ) {
        self.rebase_merits();
        let merit = self.optimizer.merit(&candidate.eval);
        self.accepted.push(merit_terms(&candidate.eval));
        let iterate = Iterate {
            index: self.history.len(),
            evaluation: self.evaluations,
            elapsed_s: self.started.elapsed().as_secs_f64(),
            design: candidate.design,
            objective: candidate.objective,
            constraints: candidate.constraints,
            max_violation: candidate.eval.max_violation(),
            merit,
            values: ctx.values().clone(),
            gradient: candidate.eval.grad_f.clone(),
            constraint_jacobian: stack_jacobian(&candidate.eval),
            flags: candidate.flags,
        };
        debug!(
            iteration = iterate.index,
            objective = iterate.objective,
            max_violation = iterate.max_violation,
            merit,
            "iterate accepted"
        );
        progress(&DriverProgressEvent::Accepted {
            iteration: iterate.index,
            evaluations: self.evaluations,
            objective: iterate.objective,
            max_violation: iterate.max_violation,
            merit,
        });
        self.history.push(iterate);
    }

    /// Re-score the history when the merit of the last accepted iterate no
    /// longer matches its record, as after an SQP penalty increase.
    fn rebase_merits(&mut self) {
        let stale = match (self.history.last(), self.accepted.last()) {
            (Some(last), Some(eval)) => self.optimizer.merit(eval) != last.merit,
            _ => false,
        };
        if stale {
            let merits: Vec<f64> = self.accepted.iter().map(|e| self.optimizer.merit(e)).collect();
            debug!(iterates = merits.len(), "history merits re-scored");
            self.history.rebase_merits(&merits);
        }
    }

    fn finish(
        mut self,
        ctx: &mut RunContext,
        mut status: RunStatus,
        mut message: String,
        progress: &mut dyn FnMut(&DriverProgressEvent),
    ) -> OptimizationResult {
        self.rebase_merits();
        let best = self.history.best().cloned();
        if let Some(b) = &best {
            if status != RunStatus::Failed && !b.is_feasible(self.config.ctol) {
                message = format!(
                    "{message}; best iterate violates constraints by {:.3e}",
                    b.max_violation
                );
                status = RunStatus::Infeasible;
            }
            // Values of the same graph, so lengths always match.
            if ctx.restore(&b.values).is_err() {
                warn!("could not restore the best iterate's values");
            }
        }
        let iterations = self.history.len().saturating_sub(1);
        let elapsed = self.started.elapsed();

        if status.is_converged() {
            info!(
                status = status.as_str(),
                iterations,
                evaluations = self.evaluations,
                objective = best.as_ref().map(|b| b.objective),
                "optimization finished"
            );
        } else {
            warn!(
                status = status.as_str(),
                iterations,
                evaluations = self.evaluations,
                message = message.as_str(),
                "optimization finished without converging"
            );
        }
        progress(&DriverProgressEvent::Finished {
            status,
            iterations,
            evaluations: self.evaluations,
        });

        OptimizationResult {
            status,
            best,
            history: self.history,
            evaluations: self.evaluations,
            iterations,
            elapsed,
            message,
        }
    }

    /// Evaluate the scaled design `x`. The outer error aborts the run; the
    /// inner one rejects the candidate.
    fn evaluate_candidate(
        &mut self,
        ctx: &mut RunContext,
        x: &DVector<f64>,
    ) -> DriverResult<Result<Candidate, String>> {
        let graph = self.problem.graph();
        self.problem.apply(x, ctx.values_mut());
        self.evaluations += 1;

        let report = match evaluate(graph, ctx, &self.config.eval) {
            Ok(r) => r,
            Err(e @ SolverError::Setup { .. }) => return Err(e.into()),
            Err(e) => return Ok(Err(e.to_string())),
        };
        let unconverged: Vec<String> = report
            .unconverged()
            .map(|c| format!("[{}] {:?}", c.members.join(", "), c.state))
            .collect();
        if !unconverged.is_empty() && !self.config.accept_unconverged {
            return Ok(Err(format!("coupled region did not converge: {}", unconverged.join("; "))));
        }

        let totals = if self.optimizer.needs_gradients() {
            match self.totals(ctx)? {
                Ok(t) => Some(t),
                Err(reason) => return Ok(Err(reason)),
            }
        } else {
            None
        };
        let jac = totals
            .as_ref()
            .and_then(|(j, wrt)| j.as_ref().map(|j| (j, wrt.as_slice())));
        let r = self.problem.responses(ctx.values(), jac)?;
        if !r.f.is_finite() {
            return Ok(Err(format!("objective is not finite ({})", r.f)));
        }

        let n = self.space.dim();
        let (grad_f, jac_g, jac_h) = if totals.is_some() {
            (
                Some(r.grad_f.unwrap_or_else(|| DVector::zeros(n))),
                Some(r.jac_g.unwrap_or_else(|| DMatrix::zeros(r.g.len(), n))),
                Some(r.jac_h.unwrap_or_else(|| DMatrix::zeros(r.h.len(), n))),
            )
        } else {
            (None, None, None)
        };

        let mut frozen = Vec::with_capacity(n);
        let mut frozen_paths = Vec::new();
        for dv in self.problem.design_vars() {
            let blocked = self.blocked.contains(&dv.id);
            frozen.extend(std::iter::repeat_n(blocked, dv.size()));
            if blocked {
                frozen_paths.push(dv.path.clone());
            }
        }

        Ok(Ok(Candidate {
            eval: Evaluation {
                x: x.clone(),
                f: r.f,
                g: r.g,
                h: r.h,
                grad_f,
                jac_g,
                jac_h,
                frozen,
            },
            design: self.problem.unscale(x),
            objective: r.raw_objective,
            constraints: r.raw_constraints,
            flags: IterateFlags {
                unconverged,
                frozen: frozen_paths,
            },
        }))
    }

    /// Totals of the responses with respect to every design variable that
    /// has derivatives. Design variables reported unavailable are remembered
    /// and left out from then on.
    #[allow(clippy::type_complexity)]
    fn totals(
        &mut self,
        ctx: &mut RunContext,
    ) -> DriverResult<Result<(Option<TotalJacobian>, Vec<VarId>), String>> {
        let graph = self.problem.graph();
        let of = self.problem.response_ids();
        loop {
            let wrt: Vec<VarId> = self
                .problem
                .design_ids()
                .into_iter()
                .filter(|id| !self.blocked.contains(id))
                .collect();
            if wrt.is_empty() {
                return Ok(Ok((None, wrt)));
            }
            match derivatives(graph, ctx, &wrt, &of, &self.config.deriv) {
                Ok(j) => return Ok(Ok((Some(j), wrt))),
                Err(DerivError::Unavailable { components, wrt: paths }) => {
                    let before = self.blocked.len();
                    for p in &paths {
                        if let Ok(id) = graph.resolve(p) {
                            if !self.blocked.contains(&id) {
                                self.blocked.push(id);
                            }
                        }
                    }
                    if self.blocked.len() == before {
                        return Err(DriverError::Deriv(DerivError::Unavailable {
                            components,
                            wrt: paths,
                        }));
                    }
                    warn!(
                        design_vars = ?paths,
                        through = ?components,
                        "no derivatives; switching these design variables to compass search"
                    );
                }
                Err(e @ DerivError::InvalidRequest { .. }) => return Err(e.into()),
                Err(e) => return Ok(Err(e.to_string())),
            }
        }
    }
}

fn termination_status(t: crate::optimizer::Termination) -> (RunStatus, String) {
    if t.converged {
        (RunStatus::Converged, t.message)
    } else {
        (RunStatus::Failed, t.message)
    }
}

/// `e` without its derivatives.
fn merit_terms(e: &Evaluation) -> Evaluation {
    Evaluation {
        x: e.x.clone(),
        f: e.f,
        g: e.g.clone(),
        h: e.h.clone(),
        grad_f: None,
        jac_g: None,
        jac_h: None,
        frozen: e.frozen.clone(),
    }
}

fn stack_jacobian(e: &Evaluation) -> Option<DMatrix<f64>> {
    let (jg, jh) = (e.jac_g.as_ref()?, e.jac_h.as_ref()?);
    let n = e.x.len();
    let mut out = DMatrix::zeros(jg.nrows() + jh.nrows(), n);
    out.rows_mut(0, jg.nrows()).copy_from(jg);
    out.rows_mut(jg.nrows(), jh.nrows()).copy_from(jh);
    Some(out)
}
