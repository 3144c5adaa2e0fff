//! Sequential quadratic programming with a damped BFGS Hessian and an ℓ1
//! merit line search.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::compass::{CompassSearch, PollOutcome};
use crate::optimizer::{DesignSpace, Evaluation, Optimizer, Termination, Verdict};
use crate::qp::{QpSolution, solve_qp};

/// SQP settings. Lengths are in scaled design space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SqpConfig {
    /// Optimal when the QP step's largest entry falls below this.
    pub tol: f64,
    /// Sufficient decrease factor of the Armijo test.
    pub armijo: f64,
    pub backtrack: f64,
    /// Smallest line search step before giving up.
    pub min_alpha: f64,
    /// Initial ℓ1 penalty weight; raised to stay above the multipliers.
    pub penalty: f64,
    pub max_qp_sweeps: usize,
    /// Initial compass step for entries without derivatives, relative to
    /// their bound width.
    pub compass_step: f64,
}

impl Default for SqpConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            armijo: 1e-4,
            backtrack: 0.5,
            min_alpha: 1e-10,
            penalty: 10.0,
            max_qp_sweeps: 5000,
            compass_step: 0.1,
        }
    }
}

#[derive(Clone, Debug)]
enum Phase {
    /// A new QP direction is needed at the current point.
    Direction,
    LineSearch {
        d: DVector<f64>,
        alpha: f64,
        slope: f64,
        merit0: f64,
    },
    /// Pattern search over entries without derivatives.
    Compass { merit0: f64 },
    Done { converged: bool, message: String },
}

/// Gradient-based SQP.
///
/// Entries flagged as frozen (no derivatives available) are held fixed in
/// the QP and explored by a compass search between SQP steps.
#[derive(Debug)]
pub struct Sqp {
    config: SqpConfig,
    space: Option<DesignSpace>,
    current: Option<Evaluation>,
    hessian: DMatrix<f64>,
    updates: usize,
    mu: f64,
    /// Largest penalty under which every pair of consecutive accepted
    /// iterates is still in merit order.
    mu_cap: f64,
    lambda_g: DVector<f64>,
    lambda_h: DVector<f64>,
    compass: Option<CompassSearch>,
    phase: Phase,
}

impl Sqp {
    pub fn new(config: SqpConfig) -> Self {
        Self {
            mu: config.penalty,
            mu_cap: f64::INFINITY,
            config,
            space: None,
            current: None,
            hessian: DMatrix::zeros(0, 0),
            updates: 0,
            lambda_g: DVector::zeros(0),
            lambda_h: DVector::zeros(0),
            compass: None,
            phase: Phase::Direction,
        }
    }

    pub fn penalty(&self) -> f64 {
        self.mu
    }

    fn done(&mut self, converged: bool, message: impl Into<String>) {
        self.phase = Phase::Done {
            converged,
            message: message.into(),
        };
    }

    /// QP step at the current point over the entries with derivatives.
    /// `None` when there is nothing left for SQP to do.
    fn direction(&mut self) -> Option<(DVector<f64>, QpSolution)> {
        let (space, cur) = (self.space.as_ref()?, self.current.as_ref()?);
        let grad = cur.grad_f.as_ref()?;
        let free: Vec<usize> = (0..space.dim()).filter(|&i| !cur.frozen[i]).collect();
        if free.is_empty() {
            return None;
        }
        let nf = free.len();

        let h = DMatrix::from_fn(nf, nf, |r, c| self.hessian[(free[r], free[c])]);
        let c = DVector::from_iterator(nf, free.iter().map(|&i| grad[i]));
        let restrict = |m: &Option<DMatrix<f64>>, rows: usize| {
            m.as_ref().map_or_else(
                || DMatrix::zeros(rows, nf),
                |m| DMatrix::from_fn(rows, nf, |r, k| m[(r, free[k])]),
            )
        };
        let a_eq = restrict(&cur.jac_h, cur.h.len());
        let a_g = restrict(&cur.jac_g, cur.g.len());

        // Linearized inequalities then finite bounds.
        let mut rows: Vec<(Vec<f64>, f64)> = Vec::new();
        for r in 0..a_g.nrows() {
            rows.push((a_g.row(r).iter().copied().collect(), -cur.g[r]));
        }
        for (k, &i) in free.iter().enumerate() {
            let mut e = vec![0.0; nf];
            if space.upper[i].is_finite() {
                e[k] = 1.0;
                rows.push((e.clone(), space.upper[i] - cur.x[i]));
            }
            if space.lower[i].is_finite() {
                e[k] = -1.0;
                rows.push((e, cur.x[i] - space.lower[i]));
            }
        }
        let a_in = DMatrix::from_fn(rows.len(), nf, |r, k| rows[r].0[k]);
        let b_in_full = DVector::from_iterator(rows.len(), rows.iter().map(|r| r.1));
        let n_g = a_g.nrows();

        // Relax the linearized constraints toward the current point when
        // they are inconsistent; bound rows stay exact.
        let mut solution = None;
        for theta in [1.0, 0.5, 0.25, 0.0] {
            let b_eq = -&cur.h * theta;
            let mut b_in = b_in_full.clone();
            for r in 0..n_g {
                if b_in[r] < 0.0 {
                    b_in[r] *= theta;
                }
            }
            let qp = solve_qp(&h, &c, &a_eq, &b_eq, &a_in, &b_in, self.config.max_qp_sweeps)
                .or_else(|| {
                    // Lost positive definiteness: restart from the identity.
                    let eye = DMatrix::identity(nf, nf);
                    solve_qp(&eye, &c, &a_eq, &b_eq, &a_in, &b_in, self.config.max_qp_sweeps)
                });
            match qp {
                Some(qp) if qp.converged => {
                    if theta < 1.0 {
                        debug!(theta, "SQP subproblem relaxed");
                    }
                    solution = Some(qp);
                    break;
                }
                Some(qp) if theta == 0.0 => solution = Some(qp),
                _ => {}
            }
        }
        let qp = solution?;

        let mut d = DVector::zeros(space.dim());
        for (k, &i) in free.iter().enumerate() {
            d[i] = qp.d[k];
        }
        Some((d, qp))
    }

    fn start_line_search(&mut self) -> Option<DVector<f64>> {
        let Some((d, qp)) = self.direction() else {
            return self.enter_compass_or_finish();
        };
        if d.amax() <= self.config.tol {
            return self.enter_compass_or_finish();
        }
        let cur = self.current.as_ref()?;

        self.lambda_g = qp.lambda_in.rows(0, cur.g.len()).into_owned();
        self.lambda_h = qp.lambda_eq.clone();
        let needed = 2.0 * qp.max_constraint_multiplier(cur.g.len());
        let raised = needed.min(self.mu_cap);
        if raised > self.mu {
            debug!(from = self.mu, to = raised, wanted = needed, "SQP penalty raised");
            self.mu = raised;
        }

        let grad = cur.grad_f.as_ref()?;
        let slope = (grad.dot(&d) - self.mu * cur.violation()).min(0.0);
        let merit0 = self.merit(cur);
        let candidate = &cur.x + &d;
        self.phase = Phase::LineSearch {
            d,
            alpha: 1.0,
            slope,
            merit0,
        };
        Some(candidate)
    }

    fn enter_compass_or_finish(&mut self) -> Option<DVector<f64>> {
        let pending = self.compass.as_ref().is_some_and(|c| !c.is_done());
        if pending {
            let merit0 = self.current.as_ref().map(|c| self.merit(c))?;
            self.phase = Phase::Compass { merit0 };
            return self.poll_compass();
        }
        self.done(true, "SQP step below tolerance");
        None
    }

    fn poll_compass(&mut self) -> Option<DVector<f64>> {
        let (space, cur, compass) = (
            self.space.as_ref()?,
            self.current.as_ref()?,
            self.compass.as_mut()?,
        );
        match compass.poll(&cur.x, space) {
            Some(trial) => Some(trial),
            None => {
                debug!(step = compass.step(), "compass search finished");
                self.done(true, "compass search step below tolerance");
                None
            }
        }
    }

    /// Damped BFGS update of the Lagrangian Hessian on the free entries.
    fn update_hessian(&mut self, prev: &Evaluation, next: &Evaluation) {
        let (Some(g0), Some(g1)) = (prev.grad_f.as_ref(), next.grad_f.as_ref()) else {
            return;
        };
        let grad_lagrangian = |e: &Evaluation, g: &DVector<f64>| {
            let mut gl = g.clone();
            if let Some(jg) = &e.jac_g {
                if self.lambda_g.len() == jg.nrows() {
                    gl += jg.transpose() * &self.lambda_g;
                }
            }
            if let Some(jh) = &e.jac_h {
                if self.lambda_h.len() == jh.nrows() {
                    gl += jh.transpose() * &self.lambda_h;
                }
            }
            gl
        };
        let mut s = &next.x - &prev.x;
        let mut y = grad_lagrangian(next, g1) - grad_lagrangian(prev, g0);
        for i in 0..s.len() {
            if prev.frozen[i] || next.frozen[i] {
                s[i] = 0.0;
                y[i] = 0.0;
            }
        }

        let sy = s.dot(&y);
        if self.updates == 0 && sy > 0.0 {
            let n = s.len();
            self.hessian = DMatrix::identity(n, n) * (y.dot(&y) / sy);
        }
        let hs = &self.hessian * &s;
        let shs = s.dot(&hs);
        if shs <= 1e-16 {
            return;
        }
        let theta = if sy >= 0.2 * shs {
            1.0
        } else {
            0.8 * shs / (shs - sy)
        };
        let r = &y * theta + &hs * (1.0 - theta);
        let sr = s.dot(&r);
        if sr <= 1e-16 {
            return;
        }
        self.hessian -= &hs * hs.transpose() / shs;
        self.hessian += &r * r.transpose() / sr;
        self.updates += 1;
    }

    /// Keep `prev` ahead of `next` in merit order for any later penalty.
    fn cap_penalty(&mut self, prev: &Evaluation, next: &Evaluation) {
        let rise = next.violation() - prev.violation();
        if rise > 0.0 {
            // Margin keeps rounding from flipping the pair at the cap itself.
            self.mu_cap = self.mu_cap.min((prev.f - next.f) / rise * (1.0 - 1e-9));
        }
    }

    fn line_search_failed(&mut self) {
        let merit0 = self.current.as_ref().map(|c| self.merit(c));
        match merit0 {
            Some(merit0) if self.compass.as_ref().is_some_and(|c| !c.is_done()) => {
                self.phase = Phase::Compass { merit0 };
            }
            _ => self.done(false, "line search could not reduce the merit function"),
        }
    }
}

impl Optimizer for Sqp {
    fn name(&self) -> &'static str {
        "sqp"
    }

    fn needs_gradients(&self) -> bool {
        true
    }

    fn start(&mut self, space: &DesignSpace, x0: &Evaluation) {
        let n = space.dim();
        self.hessian = DMatrix::identity(n, n);
        self.updates = 0;
        self.mu = self.config.penalty;
        self.mu_cap = f64::INFINITY;
        self.lambda_g = DVector::zeros(space.n_ineq);
        self.lambda_h = DVector::zeros(space.n_eq);
        let frozen: Vec<usize> = (0..n).filter(|&i| x0.frozen[i]).collect();
        self.compass = (!frozen.is_empty()).then(|| {
            CompassSearch::new(frozen, space, &x0.x, self.config.compass_step, self.config.tol)
        });
        self.space = Some(space.clone());
        self.current = Some(x0.clone());
        self.phase = Phase::Direction;
    }

    fn propose(&mut self) -> DVector<f64> {
        let next = match self.phase.clone() {
            Phase::Direction => self.start_line_search(),
            Phase::LineSearch { d, alpha, .. } => self.current.as_ref().map(|c| &c.x + d * alpha),
            Phase::Compass { .. } => self.poll_compass(),
            Phase::Done { .. } => None,
        };
        next.or_else(|| self.current.as_ref().map(|c| c.x.clone()))
            .unwrap_or_else(|| DVector::zeros(0))
    }

    fn accept(&mut self, result: Option<&Evaluation>) -> Verdict {
        match self.phase.clone() {
            Phase::LineSearch {
                d,
                alpha,
                slope,
                merit0,
            } => {
                if let Some(e) = result {
                    let m = self.merit(e);
                    if m.is_finite() && m <= merit0 + self.config.armijo * alpha * slope {
                        if let Some(prev) = self.current.take() {
                            self.cap_penalty(&prev, e);
                            self.update_hessian(&prev, e);
                        }
                        self.current = Some(e.clone());
                        self.phase = match &self.compass {
                            Some(c) if !c.is_done() => Phase::Compass { merit0: m },
                            _ => Phase::Direction,
                        };
                        return Verdict::Accept;
                    }
                }
                let alpha = alpha * self.config.backtrack;
                if alpha < self.config.min_alpha {
                    self.line_search_failed();
                } else {
                    self.phase = Phase::LineSearch {
                        d,
                        alpha,
                        slope,
                        merit0,
                    };
                }
                Verdict::Reject
            }
            Phase::Compass { merit0 } => {
                let improved = result.map(|e| (e, self.merit(e))).filter(|(_, m)| *m < merit0);
                let outcome = self
                    .compass
                    .as_mut()
                    .map_or(PollOutcome::Contracted, |c| c.report(improved.is_some()));
                let has_free = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.frozen.iter().any(|f| !f));
                if let Some((e, m)) = improved {
                    if let Some(prev) = self.current.take() {
                        self.cap_penalty(&prev, e);
                    }
                    self.current = Some(e.clone());
                    self.phase = if has_free {
                        Phase::Direction
                    } else {
                        Phase::Compass { merit0: m }
                    };
                    return Verdict::Accept;
                }
                if outcome == PollOutcome::Contracted && has_free {
                    self.phase = Phase::Direction;
                }
                Verdict::Reject
            }
            Phase::Direction | Phase::Done { .. } => Verdict::Reject,
        }
    }

    fn terminate(&self) -> Option<Termination> {
        match &self.phase {
            Phase::Done { converged, message } => Some(Termination {
                converged: *converged,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    fn merit(&self, eval: &Evaluation) -> f64 {
        eval.f + self.mu * eval.violation()
    }
}
