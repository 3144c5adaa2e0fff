//! Newton solver with backtracking line search and bound clipping.

use mdo_core::{Tolerances, max_abs};
use nalgebra::{DMatrix, DVector};

use crate::error::{SolverError, SolverResult};

/// Newton solver configuration.
#[derive(Clone, Copy, Debug)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Converged when `|r| <= abs` or `|r| <= rel * |r0|`
    pub tol: Tolerances,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tol: Tolerances::default(),
            line_search_beta: 0.5,
            max_line_search_iters: 10,
        }
    }
}

/// Newton iteration result.
#[derive(Debug, Clone)]
pub struct NewtonResult {
    /// Solution vector
    pub x: DVector<f64>,
    /// Final residual norm (infinity norm)
    pub residual_norm: f64,
    /// Number of iterations
    pub iterations: usize,
    /// Converged flag
    pub converged: bool,
}

/// Box bounds on the unknowns; `None` entries are unbounded.
#[derive(Debug, Clone, Default)]
pub struct Bounds {
    pub lower: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![None; n],
            upper: vec![None; n],
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.iter().chain(&self.upper).all(Option::is_none)
    }

    pub fn clip(&self, x: &mut DVector<f64>) {
        for (i, v) in x.iter_mut().enumerate() {
            if let Some(lo) = self.lower.get(i).copied().flatten() {
                *v = v.max(lo);
            }
            if let Some(hi) = self.upper.get(i).copied().flatten() {
                *v = v.min(hi);
            }
        }
    }
}

/// Residual norm used for convergence checks; NaN when any entry is NaN.
pub fn residual_norm(r: &DVector<f64>) -> f64 {
    let n = max_abs(r.as_slice());
    if r.iter().any(|v| v.is_infinite()) {
        f64::INFINITY
    } else {
        n
    }
}

/// Solve `J dx = -r`.
pub fn newton_direction(jac: &DMatrix<f64>, r: &DVector<f64>) -> SolverResult<DVector<f64>> {
    if jac.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::Numeric {
            what: "Jacobian contains non-finite entries".to_string(),
        });
    }
    jac.clone()
        .lu()
        .solve(&(-r))
        .ok_or_else(|| SolverError::Numeric {
            what: "Jacobian solve failed (singular matrix)".to_string(),
        })
}

/// Outcome of one backtracking line search.
#[derive(Debug, Clone)]
pub struct LineSearchStep {
    pub x: DVector<f64>,
    pub r: DVector<f64>,
    pub r_norm: f64,
    pub alpha: f64,
}

/// Backtrack along `dx` until the residual norm decreases. The last trial
/// is accepted when no step decreases it.
pub fn line_search<F>(
    x: &DVector<f64>,
    dx: &DVector<f64>,
    r_norm: f64,
    residual_fn: &F,
    beta: f64,
    max_iters: usize,
    bounds: Option<&Bounds>,
) -> SolverResult<LineSearchStep>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>>,
{
    let trial = |alpha: f64| -> SolverResult<LineSearchStep> {
        let mut x_new = x + alpha * dx;
        if let Some(b) = bounds {
            b.clip(&mut x_new);
        }
        let r = residual_fn(&x_new)?;
        let r_norm = residual_norm(&r);
        Ok(LineSearchStep {
            x: x_new,
            r,
            r_norm,
            alpha,
        })
    };

    let mut alpha = 1.0;
    let mut step = trial(alpha)?;
    for _ in 0..max_iters {
        if step.r_norm.is_finite() && step.r_norm < r_norm {
            break;
        }
        alpha *= beta;
        step = trial(alpha)?;
    }
    Ok(step)
}

/// Newton solver with line search and bound clipping.
///
/// Returns `converged == false` rather than an error when the iteration
/// budget runs out; callers decide whether that is fatal.
pub fn newton_solve<F, J>(
    x0: DVector<f64>,
    residual_fn: F,
    jacobian_fn: J,
    config: &NewtonConfig,
    bounds: Option<&Bounds>,
) -> SolverResult<NewtonResult>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>>,
    J: Fn(&DVector<f64>) -> SolverResult<DMatrix<f64>>,
{
    let mut x = x0;
    if let Some(b) = bounds {
        b.clip(&mut x);
    }
    let mut r = residual_fn(&x)?;
    let mut r_norm = residual_norm(&r);
    let r0_norm = r_norm;

    for iter in 0..config.max_iterations {
        if !r_norm.is_finite() {
            return Err(SolverError::Numeric {
                what: format!("non-finite residual at iteration {iter}"),
            });
        }
        if r_norm <= config.tol.abs || r_norm <= config.tol.rel * r0_norm {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter,
                converged: true,
            });
        }

        let jac = jacobian_fn(&x)?;
        let dx = newton_direction(&jac, &r)?;
        let step = line_search(
            &x,
            &dx,
            r_norm,
            &residual_fn,
            config.line_search_beta,
            config.max_line_search_iters,
            bounds,
        )?;
        x = step.x;
        r = step.r;
        r_norm = step.r_norm;
    }

    let converged = r_norm <= config.tol.abs || r_norm <= config.tol.rel * r0_norm;
    Ok(NewtonResult {
        x,
        residual_norm: r_norm,
        iterations: config.max_iterations,
        converged,
    })
}
