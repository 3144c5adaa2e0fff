//! Convergence settings attached to coupled regions of the graph.

use crate::numeric::Tolerances;

/// Iteration scheme used to resolve a coupled region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConvergencePolicy {
    /// Fixed-point sweeps in declaration order; `aitken` enables dynamic
    /// relaxation of the update.
    GaussSeidel { aitken: bool },
    /// Newton iterations on the region residual with a backtracking line search.
    Newton { max_line_search: usize },
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        ConvergencePolicy::GaussSeidel { aitken: false }
    }
}

impl ConvergencePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ConvergencePolicy::GaussSeidel { .. } => "gauss_seidel",
            ConvergencePolicy::Newton { .. } => "newton",
        }
    }
}

/// Configuration of the convergence solver of one coupled region.
///
/// Defaults: Gauss-Seidel without relaxation, `abs = 1e-10`, `rel = 1e-6`,
/// 100 iterations, divergence declared when the residual grows beyond
/// `1e8` times its initial value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergenceConfig {
    pub policy: ConvergencePolicy,
    pub tol: Tolerances,
    pub max_iterations: usize,
    pub divergence_limit: f64,
    /// Keep every iteration snapshot instead of only the last one.
    pub record_snapshots: bool,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            policy: ConvergencePolicy::default(),
            tol: Tolerances::default(),
            max_iterations: 100,
            divergence_limit: 1e8,
            record_snapshots: false,
        }
    }
}

impl ConvergenceConfig {
    pub fn gauss_seidel() -> Self {
        Self::default()
    }

    pub fn newton() -> Self {
        Self {
            policy: ConvergencePolicy::Newton { max_line_search: 10 },
            max_iterations: 50,
            ..Self::default()
        }
    }

    pub fn with_tol(mut self, abs: f64, rel: f64) -> Self {
        self.tol = Tolerances::new(abs, rel);
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_aitken(mut self) -> Self {
        self.policy = ConvergencePolicy::GaussSeidel { aitken: true };
        self
    }

    pub fn recording(mut self) -> Self {
        self.record_snapshots = true;
        self
    }

    /// Reject settings the solver cannot run with.
    pub fn validate(&self) -> Result<(), crate::MdoError> {
        let bad = |what: &str| {
            Err(crate::MdoError::InvalidArg {
                what: what.to_string(),
            })
        };
        if self.max_iterations == 0 {
            return bad("max_iterations must be at least 1");
        }
        if !(self.tol.abs >= 0.0 && self.tol.rel >= 0.0) {
            return bad("tolerances must be non-negative");
        }
        if self.tol.abs == 0.0 && self.tol.rel == 0.0 {
            return bad("at least one tolerance must be positive");
        }
        if !(self.divergence_limit > 1.0) {
            return bad("divergence_limit must be greater than 1");
        }
        if let ConvergencePolicy::Newton { max_line_search } = self.policy {
            if max_line_search == 0 {
                return bad("max_line_search must be at least 1");
            }
        }
        Ok(())
    }
}
