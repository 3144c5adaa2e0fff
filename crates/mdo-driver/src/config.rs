//! Driver configuration.

use std::time::Duration;

use mdo_derivs::DerivOptions;
use mdo_solver::EvaluateOptions;

use crate::de::{DeConfig, DifferentialEvolution};
use crate::error::{DriverError, DriverResult};
use crate::optimizer::{DesignSpace, Optimizer};
use crate::sqp::{Sqp, SqpConfig};

/// Optimization algorithm and its settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Algorithm {
    Sqp(SqpConfig),
    DifferentialEvolution(DeConfig),
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Sqp(SqpConfig::default())
    }
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sqp(_) => "sqp",
            Algorithm::DifferentialEvolution(_) => "differential-evolution",
        }
    }

    pub fn needs_gradients(&self) -> bool {
        matches!(self, Algorithm::Sqp(_))
    }

    pub(crate) fn build(&self, space: &DesignSpace) -> DriverResult<Box<dyn Optimizer>> {
        match *self {
            Algorithm::Sqp(cfg) => {
                if !(cfg.tol > 0.0 && cfg.backtrack > 0.0 && cfg.backtrack < 1.0) {
                    return Err(DriverError::config(
                        "SQP needs a positive tolerance and a backtracking factor in (0, 1)",
                    ));
                }
                Ok(Box::new(Sqp::new(cfg)))
            }
            Algorithm::DifferentialEvolution(cfg) => {
                if !space.is_bounded() {
                    return Err(DriverError::config(
                        "differential evolution needs finite bounds on every design variable",
                    ));
                }
                if !(0.0..=1.0).contains(&cfg.cr) || !(cfg.f > 0.0 && cfg.f <= 2.0) {
                    return Err(DriverError::config(format!(
                        "differential evolution needs cr in [0, 1] and f in (0, 2], got cr={} f={}",
                        cfg.cr, cfg.f
                    )));
                }
                Ok(Box::new(DifferentialEvolution::new(cfg)))
            }
        }
    }
}

/// Settings of one optimization run.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverConfig {
    pub algorithm: Algorithm,
    /// Accepted iterates after the starting point.
    pub max_iterations: usize,
    /// Graph evaluations, the starting point included.
    pub max_evaluations: usize,
    /// Relative objective change between accepted iterates.
    pub ftol: f64,
    /// Relative design change (scaled, infinity norm) between accepted iterates.
    pub xtol: f64,
    /// Largest scaled constraint violation of a feasible iterate.
    pub ctol: f64,
    /// Checked before each step.
    pub timeout: Option<Duration>,
    /// Consecutive failed evaluations before the run is abandoned.
    pub max_failures: usize,
    /// Keep candidates whose coupled regions did not converge, flagged.
    pub accept_unconverged: bool,
    pub deriv: DerivOptions,
    pub eval: EvaluateOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_iterations: 200,
            max_evaluations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            ctol: 1e-6,
            timeout: None,
            max_failures: 10,
            accept_unconverged: false,
            deriv: DerivOptions::default(),
            eval: EvaluateOptions::default(),
        }
    }
}

impl DriverConfig {
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.max_evaluations == 0 {
            return Err(DriverError::config("max_evaluations must be positive"));
        }
        if self.max_failures == 0 {
            return Err(DriverError::config("max_failures must be positive"));
        }
        for (name, v) in [("ftol", self.ftol), ("xtol", self.xtol), ("ctol", self.ctol)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(DriverError::config(format!(
                    "{name} must be finite and non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn defaults_are_valid() {
        assert!(DriverConfig::default().validate().is_ok());
        assert_eq!(DriverConfig::default().algorithm.name(), "sqp");
    }

    #[test]
    fn invalid_settings_rejected() {
        let cfg = DriverConfig {
            ctol: -1.0,
            ..DriverConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(DriverError::Config { .. })));

        let unbounded = DesignSpace {
            lower: DVector::from_vec(vec![f64::NEG_INFINITY]),
            upper: DVector::from_vec(vec![1.0]),
            n_ineq: 0,
            n_eq: 0,
        };
        let de = Algorithm::DifferentialEvolution(DeConfig::default());
        assert!(de.build(&unbounded).is_err());
        assert!(Algorithm::default().build(&unbounded).is_ok());
    }
}
