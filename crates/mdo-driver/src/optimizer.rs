//! Capability interface between the driver loop and an algorithm.

use nalgebra::{DMatrix, DVector};

/// Scaled box of the design vector; infinite entries are unbounded.
#[derive(Clone, Debug)]
pub struct DesignSpace {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub n_ineq: usize,
    pub n_eq: usize,
}

impl DesignSpace {
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .map(|(v, (lo, hi))| v.max(*lo).min(*hi)),
        )
    }

    pub fn is_bounded(&self) -> bool {
        self.lower.iter().chain(self.upper.iter()).all(|v| v.is_finite())
    }
}

/// One evaluated candidate as the algorithm sees it: scaled design,
/// objective, `g <= 0` inequalities, `h = 0` equalities and, when
/// requested, their gradients.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub x: DVector<f64>,
    pub f: f64,
    pub g: DVector<f64>,
    pub h: DVector<f64>,
    pub grad_f: Option<DVector<f64>>,
    pub jac_g: Option<DMatrix<f64>>,
    pub jac_h: Option<DMatrix<f64>>,
    /// Design entries whose derivatives could not be computed.
    pub frozen: Vec<bool>,
}

impl Evaluation {
    /// Sum of inequality excesses and equality magnitudes.
    pub fn violation(&self) -> f64 {
        self.g.iter().map(|v| v.max(0.0)).sum::<f64>() + self.h.iter().map(|v| v.abs()).sum::<f64>()
    }

    /// Largest single constraint violation.
    pub fn max_violation(&self) -> f64 {
        self.g
            .iter()
            .map(|v| v.max(0.0))
            .chain(self.h.iter().map(|v| v.abs()))
            .fold(0.0, f64::max)
    }

    pub fn has_gradients(&self) -> bool {
        self.grad_f.is_some()
    }
}

/// Decision on an evaluated proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The candidate becomes the new accepted iterate.
    Accept,
    /// The candidate is discarded; the last accepted iterate stays current.
    Reject,
}

/// Why an algorithm stopped on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    /// Optimality reached, as opposed to a stall with no improving step.
    pub converged: bool,
    pub message: String,
}

/// An optimization algorithm driven one candidate at a time.
///
/// The driver owns evaluation and bookkeeping; the algorithm only decides
/// where to look next and which results to keep.
pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    /// Whether candidates must be evaluated with gradients.
    fn needs_gradients(&self) -> bool;

    /// Whether the driver's objective and design-change tolerances apply to
    /// consecutive accepted iterates.
    fn uses_step_tolerances(&self) -> bool {
        true
    }

    /// Called once with the evaluated starting point, before any proposal.
    fn start(&mut self, space: &DesignSpace, x0: &Evaluation);

    /// Next candidate design. The driver projects it onto the bounds.
    fn propose(&mut self) -> DVector<f64>;

    /// Result of the last proposal; `None` when its evaluation failed.
    fn accept(&mut self, result: Option<&Evaluation>) -> Verdict;

    /// Reason to stop reported by the algorithm itself.
    fn terminate(&self) -> Option<Termination>;

    /// Value used to order accepted iterates; lower is better.
    fn merit(&self, eval: &Evaluation) -> f64;
}
