//! The component contract.

use crate::common::{DEFAULT_CS_STEP, DEFAULT_FD_STEP};
use crate::declare::Declarations;
use crate::error::{ComponentError, ComponentResult};
use crate::partials::Partials;
use crate::view::{ComplexInputs, ComplexOutputs, Inputs, Outputs};

/// Whether outputs are computed directly or defined by residual equations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ComponentKind {
    #[default]
    Explicit,
    Implicit,
}

/// Finite-difference stencil.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FdForm {
    #[default]
    Forward,
    Central,
    Backward,
}

/// Finite-difference settings; the perturbation is `step * max(|x|, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FdOptions {
    pub step: f64,
    pub form: FdForm,
}

impl Default for FdOptions {
    fn default() -> Self {
        Self {
            step: DEFAULT_FD_STEP,
            form: FdForm::Forward,
        }
    }
}

impl FdOptions {
    pub fn central(step: f64) -> Self {
        Self {
            step,
            form: FdForm::Central,
        }
    }
}

/// How the local partials of a component are obtained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DerivativeMethod {
    /// `compute_partials` fills the partials.
    Analytic,
    FiniteDifference(FdOptions),
    /// Requires `compute_complex` (explicit) or `apply_residuals_complex` (implicit).
    ComplexStep { step: f64 },
    /// The component cannot provide derivatives.
    Unavailable,
}

impl Default for DerivativeMethod {
    fn default() -> Self {
        DerivativeMethod::FiniteDifference(FdOptions::default())
    }
}

impl DerivativeMethod {
    pub fn complex_step() -> Self {
        DerivativeMethod::ComplexStep {
            step: DEFAULT_CS_STEP,
        }
    }
}

/// A computational unit of the coupling graph.
///
/// Components are instantiated once per analysis configuration and evaluated
/// many times; every method takes `&self` and all values live in the buffers
/// handed in, so evaluation is a deterministic function of the inputs.
pub trait Component: Send + Sync {
    /// Declare inputs, outputs and the sparsity of the partials.
    fn declare(&self, decl: &mut Declarations);

    fn kind(&self) -> ComponentKind {
        ComponentKind::Explicit
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::default()
    }

    /// Explicit evaluation `outputs = f(inputs)`.
    ///
    /// Implicit components may implement this as a direct local solve, using
    /// the values already in `outputs` as initial guess. The default for an
    /// implicit component is `NotSupported`, in which case the solver drives
    /// the residuals to zero itself.
    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> ComponentResult<()>;

    /// Residuals `R(inputs, outputs)` of an implicit component.
    fn apply_residuals(
        &self,
        _inputs: &Inputs<'_>,
        _outputs: &Inputs<'_>,
        _residuals: &mut Outputs<'_>,
    ) -> ComponentResult<()> {
        Err(ComponentError::NotSupported {
            what: "apply_residuals is only available on implicit components",
        })
    }

    /// Analytic partials: `dy/du` (explicit) or `dR/du`, `dR/dy` (implicit).
    fn compute_partials(
        &self,
        _inputs: &Inputs<'_>,
        _outputs: &Inputs<'_>,
        _partials: &mut Partials<'_>,
    ) -> ComponentResult<()> {
        Err(ComponentError::NotSupported {
            what: "analytic partials not implemented for this component",
        })
    }

    /// Complex-valued explicit evaluation used by the complex-step method.
    fn compute_complex(
        &self,
        _inputs: &ComplexInputs<'_>,
        _outputs: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        Err(ComponentError::NotSupported {
            what: "complex evaluation not implemented for this component",
        })
    }

    /// Complex-valued residuals used by the complex-step method.
    fn apply_residuals_complex(
        &self,
        _inputs: &ComplexInputs<'_>,
        _outputs: &ComplexInputs<'_>,
        _residuals: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        Err(ComponentError::NotSupported {
            what: "complex residuals not implemented for this component",
        })
    }
}
