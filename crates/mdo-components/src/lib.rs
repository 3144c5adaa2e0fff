//! mdo-components: the component contract and generic building blocks.
//!
//! A component declares named inputs and outputs (with shapes, units and
//! bounds) and either computes its outputs directly (explicit) or exposes
//! residual equations its outputs must satisfy (implicit). Local partials are
//! analytic, finite-difference or complex-step.
//!
//! Built-in components:
//! - `Passthrough`: independent-variable fan-out
//! - `LinearMap`: `y = A x + b`
//! - `ExprComponent`: explicit equations (`y = 2*b + 1`)
//! - `ImplicitExpr`: residual equations (`x**2 - a = 0`)
//!
//! # Example
//!
//! ```
//! use mdo_components::{Component, ComponentLayout, Declarations, ExprComponent, Inputs, Outputs};
//!
//! let comp = ExprComponent::new(&["y = 2*b + 1"]).unwrap();
//! let mut decl = Declarations::new();
//! comp.declare(&mut decl);
//! let layout = ComponentLayout::new(&decl, comp.kind()).unwrap();
//!
//! let mut y = [0.0];
//! comp.compute(
//!     &Inputs::new(layout.inputs(), &[3.0]),
//!     &mut Outputs::new(layout.outputs(), &mut y),
//! )
//! .unwrap();
//! assert_eq!(y[0], 7.0);
//! ```

pub mod common;
pub mod declare;
pub mod error;
pub mod exec;
pub mod expr;
pub mod linear_map;
pub mod partials;
pub mod passthrough;
pub mod scalar;
pub mod traits;
pub mod view;

// Re-exports
pub use declare::{ComponentLayout, Declarations, LocalVar};
pub use error::{ComponentError, ComponentResult};
pub use exec::{ExprComponent, ImplicitExpr};
pub use expr::{Equation, Expr};
pub use linear_map::LinearMap;
pub use partials::Partials;
pub use passthrough::Passthrough;
pub use scalar::{C64, Scalar};
pub use traits::{Component, ComponentKind, DerivativeMethod, FdForm, FdOptions};
pub use view::{ComplexInputs, ComplexOutputs, Inputs, Outputs, VarView, VarViewMut};
