//! Optimization driver: design problems over a coupling graph and the
//! algorithms that solve them.
//!
//! - [`OptProblem`]: design variables, objective and constraints, resolved
//!   against a built graph.
//! - [`Optimizer`]: capability interface implemented by [`Sqp`] and
//!   [`DifferentialEvolution`], selected through [`Algorithm`].
//! - [`optimize`]: the propose / evaluate / accept loop, returning an
//!   [`OptimizationResult`] with the full [`History`] of accepted iterates.
//!
//! ```
//! use mdo_components::ExprComponent;
//! use mdo_core::VarMeta;
//! use mdo_driver::{DriverConfig, OptProblem, RunStatus, optimize};
//! use mdo_graph::GraphBuilder;
//!
//! let mut b = GraphBuilder::new();
//! b.add(
//!     "parab",
//!     ExprComponent::new(&["f = (x - 3)**2"])
//!         .unwrap()
//!         .var(VarMeta::input("x").bounds(0.0, 10.0))
//!         .unwrap(),
//! );
//! let graph = b.build().unwrap();
//!
//! let mut problem = OptProblem::new(&graph, "parabola");
//! problem.design_var("parab.x").unwrap();
//! problem.objective("parab.f").unwrap();
//! let result = optimize(&problem, &DriverConfig::default()).unwrap();
//! assert_eq!(result.status, RunStatus::Converged);
//! assert!((result.best.unwrap().design[0] - 3.0).abs() < 1e-6);
//! ```

mod compass;
pub mod config;
pub mod de;
pub mod driver;
pub mod error;
pub mod iterate;
pub mod optimizer;
pub mod problem;
mod qp;
pub mod sqp;

pub use config::{Algorithm, DriverConfig};
pub use de::{DeConfig, DifferentialEvolution};
pub use driver::{
    DriverProgressEvent, OptimizationResult, RunStatus, optimize, optimize_in,
    optimize_with_progress,
};
pub use error::{DriverError, DriverResult};
pub use iterate::{History, Iterate, IterateFlags};
pub use optimizer::{DesignSpace, Evaluation, Optimizer, Termination, Verdict};
pub use problem::{Constraint, ConstraintBound, DesignVar, OptProblem, Response};
pub use sqp::{Sqp, SqpConfig};
