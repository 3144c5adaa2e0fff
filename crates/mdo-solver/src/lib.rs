//! Evaluation engine: run context, graph execution and convergence of
//! coupled regions.
//!
//! ```
//! use mdo_components::ExprComponent;
//! use mdo_graph::GraphBuilder;
//! use mdo_solver::{EvaluateOptions, RunContext, evaluate};
//!
//! let mut b = GraphBuilder::new();
//! b.add("a", ExprComponent::new(&["a_out = b_in + 1"]).unwrap());
//! b.add("b", ExprComponent::new(&["b_out = 0.5*a_in"]).unwrap());
//! b.connect("a.a_out", "b.a_in").connect("b.b_out", "a.b_in");
//! let graph = b.build().unwrap();
//!
//! let mut ctx = RunContext::new(&graph);
//! let report = evaluate(&graph, &mut ctx, &EvaluateOptions::default()).unwrap();
//! assert!(report.converged());
//! assert!((ctx.get_path(&graph, "a.a_out").unwrap()[0] - 2.0).abs() < 1e-4);
//! ```

pub mod context;
pub mod cycle;
pub mod error;
pub mod evaluate;
pub mod jacobian;
pub mod local;
pub mod newton;
pub mod partials;

pub use context::{EvalCounters, RunContext};
pub use cycle::{ConvergenceSolver, CycleReport, CycleSnapshot, CycleState};
pub use error::{SolverError, SolverResult};
pub use evaluate::{EvaluateOptions, EvaluationReport, evaluate, evaluate_strict};
pub use newton::{Bounds, NewtonConfig, NewtonResult, newton_solve};
pub use partials::{LocalJacobian, effective_method, local_partials, raw_partials};
