//! mdo-core: stable foundation for the coupling engine.
//!
//! Contains:
//! - ids (compact handles for components, variables and regions)
//! - units (runtime unit expressions and conversions)
//! - shape / variable (variable declarations)
//! - registry (validated variable namespace + flat value storage)
//! - numeric (Real + tolerances + float helpers)
//! - config (convergence solver settings)
//! - timing (run-owned timers)
//! - error (shared error types)

pub mod config;
pub mod error;
pub mod ids;
pub mod numeric;
pub mod registry;
pub mod shape;
pub mod timing;
pub mod units;
pub mod variable;

// Re-exports: nice ergonomics for downstream crates
pub use config::{ConvergenceConfig, ConvergencePolicy};
pub use error::{MdoError, MdoResult};
pub use ids::*;
pub use numeric::*;
pub use registry::{ComponentVars, Values, VarInfo, VarRegistry};
pub use shape::Shape;
pub use timing::{AccumulatingTimer, RunTimings, Timer};
pub use units::{Conversion, Dimension, Unit};
pub use variable::{VarKind, VarMeta};
