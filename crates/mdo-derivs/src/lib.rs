//! Total derivatives of responses with respect to design variables.
//!
//! - [`derivatives`]: unified chain rule over the region blocks of the graph,
//!   forward or reverse.
//! - [`approx_totals`]: whole-model finite differences, for validation or
//!   models without local partials.
//! - [`check_partials`]: declared local partials against numerical estimates.

pub mod approx;
pub mod check;
pub mod error;
pub mod totals;

pub use approx::approx_totals;
pub use check::{PartialCheck, check_partials};
pub use error::{DerivError, DerivResult};
pub use totals::{DerivMode, DerivOptions, TotalJacobian, check_availability, derivatives};
