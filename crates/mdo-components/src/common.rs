//! Common utilities for component calculations.

use mdo_core::numeric::ensure_finite;

use crate::error::{ComponentError, ComponentResult};

/// Default relative finite-difference step.
pub const DEFAULT_FD_STEP: f64 = 1e-6;

/// Default complex-step size.
pub const DEFAULT_CS_STEP: f64 = 1e-40;

/// Ensure a value is finite, returning ComponentError if not.
pub fn check_finite(value: f64, what: &str) -> ComponentResult<()> {
    if ensure_finite(value, "component value").is_err() {
        return Err(ComponentError::NonPhysical {
            what: format!("{what} = {value}"),
        });
    }
    Ok(())
}

/// Ensure every entry of a slice is finite.
pub fn check_all_finite(values: &[f64], what: &str) -> ComponentResult<()> {
    values.iter().try_for_each(|v| check_finite(*v, what))
}

/// Absolute perturbation for a relative step around `x`.
pub fn relative_step(step: f64, x: f64) -> f64 {
    step * x.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_step_floors_at_one() {
        assert_eq!(relative_step(1e-6, 0.0), 1e-6);
        assert_eq!(relative_step(1e-6, -1e3), 1e-3);
    }

    #[test]
    fn finite_checks() {
        assert!(check_finite(1.0, "x").is_ok());
        assert!(check_all_finite(&[1.0, f64::INFINITY], "x").is_err());
    }
}
