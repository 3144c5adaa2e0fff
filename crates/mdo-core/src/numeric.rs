use crate::MdoError;

/// Floating point type used throughout the system
pub type Real = f64;

/// Absolute plus relative tolerance pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-10,
            rel: 1e-6,
        }
    }
}

impl Tolerances {
    pub fn new(abs: Real, rel: Real) -> Self {
        Self { abs, rel }
    }

    /// Threshold a norm has to fall below, given the magnitude of the values it measures.
    pub fn threshold(&self, scale: Real) -> Real {
        self.abs + self.rel * scale.abs()
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, MdoError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(MdoError::NonFinite { what, value: v })
    }
}

/// Infinity norm of a slice (0 for an empty slice, NaN propagates).
pub fn max_abs(values: &[Real]) -> Real {
    values.iter().fold(0.0, |acc: Real, v| {
        if v.is_nan() || acc.is_nan() {
            Real::NAN
        } else {
            acc.max(v.abs())
        }
    })
}

/// Infinity norm of the difference of two equally sized slices.
pub fn max_abs_diff(a: &[Real], b: &[Real]) -> Real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(0.0, |acc: Real, (x, y)| {
        let d = (x - y).abs();
        if d.is_nan() || acc.is_nan() {
            Real::NAN
        } else {
            acc.max(d)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearly_equal_basic() {
        let tol = Tolerances {
            abs: 1e-12,
            rel: 1e-9,
        };
        assert!(nearly_equal(1.0, 1.0 + 1e-12, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(1.0, 1.0 + 1e-6, tol));
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn norms() {
        assert_eq!(max_abs(&[]), 0.0);
        assert_eq!(max_abs(&[1.0, -3.0, 2.0]), 3.0);
        assert_eq!(max_abs_diff(&[1.0, 2.0], &[1.5, -1.0]), 3.0);
        assert!(max_abs(&[1.0, Real::NAN]).is_nan());
    }

    #[test]
    fn threshold_mixes_abs_and_rel() {
        let tol = Tolerances::new(1e-8, 1e-4);
        assert!((tol.threshold(100.0) - (1e-8 + 1e-2)).abs() < 1e-15);
        assert_eq!(tol.threshold(0.0), 1e-8);
    }
}
