//! Finite difference and complex-step Jacobian computation.
//!
//! Columns are independent and evaluated in parallel; each column works on
//! its own copy of the point.

use mdo_components::{C64, FdForm, common::relative_step};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::SolverResult;

fn assemble(m: usize, n: usize, columns: Vec<DVector<f64>>) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(m, n);
    for (j, col) in columns.into_iter().enumerate() {
        jac.set_column(j, &col);
    }
    jac
}

/// Compute Jacobian using forward finite differences.
///
/// For each column j, perturbs x[j] by `epsilon * max(|x[j]|, 1)` and
/// computes (f(x+e) - f(x))/dx.
pub fn finite_difference_jacobian<F>(
    x: &DVector<f64>,
    f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>> + Sync,
{
    let f_x = f(x)?;
    fd_jacobian_at(x, &f_x, f, epsilon, FdForm::Forward)
}

/// Compute Jacobian using central finite differences (more accurate but 2x cost).
pub fn central_difference_jacobian<F>(
    x: &DVector<f64>,
    f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>> + Sync,
{
    let f_x = f(x)?;
    fd_jacobian_at(x, &f_x, f, epsilon, FdForm::Central)
}

/// Compute Jacobian using backward finite differences.
pub fn backward_difference_jacobian<F>(
    x: &DVector<f64>,
    f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>> + Sync,
{
    let f_x = f(x)?;
    fd_jacobian_at(x, &f_x, f, epsilon, FdForm::Backward)
}

/// Finite-difference Jacobian when `f(x)` is already known.
pub fn fd_jacobian_at<F>(
    x: &DVector<f64>,
    f_x: &DVector<f64>,
    f: F,
    epsilon: f64,
    form: FdForm,
) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>> + Sync,
{
    let n = x.len();
    let m = f_x.len();

    let columns = (0..n)
        .into_par_iter()
        .map(|j| {
            let dx = relative_step(epsilon, x[j]);
            match form {
                FdForm::Forward => {
                    let mut xp = x.clone();
                    xp[j] += dx;
                    Ok((f(&xp)? - f_x) / dx)
                }
                FdForm::Backward => {
                    let mut xm = x.clone();
                    xm[j] -= dx;
                    Ok((f_x - f(&xm)?) / dx)
                }
                FdForm::Central => {
                    let mut xp = x.clone();
                    xp[j] += dx;
                    let mut xm = x.clone();
                    xm[j] -= dx;
                    Ok((f(&xp)? - f(&xm)?) / (2.0 * dx))
                }
            }
        })
        .collect::<SolverResult<Vec<_>>>()?;

    Ok(assemble(m, n, columns))
}

/// Complex-step Jacobian: `Im(f(x + i h e_j)) / h`. Exact to machine
/// precision for analytic `f`, with no subtractive cancellation.
pub fn complex_step_jacobian<F>(x: &DVector<f64>, m: usize, f: F, h: f64) -> SolverResult<DMatrix<f64>>
where
    F: Fn(&[C64]) -> SolverResult<Vec<C64>> + Sync,
{
    let n = x.len();
    let base: Vec<C64> = x.iter().map(|v| C64::new(*v, 0.0)).collect();

    let columns = (0..n)
        .into_par_iter()
        .map(|j| {
            let mut xc = base.clone();
            xc[j].im = h;
            let fc = f(&xc)?;
            Ok(DVector::from_iterator(m, fc.iter().map(|v| v.im / h)))
        })
        .collect::<SolverResult<Vec<_>>>()?;

    Ok(assemble(m, n, columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jacobian_linear() {
        // f(x) = [2x0 + 3x1, x0 - x1]
        let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            Ok(DVector::from_vec(vec![2.0 * x[0] + 3.0 * x[1], x[0] - x[1]]))
        };

        let x = DVector::from_vec(vec![1.0, 2.0]);
        let jac = finite_difference_jacobian(&x, f, 1e-7).unwrap();

        assert!((jac[(0, 0)] - 2.0).abs() < 1e-5);
        assert!((jac[(0, 1)] - 3.0).abs() < 1e-5);
        assert!((jac[(1, 0)] - 1.0).abs() < 1e-5);
        assert!((jac[(1, 1)] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn jacobian_nonlinear() {
        // f(x) = [x0^2, x0*x1]
        let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            Ok(DVector::from_vec(vec![x[0] * x[0], x[0] * x[1]]))
        };

        let x = DVector::from_vec(vec![2.0, 3.0]);
        let jac = central_difference_jacobian(&x, f, 1e-6).unwrap();

        // df0/dx0 = 2*x0 = 4, df0/dx1 = 0, df1/dx0 = x1 = 3, df1/dx1 = x0 = 2
        assert!((jac[(0, 0)] - 4.0).abs() < 1e-6);
        assert!(jac[(0, 1)].abs() < 1e-6);
        assert!((jac[(1, 0)] - 3.0).abs() < 1e-6);
        assert!((jac[(1, 1)] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn backward_matches_forward_on_smooth_function() {
        let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            Ok(DVector::from_vec(vec![x[0].exp()]))
        };
        let x = DVector::from_vec(vec![0.5]);
        let fw = finite_difference_jacobian(&x, f, 1e-6).unwrap();
        let bw = backward_difference_jacobian(&x, f, 1e-6).unwrap();
        assert!((fw[(0, 0)] - 0.5_f64.exp()).abs() < 1e-5);
        assert!((bw[(0, 0)] - 0.5_f64.exp()).abs() < 1e-5);
    }

    #[test]
    fn complex_step_is_exact() {
        let f = |x: &[C64]| -> SolverResult<Vec<C64>> { Ok(vec![x[0] * x[0] * x[1], x[1].sin()]) };
        let x = DVector::from_vec(vec![1.5, 0.3]);
        let jac = complex_step_jacobian(&x, 2, f, 1e-40).unwrap();
        assert!((jac[(0, 0)] - 2.0 * 1.5 * 0.3).abs() < 1e-14);
        assert!((jac[(0, 1)] - 1.5 * 1.5).abs() < 1e-14);
        assert_eq!(jac[(1, 0)], 0.0);
        assert!((jac[(1, 1)] - 0.3_f64.cos()).abs() < 1e-15);
    }

    #[test]
    fn errors_propagate() {
        let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
            if x[0] > 1.0 {
                Err(crate::SolverError::Numeric {
                    what: "out of range".into(),
                })
            } else {
                Ok(x.clone())
            }
        };
        let x = DVector::from_vec(vec![1.0]);
        assert!(finite_difference_jacobian(&x, f, 1e-6).is_err());
    }
}
