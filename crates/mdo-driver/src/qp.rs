//! Dense convex QP subproblem solved through its dual.
//!
//! ```text
//! min  1/2 d'Hd + c'd
//! s.t. A_eq d  = b_eq
//!      A_in d <= b_in
//! ```
//!
//! `H` must be positive definite. The dual is a bound-constrained QP in the
//! multipliers, solved by projected coordinate sweeps (Hildreth); the active
//! set it identifies is then refined with one exact KKT solve.

use nalgebra::{DMatrix, DVector};

#[derive(Clone, Debug)]
pub(crate) struct QpSolution {
    pub d: DVector<f64>,
    pub lambda_eq: DVector<f64>,
    pub lambda_in: DVector<f64>,
    /// Whether the dual iteration settled; `false` usually means the
    /// linearized constraints are inconsistent.
    pub converged: bool,
}

impl QpSolution {
    /// Largest multiplier of the equalities and the first `n_ineq`
    /// inequality rows. Bound rows come after those and are skipped.
    pub fn max_constraint_multiplier(&self, n_ineq: usize) -> f64 {
        self.lambda_eq
            .iter()
            .chain(self.lambda_in.iter().take(n_ineq))
            .fold(0.0, |m, v| m.max(v.abs()))
    }
}

const ACTIVE_TOL: f64 = 1e-12;

/// Solve the QP. Returns `None` when `H` is not positive definite.
pub(crate) fn solve_qp(
    h: &DMatrix<f64>,
    c: &DVector<f64>,
    a_eq: &DMatrix<f64>,
    b_eq: &DVector<f64>,
    a_in: &DMatrix<f64>,
    b_in: &DVector<f64>,
    max_sweeps: usize,
) -> Option<QpSolution> {
    let n = c.len();
    let (m_eq, m_in) = (a_eq.nrows(), a_in.nrows());
    let chol = h.clone().cholesky()?;
    let d0 = -chol.solve(c);

    if m_eq + m_in == 0 {
        return Some(QpSolution {
            d: d0,
            lambda_eq: DVector::zeros(0),
            lambda_in: DVector::zeros(0),
            converged: true,
        });
    }

    // Stacked constraints, equalities first.
    let m = m_eq + m_in;
    let mut a = DMatrix::zeros(m, n);
    a.rows_mut(0, m_eq).copy_from(a_eq);
    a.rows_mut(m_eq, m_in).copy_from(a_in);
    let mut e = DVector::zeros(m);
    e.rows_mut(0, m_eq).copy_from(b_eq);
    e.rows_mut(m_eq, m_in).copy_from(b_in);

    let h_inv_at = chol.solve(&a.transpose());
    let dual = &a * &h_inv_at;
    let q = &e - &a * &d0;

    let mut lambda = DVector::<f64>::zeros(m);
    let mut converged = false;
    for _ in 0..max_sweeps {
        let mut max_change: f64 = 0.0;
        for i in 0..m {
            let mii = dual[(i, i)];
            if mii <= f64::EPSILON {
                continue;
            }
            let grad = dual.row(i).dot(&lambda.transpose()) + q[i];
            let mut next = lambda[i] - grad / mii;
            if i >= m_eq {
                next = next.max(0.0);
            }
            max_change = max_change.max((next - lambda[i]).abs());
            lambda[i] = next;
        }
        let scale = 1.0 + lambda.amax();
        if !scale.is_finite() {
            break;
        }
        if max_change <= 1e-13 * scale {
            converged = true;
            break;
        }
    }

    let mut d = &d0 - &h_inv_at * &lambda;

    if converged {
        if let Some((d_exact, lambda_exact)) = refine(h, c, &a, &e, &lambda, m_eq) {
            d = d_exact;
            lambda = lambda_exact;
        }
    }

    Some(QpSolution {
        d,
        lambda_eq: lambda.rows(0, m_eq).into_owned(),
        lambda_in: lambda.rows(m_eq, m_in).into_owned(),
        converged,
    })
}

/// Exact solution on the active set suggested by `lambda`, kept only if it
/// is primal and dual feasible.
fn refine(
    h: &DMatrix<f64>,
    c: &DVector<f64>,
    a: &DMatrix<f64>,
    e: &DVector<f64>,
    lambda: &DVector<f64>,
    m_eq: usize,
) -> Option<(DVector<f64>, DVector<f64>)> {
    let n = c.len();
    let active: Vec<usize> = (0..a.nrows())
        .filter(|&i| i < m_eq || lambda[i] > ACTIVE_TOL)
        .collect();
    let k = active.len();

    let mut kkt = DMatrix::zeros(n + k, n + k);
    kkt.view_mut((0, 0), (n, n)).copy_from(h);
    let mut rhs = DVector::zeros(n + k);
    rhs.rows_mut(0, n).copy_from(&(-c));
    for (r, &i) in active.iter().enumerate() {
        for j in 0..n {
            kkt[(n + r, j)] = a[(i, j)];
            kkt[(j, n + r)] = a[(i, j)];
        }
        rhs[n + r] = e[i];
    }
    let sol = kkt.lu().solve(&rhs)?;
    if sol.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let d = sol.rows(0, n).into_owned();
    let mut full = DVector::zeros(a.nrows());
    for (r, &i) in active.iter().enumerate() {
        full[i] = sol[n + r];
    }
    let dual_ok = (m_eq..a.nrows()).all(|i| full[i] >= -1e-10);
    let scale = 1.0 + e.amax();
    let primal_ok = (m_eq..a.nrows()).all(|i| a.row(i).dot(&d.transpose()) <= e[i] + 1e-9 * scale);
    (dual_ok && primal_ok).then_some((d, full))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(n: usize) -> (DMatrix<f64>, DVector<f64>) {
        (DMatrix::zeros(0, n), DVector::zeros(0))
    }

    #[test]
    fn unconstrained_is_newton_step() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 4.0]));
        let c = DVector::from_vec(vec![-2.0, 4.0]);
        let (ae, be) = empty(2);
        let sol = solve_qp(&h, &c, &ae, &be, &ae, &be, 100).unwrap();
        assert!((sol.d[0] - 1.0).abs() < 1e-14);
        assert!((sol.d[1] + 1.0).abs() < 1e-14);
    }

    #[test]
    fn active_inequality_gets_positive_multiplier() {
        // min (d0-2)^2 + (d1-2)^2  s.t. d0 + d1 <= 2  ->  d = (1, 1), lambda = 2
        let h = DMatrix::identity(2, 2) * 2.0;
        let c = DVector::from_vec(vec![-4.0, -4.0]);
        let (ae, be) = empty(2);
        let a_in = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let b_in = DVector::from_vec(vec![2.0]);
        let sol = solve_qp(&h, &c, &ae, &be, &a_in, &b_in, 1000).unwrap();
        assert!(sol.converged);
        assert!((sol.d[0] - 1.0).abs() < 1e-10);
        assert!((sol.d[1] - 1.0).abs() < 1e-10);
        assert!((sol.lambda_in[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn inactive_inequality_and_equality() {
        // min d0^2 + d1^2  s.t. d0 = 1, d1 <= 5
        let h = DMatrix::identity(2, 2) * 2.0;
        let c = DVector::zeros(2);
        let a_eq = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let b_eq = DVector::from_vec(vec![1.0]);
        let a_in = DMatrix::from_row_slice(1, 2, &[0.0, 1.0]);
        let b_in = DVector::from_vec(vec![5.0]);
        let sol = solve_qp(&h, &c, &a_eq, &b_eq, &a_in, &b_in, 1000).unwrap();
        assert!((sol.d[0] - 1.0).abs() < 1e-10);
        assert!(sol.d[1].abs() < 1e-10);
        assert_eq!(sol.lambda_in[0], 0.0);
        assert!((sol.lambda_eq[0] + 2.0).abs() < 1e-9);
    }

    #[test]
    fn indefinite_hessian_is_refused() {
        let h = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1.0]));
        let (ae, be) = empty(2);
        assert!(solve_qp(&h, &DVector::zeros(2), &ae, &be, &ae, &be, 10).is_none());
    }
}
