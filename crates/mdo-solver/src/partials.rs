//! Local partial derivatives of one component, in residual form.

use mdo_components::{
    C64, ComplexInputs, ComplexOutputs, ComponentError, ComponentKind, DerivativeMethod,
    FdOptions, Inputs, Partials,
};
use mdo_graph::Node;
use nalgebra::{DMatrix, DVector};

use crate::error::{SolverError, SolverResult};
use crate::jacobian::{complex_step_jacobian, fd_jacobian_at};
use crate::local;

/// Partials of the residual `R(u, y)` of one component.
///
/// For explicit components `R = y - f(u)`, so `dr_dy` is the identity and
/// `dr_du = -df/du`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalJacobian {
    /// Rows: outputs, columns: inputs (local layout order).
    pub dr_du: DMatrix<f64>,
    /// Rows: outputs, columns: outputs.
    pub dr_dy: DMatrix<f64>,
}

/// The method that will actually be used for `node`, with the default FD
/// stencil standing in for `Unavailable` when `fallback` is set.
pub fn effective_method(node: &Node, fallback: bool) -> SolverResult<DerivativeMethod> {
    match node.derivative_method() {
        DerivativeMethod::Unavailable if fallback => {
            Ok(DerivativeMethod::FiniteDifference(FdOptions::default()))
        }
        DerivativeMethod::Unavailable => Err(SolverError::DerivativeUnavailable {
            comp: node.name.clone(),
        }),
        m => Ok(m),
    }
}

/// Raw partials matrix in the component's own convention: `dy/du` for
/// explicit components, `[dR/du | dR/dy]` for implicit ones.
pub fn raw_partials(node: &Node, u: &[f64], y: &[f64], method: DerivativeMethod) -> SolverResult<DMatrix<f64>> {
    let layout = &node.layout;
    let eval_err = |e: ComponentError| SolverError::evaluation(&node.name, e);

    let mut raw = match method {
        DerivativeMethod::Unavailable => {
            return Err(SolverError::DerivativeUnavailable {
                comp: node.name.clone(),
            });
        }
        DerivativeMethod::Analytic => {
            let mut p = Partials::new(layout);
            node.component
                .compute_partials(
                    &Inputs::new(layout.inputs(), u),
                    &Inputs::new(layout.outputs(), y),
                    &mut p,
                )
                .map_err(eval_err)?;
            return Ok(p.into_matrix());
        }
        DerivativeMethod::FiniteDifference(opts) => match node.kind() {
            ComponentKind::Explicit => {
                let x = DVector::from_column_slice(u);
                let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
                    let mut out = y.to_vec();
                    local::compute(node, x.as_slice(), &mut out)?;
                    Ok(DVector::from_vec(out))
                };
                let f_x = f(&x)?;
                fd_jacobian_at(&x, &f_x, f, opts.step, opts.form)?
            }
            ComponentKind::Implicit => {
                let nu = u.len();
                let x = DVector::from_iterator(nu + y.len(), u.iter().chain(y).copied());
                let f = |x: &DVector<f64>| -> SolverResult<DVector<f64>> {
                    let (xu, xy) = x.as_slice().split_at(nu);
                    local::residuals(node, xu, xy).map(DVector::from_vec)
                };
                let f_x = f(&x)?;
                fd_jacobian_at(&x, &f_x, f, opts.step, opts.form)?
            }
        },
        DerivativeMethod::ComplexStep { step } => match node.kind() {
            ComponentKind::Explicit => {
                let x = DVector::from_column_slice(u);
                let guess: Vec<C64> = y.iter().map(|v| C64::new(*v, 0.0)).collect();
                complex_step_jacobian(
                    &x,
                    y.len(),
                    |xc| {
                        let mut out = guess.clone();
                        node.component
                            .compute_complex(
                                &ComplexInputs::new(layout.inputs(), xc),
                                &mut ComplexOutputs::new(layout.outputs(), &mut out),
                            )
                            .map_err(eval_err)?;
                        Ok(out)
                    },
                    step,
                )?
            }
            ComponentKind::Implicit => {
                let nu = u.len();
                let x = DVector::from_iterator(nu + y.len(), u.iter().chain(y).copied());
                complex_step_jacobian(
                    &x,
                    y.len(),
                    |xc| {
                        let (xu, xy) = xc.split_at(nu);
                        let mut r = vec![C64::new(0.0, 0.0); y.len()];
                        node.component
                            .apply_residuals_complex(
                                &ComplexInputs::new(layout.inputs(), xu),
                                &ComplexInputs::new(layout.outputs(), xy),
                                &mut ComplexOutputs::new(layout.outputs(), &mut r),
                            )
                            .map_err(eval_err)?;
                        Ok(r)
                    },
                    step,
                )?
            }
        },
    };

    mask_undeclared(node, &mut raw);
    Ok(raw)
}

/// Zero the blocks outside the declared sparsity.
fn mask_undeclared(node: &Node, raw: &mut DMatrix<f64>) {
    let layout = &node.layout;
    for (o, out) in layout.outputs().iter().enumerate() {
        for col in 0..layout.column_vars() {
            if layout.is_declared(o, col) {
                continue;
            }
            let c0 = layout.column_offset(col);
            let nc = layout.column(col).size;
            raw.view_mut((out.offset, c0), (out.size, nc)).fill(0.0);
        }
    }
}

/// Local partials of `node` at `(u, y)` in residual form.
pub fn local_partials(node: &Node, u: &[f64], y: &[f64], fallback: bool) -> SolverResult<LocalJacobian> {
    let method = effective_method(node, fallback)?;
    let raw = raw_partials(node, u, y, method)?;
    let (nu, ny) = (u.len(), y.len());
    Ok(match node.kind() {
        ComponentKind::Explicit => LocalJacobian {
            dr_du: -raw,
            dr_dy: DMatrix::identity(ny, ny),
        },
        ComponentKind::Implicit => LocalJacobian {
            dr_du: raw.columns(0, nu).into_owned(),
            dr_dy: raw.columns(nu, ny).into_owned(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdo_components::{Component, Declarations, FdForm, Outputs};
    use mdo_core::VarMeta;
    use mdo_graph::{Graph, GraphBuilder};

    /// f = x^2 * y + sin(x), g = 3y, with a selectable derivative method.
    struct Smooth(DerivativeMethod);

    impl Component for Smooth {
        fn declare(&self, decl: &mut Declarations) {
            decl.add_input(VarMeta::input("x"))
                .add_input(VarMeta::input("y"))
                .add_output(VarMeta::output("f"))
                .add_output(VarMeta::output("g"))
                .declare_partials("f", "*")
                .declare_partials("g", "y");
        }

        fn derivative_method(&self) -> DerivativeMethod {
            self.0
        }

        fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<(), ComponentError> {
            let (x, y) = (inputs.scalar("x")?, inputs.scalar("y")?);
            outputs.set_scalar("f", x * x * y + x.sin())?;
            outputs.set_scalar("g", 3.0 * y + 1e-3 * x)
        }

        fn compute_partials(
            &self,
            inputs: &Inputs<'_>,
            _outputs: &Inputs<'_>,
            partials: &mut Partials<'_>,
        ) -> Result<(), ComponentError> {
            let (x, y) = (inputs.scalar("x")?, inputs.scalar("y")?);
            partials.set_scalar("f", "x", 2.0 * x * y + x.cos())?;
            partials.set_scalar("f", "y", x * x)?;
            partials.set_scalar("g", "y", 3.0)
        }
    }

    fn graph(method: DerivativeMethod) -> Graph {
        let mut b = GraphBuilder::new();
        b.add("s", Smooth(method));
        b.build().unwrap()
    }

    fn partials_with(method: DerivativeMethod) -> LocalJacobian {
        let g = graph(method);
        local_partials(&g.nodes()[0], &[1.3, 0.7], &[0.0, 0.0], false).unwrap()
    }

    #[test]
    fn analytic_and_finite_difference_agree() {
        let exact = partials_with(DerivativeMethod::Analytic);
        for form in [FdForm::Forward, FdForm::Central, FdForm::Backward] {
            let fd = partials_with(DerivativeMethod::FiniteDifference(FdOptions { step: 1e-6, form }));
            for (a, b) in exact.dr_du.iter().zip(fd.dr_du.iter()) {
                let rel = (a - b).abs() / a.abs().max(1e-12);
                assert!(a == b || rel < 1e-4, "{form:?}: {a} vs {b}");
            }
        }
        assert_eq!(exact.dr_dy, DMatrix::identity(2, 2));
    }

    #[test]
    fn undeclared_dependency_is_masked() {
        // g depends weakly on x but only d(g)/d(y) is declared.
        let fd = partials_with(DerivativeMethod::default());
        assert_eq!(fd.dr_du[(1, 0)], 0.0);
        assert!((fd.dr_du[(1, 1)] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn unavailable_without_fallback_is_an_error() {
        let g = graph(DerivativeMethod::Unavailable);
        let node = &g.nodes()[0];
        assert!(matches!(
            local_partials(node, &[1.0, 1.0], &[0.0, 0.0], false),
            Err(SolverError::DerivativeUnavailable { .. })
        ));
        let fd = local_partials(node, &[1.0, 1.0], &[0.0, 0.0], true).unwrap();
        assert!((fd.dr_du[(0, 1)] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn implicit_complex_step_splits_columns() {
        let mut b = GraphBuilder::new();
        b.add(
            "r",
            mdo_components::ImplicitExpr::new(&[("x", "x**2 - a")]).unwrap(),
        );
        let g = b.build().unwrap();
        let jac = local_partials(&g.nodes()[0], &[9.0], &[2.0], false).unwrap();
        assert!((jac.dr_du[(0, 0)] + 1.0).abs() < 1e-14);
        assert!((jac.dr_dy[(0, 0)] - 4.0).abs() < 1e-14);
    }
}
