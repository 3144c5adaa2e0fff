//! Comparison of declared local partials against numerical estimates.

use mdo_components::{ComponentError, DerivativeMethod, FdOptions, common::DEFAULT_CS_STEP};
use mdo_core::max_abs;
use mdo_graph::{Graph, Node};
use mdo_solver::{RunContext, SolverError, raw_partials};
use nalgebra::DMatrix;

use crate::error::DerivResult;

/// Error of one `(of, wrt)` block of one component.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialCheck {
    pub component: String,
    pub of: String,
    pub wrt: String,
    /// Method of the declared partials.
    pub reference: &'static str,
    /// Method they were checked against.
    pub method: &'static str,
    pub magnitude: f64,
    pub abs_error: f64,
    pub rel_error: f64,
}

impl PartialCheck {
    pub fn passes(&self, rel_tol: f64, abs_tol: f64) -> bool {
        self.abs_error <= abs_tol || self.rel_error <= rel_tol
    }
}

fn method_name(m: DerivativeMethod) -> &'static str {
    match m {
        DerivativeMethod::Analytic => "analytic",
        DerivativeMethod::FiniteDifference(_) => "fd",
        DerivativeMethod::ComplexStep { .. } => "cs",
        DerivativeMethod::Unavailable => "unavailable",
    }
}

fn compare(
    node: &Node,
    reference: &DMatrix<f64>,
    estimate: &DMatrix<f64>,
    ref_name: &'static str,
    est_name: &'static str,
    out: &mut Vec<PartialCheck>,
) {
    let layout = &node.layout;
    for (o, of) in layout.outputs().iter().enumerate() {
        for col in 0..layout.column_vars() {
            if !layout.is_declared(o, col) {
                continue;
            }
            let wrt = layout.column(col);
            let c0 = layout.column_offset(col);
            let r = reference.view((of.offset, c0), (of.size, wrt.size));
            let e = estimate.view((of.offset, c0), (of.size, wrt.size));
            let diff: Vec<f64> = r.iter().zip(e.iter()).map(|(a, b)| a - b).collect();
            let ref_vals: Vec<f64> = r.iter().copied().collect();
            let magnitude = max_abs(&ref_vals);
            let abs_error = max_abs(&diff);
            let rel_error = if magnitude > 0.0 {
                abs_error / magnitude
            } else {
                abs_error
            };
            out.push(PartialCheck {
                component: node.name.clone(),
                of: of.name.clone(),
                wrt: wrt.name.clone(),
                reference: ref_name,
                method: est_name,
                magnitude,
                abs_error,
                rel_error,
            });
        }
    }
}

/// Check the declared partials of every component at the current values
/// against finite differences, and against complex step where the
/// component supports complex evaluation.
///
/// Components with unavailable derivatives are skipped.
pub fn check_partials(graph: &Graph, ctx: &RunContext, fd: &FdOptions) -> DerivResult<Vec<PartialCheck>> {
    let values = ctx.values().as_slice();
    let mut out = Vec::new();
    let (mut u, mut y) = (Vec::new(), Vec::new());

    for node in graph.nodes() {
        let declared = node.derivative_method();
        if declared == DerivativeMethod::Unavailable {
            continue;
        }
        graph.gather_inputs(node.id, values, &mut u);
        graph.gather_outputs(node.id, values, &mut y);
        let reference = raw_partials(node, &u, &y, declared)?;

        if !matches!(declared, DerivativeMethod::FiniteDifference(_)) {
            let estimate = raw_partials(node, &u, &y, DerivativeMethod::FiniteDifference(*fd))?;
            compare(node, &reference, &estimate, method_name(declared), "fd", &mut out);
        }
        if !matches!(declared, DerivativeMethod::ComplexStep { .. }) {
            let cs = DerivativeMethod::ComplexStep {
                step: DEFAULT_CS_STEP,
            };
            match raw_partials(node, &u, &y, cs) {
                Ok(estimate) => {
                    compare(node, &reference, &estimate, method_name(declared), "cs", &mut out)
                }
                Err(SolverError::Evaluation {
                    source: ComponentError::NotSupported { .. },
                    ..
                }) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(out)
}
