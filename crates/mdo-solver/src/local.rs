//! Evaluation of a single component on local buffers.

use mdo_components::{ComponentError, ComponentKind, Inputs, Outputs, common::check_all_finite};
use mdo_core::{CompId, ConvergenceConfig};
use mdo_graph::{Graph, Node};
use nalgebra::DVector;
use tracing::debug;

use crate::context::EvalCounters;
use crate::error::{SolverError, SolverResult};
use crate::newton::{Bounds, NewtonConfig, newton_solve};
use crate::partials::local_partials;

/// `outputs = f(inputs)`; `y` holds the initial guess on entry.
pub fn compute(node: &Node, u: &[f64], y: &mut [f64]) -> SolverResult<()> {
    node.component
        .compute(
            &Inputs::new(node.layout.inputs(), u),
            &mut Outputs::new(node.layout.outputs(), y),
        )
        .and_then(|()| check_all_finite(y, &format!("{} output", node.name)))
        .map_err(|e| SolverError::evaluation(&node.name, e))
}

/// Residuals in the form the Newton policy uses: `y - f(u)` for explicit
/// components, `R(u, y)` for implicit ones.
pub fn residuals(node: &Node, u: &[f64], y: &[f64]) -> SolverResult<Vec<f64>> {
    match node.kind() {
        ComponentKind::Explicit => {
            let mut f = y.to_vec();
            compute(node, u, &mut f)?;
            Ok(y.iter().zip(&f).map(|(a, b)| a - b).collect())
        }
        ComponentKind::Implicit => {
            let mut r = vec![0.0; y.len()];
            node.component
                .apply_residuals(
                    &Inputs::new(node.layout.inputs(), u),
                    &Inputs::new(node.layout.outputs(), y),
                    &mut Outputs::new(node.layout.outputs(), &mut r),
                )
                .map_err(|e| SolverError::evaluation(&node.name, e))?;
            Ok(r)
        }
    }
}

/// Per-entry bounds of a component's outputs.
pub fn output_bounds(graph: &Graph, comp: CompId) -> Bounds {
    let mut bounds = Bounds::default();
    for &vid in graph.registry().outputs_of(comp) {
        let var = graph.var(vid);
        for _ in 0..var.size() {
            bounds.lower.push(var.meta.lower);
            bounds.upper.push(var.meta.upper);
        }
    }
    bounds
}

/// Whether a component's outputs satisfy its equations after
/// [`solve_component`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalOutcome {
    pub converged: bool,
    /// Residual norm left by a local Newton solve; zero otherwise.
    pub residual: f64,
}

impl LocalOutcome {
    const EXACT: Self = Self {
        converged: true,
        residual: 0.0,
    };
}

/// Bring one component's outputs up to date given its inputs.
///
/// Explicit components are computed once. Implicit components use their own
/// `compute` when they provide one, and are otherwise driven to a zero
/// residual with Newton on their local partials.
pub fn solve_component(
    graph: &Graph,
    node: &Node,
    u: &[f64],
    y: &mut [f64],
    config: &ConvergenceConfig,
    counters: &mut EvalCounters,
) -> SolverResult<LocalOutcome> {
    counters.component_calls += 1;
    if node.kind() == ComponentKind::Explicit {
        return compute(node, u, y).map(|()| LocalOutcome::EXACT);
    }

    match compute(node, u, y) {
        Err(SolverError::Evaluation {
            source: ComponentError::NotSupported { .. },
            ..
        }) => {}
        other => return other.map(|()| LocalOutcome::EXACT),
    }

    let bounds = output_bounds(graph, node.id);
    let newton = NewtonConfig {
        max_iterations: config.max_iterations,
        tol: config.tol,
        ..NewtonConfig::default()
    };
    let calls = std::sync::atomic::AtomicU64::new(0);
    let result = newton_solve(
        DVector::from_column_slice(y),
        |x| {
            calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            residuals(node, u, x.as_slice()).map(DVector::from_vec)
        },
        |x| Ok(local_partials(node, u, x.as_slice(), true)?.dr_dy),
        &newton,
        Some(&bounds),
    )?;
    counters.component_calls += calls.into_inner();
    counters.partials += result.iterations as u64;
    if !result.converged {
        debug!(
            component = node.name.as_str(),
            residual = result.residual_norm,
            "local implicit solve did not converge"
        );
    }
    y.copy_from_slice(result.x.as_slice());
    Ok(LocalOutcome {
        converged: result.converged,
        residual: result.residual_norm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdo_components::ImplicitExpr;
    use mdo_core::VarMeta;
    use mdo_graph::GraphBuilder;

    #[test]
    fn implicit_component_without_compute_is_solved_locally() {
        let mut b = GraphBuilder::new();
        b.add(
            "root",
            ImplicitExpr::new(&[("x", "x**2 - a")])
                .unwrap()
                .var(VarMeta::input("a").value(9.0))
                .unwrap()
                .var(VarMeta::output("x").value(1.0).lower(0.0))
                .unwrap(),
        );
        let g = b.build().unwrap();
        let node = &g.nodes()[0];
        let mut y = [1.0];
        let mut counters = EvalCounters::default();
        let outcome =
            solve_component(&g, node, &[9.0], &mut y, &ConvergenceConfig::default(), &mut counters).unwrap();
        assert!(outcome.converged);
        assert!((y[0] - 3.0).abs() < 1e-8);
        assert!(counters.component_calls > 1);
    }

    #[test]
    fn local_solve_blocked_by_a_bound_is_reported() {
        let mut b = GraphBuilder::new();
        b.add(
            "shift",
            ImplicitExpr::new(&[("x", "x + a")])
                .unwrap()
                .var(VarMeta::input("a").value(1.0))
                .unwrap()
                .var(VarMeta::output("x").lower(0.0))
                .unwrap(),
        );
        let g = b.build().unwrap();
        let mut y = [0.0];
        let mut counters = EvalCounters::default();
        let outcome = solve_component(
            &g,
            &g.nodes()[0],
            &[1.0],
            &mut y,
            &ConvergenceConfig::default(),
            &mut counters,
        )
        .unwrap();
        assert!(!outcome.converged);
        assert_eq!(y[0], 0.0);
        assert!((outcome.residual - 1.0).abs() < 1e-12);
    }

    #[test]
    fn explicit_residual_is_y_minus_f() {
        let mut b = GraphBuilder::new();
        b.add("c", mdo_components::ExprComponent::new(&["y = 2*x"]).unwrap());
        let g = b.build().unwrap();
        let r = residuals(&g.nodes()[0], &[3.0], &[5.0]).unwrap();
        assert_eq!(r, vec![-1.0]);
    }

    #[test]
    fn non_finite_outputs_are_rejected() {
        let mut b = GraphBuilder::new();
        b.add("c", mdo_components::ExprComponent::new(&["y = 1/x"]).unwrap());
        let g = b.build().unwrap();
        let mut y = [0.0];
        let err = compute(&g.nodes()[0], &[0.0], &mut y).unwrap_err();
        assert!(matches!(err, SolverError::Evaluation { .. }));
    }
}
