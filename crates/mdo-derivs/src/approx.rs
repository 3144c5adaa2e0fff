//! Whole-model finite-difference totals.

use mdo_components::{FdForm, FdOptions, common::relative_step};
use mdo_core::VarId;
use mdo_graph::Graph;
use mdo_solver::{EvaluateOptions, RunContext, evaluate_strict};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::error::DerivResult;
use crate::totals::{DerivMode, TotalJacobian, check_wrt, offsets};

fn responses(graph: &Graph, ctx: &RunContext, of: &[VarId]) -> DVector<f64> {
    let mut out = Vec::new();
    for o in of {
        out.extend_from_slice(ctx.value(graph, *o));
    }
    DVector::from_vec(out)
}

/// Run a perturbed copy of `ctx` with entry `entry` of `wrt` shifted by `dx`.
fn perturbed(
    graph: &Graph,
    ctx: &RunContext,
    wrt: VarId,
    entry: usize,
    dx: f64,
    of: &[VarId],
    eval: &EvaluateOptions,
) -> DerivResult<DVector<f64>> {
    let mut copy = ctx.fork();
    let range = graph.var(wrt).range();
    copy.values_mut().as_mut_slice()[range.start + entry] += dx;
    evaluate_strict(graph, &mut copy, eval)?;
    Ok(responses(graph, &copy, of))
}

/// Totals by re-evaluating the whole graph around the current point.
///
/// Each perturbed column runs on its own copy of the run context, starting
/// from the current (converged) values, and columns run in parallel.
/// Useful to validate [`derivatives`](crate::derivatives) and for models
/// where local partials are unavailable.
pub fn approx_totals(
    graph: &Graph,
    ctx: &RunContext,
    wrt: &[VarId],
    of: &[VarId],
    fd: &FdOptions,
    eval: &EvaluateOptions,
) -> DerivResult<TotalJacobian> {
    check_wrt(graph, wrt)?;

    let mut base_ctx = ctx.fork();
    evaluate_strict(graph, &mut base_ctx, eval)?;
    let base = responses(graph, &base_ctx, of);

    let columns: Vec<(VarId, usize)> = wrt
        .iter()
        .flat_map(|w| (0..graph.var(*w).size()).map(move |e| (*w, e)))
        .collect();

    let derivs = columns
        .par_iter()
        .map(|&(w, e)| {
            let x = base_ctx.value(graph, w)[e];
            let dx = relative_step(fd.step, x);
            match fd.form {
                FdForm::Forward => {
                    Ok((perturbed(graph, &base_ctx, w, e, dx, of, eval)? - &base) / dx)
                }
                FdForm::Backward => {
                    Ok((&base - perturbed(graph, &base_ctx, w, e, -dx, of, eval)?) / dx)
                }
                FdForm::Central => {
                    let plus = perturbed(graph, &base_ctx, w, e, dx, of, eval)?;
                    let minus = perturbed(graph, &base_ctx, w, e, -dx, of, eval)?;
                    Ok((plus - minus) / (2.0 * dx))
                }
            }
        })
        .collect::<DerivResult<Vec<DVector<f64>>>>()?;

    let (_, n_of) = offsets(graph, of);
    let mut matrix = DMatrix::zeros(n_of, columns.len());
    for (j, col) in derivs.iter().enumerate() {
        matrix.set_column(j, col);
    }
    debug!(columns = columns.len(), of = n_of, "approximated totals");
    Ok(TotalJacobian::new(graph, of, wrt, matrix, DerivMode::Forward))
}
