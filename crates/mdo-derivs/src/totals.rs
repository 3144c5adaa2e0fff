//! Total derivatives through the coupling graph.
//!
//! Every output of every relevant component is an unknown of the linear
//! system `A dY = -B dP`, with `A = dR/dY` and `B = dR/dP` assembled from
//! local partials. Regions are ordered topologically, so `A` is block lower
//! triangular: forward mode solves region by region, reverse mode runs the
//! adjoint sweep backwards. Explicit regions reduce to the chain rule;
//! coupled regions solve their diagonal block (implicit function theorem).

use std::ops::Range;

use mdo_core::{CompId, Timer, VarId, VarKind};
use mdo_components::DerivativeMethod;
use mdo_graph::Graph;
use mdo_solver::{LocalJacobian, RunContext, local_partials};
use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{DerivError, DerivResult};

/// Direction of the chain rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DerivMode {
    /// One linear solve per design-variable entry.
    Forward,
    /// One adjoint solve per response entry.
    Reverse,
    /// Forward when the design variables are no larger than the responses.
    #[default]
    Auto,
}

impl DerivMode {
    pub fn resolve(self, n_wrt: usize, n_of: usize) -> DerivMode {
        match self {
            DerivMode::Auto if n_wrt <= n_of => DerivMode::Forward,
            DerivMode::Auto => DerivMode::Reverse,
            m => m,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivOptions {
    pub mode: DerivMode,
    /// Compute local partials of different components concurrently.
    pub parallel: bool,
}

impl Default for DerivOptions {
    fn default() -> Self {
        Self {
            mode: DerivMode::Auto,
            parallel: true,
        }
    }
}

impl DerivOptions {
    pub fn with_mode(mode: DerivMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// Jacobian of responses `of` with respect to design variables `wrt`.
/// Rows follow the entries of `of`, columns the entries of `wrt`.
#[derive(Clone, Debug, PartialEq)]
pub struct TotalJacobian {
    of: Vec<VarId>,
    wrt: Vec<VarId>,
    of_offsets: Vec<usize>,
    wrt_offsets: Vec<usize>,
    matrix: DMatrix<f64>,
    mode: DerivMode,
}

pub(crate) fn offsets(graph: &Graph, vars: &[VarId]) -> (Vec<usize>, usize) {
    let mut offs = Vec::with_capacity(vars.len());
    let mut n = 0;
    for v in vars {
        offs.push(n);
        n += graph.var(*v).size();
    }
    (offs, n)
}

impl TotalJacobian {
    pub(crate) fn new(graph: &Graph, of: &[VarId], wrt: &[VarId], matrix: DMatrix<f64>, mode: DerivMode) -> Self {
        let (of_offsets, _) = offsets(graph, of);
        let (wrt_offsets, _) = offsets(graph, wrt);
        Self {
            of: of.to_vec(),
            wrt: wrt.to_vec(),
            of_offsets,
            wrt_offsets,
            matrix,
            mode,
        }
    }

    pub fn of(&self) -> &[VarId] {
        &self.of
    }

    pub fn wrt(&self) -> &[VarId] {
        &self.wrt
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.matrix
    }

    /// Mode actually used (never `Auto`).
    pub fn mode(&self) -> DerivMode {
        self.mode
    }

    fn range(ids: &[VarId], offs: &[usize], total: usize, id: VarId) -> Option<Range<usize>> {
        let i = ids.iter().position(|v| *v == id)?;
        let end = offs.get(i + 1).copied().unwrap_or(total);
        Some(offs[i]..end)
    }

    /// Rows of `of` in the matrix.
    pub fn of_range(&self, of: VarId) -> Option<Range<usize>> {
        Self::range(&self.of, &self.of_offsets, self.matrix.nrows(), of)
    }

    /// Columns of `wrt` in the matrix.
    pub fn wrt_range(&self, wrt: VarId) -> Option<Range<usize>> {
        Self::range(&self.wrt, &self.wrt_offsets, self.matrix.ncols(), wrt)
    }

    /// Block `d(of)/d(wrt)`.
    pub fn block(&self, of: VarId, wrt: VarId) -> Option<DMatrix<f64>> {
        let r = self.of_range(of)?;
        let c = self.wrt_range(wrt)?;
        Some(self.matrix.view((r.start, c.start), (r.len(), c.len())).into_owned())
    }

    /// First entry of `d(of)/d(wrt)`, for scalar variables.
    pub fn get(&self, of: VarId, wrt: VarId) -> Option<f64> {
        let r = self.of_range(of)?;
        let c = self.wrt_range(wrt)?;
        Some(self.matrix[(r.start, c.start)])
    }
}

/// Design variables must be distinct free inputs.
pub(crate) fn check_wrt(graph: &Graph, wrt: &[VarId]) -> DerivResult<()> {
    for (i, w) in wrt.iter().enumerate() {
        let var = graph.registry().get(*w).ok_or_else(|| DerivError::InvalidRequest {
            what: format!("unknown variable id {}", w.index()),
        })?;
        if !graph.is_free_input(*w) {
            return Err(DerivError::InvalidRequest {
                what: format!("'{}' is not a free input", var.path),
            });
        }
        if wrt[..i].contains(w) {
            return Err(DerivError::InvalidRequest {
                what: format!("'{}' requested twice", var.path),
            });
        }
    }
    Ok(())
}

/// Component whose outputs determine `of`, if any.
fn response_owner(graph: &Graph, of: VarId) -> Option<CompId> {
    let var = graph.var(of);
    match var.kind() {
        VarKind::Output => Some(var.comp),
        VarKind::Input => graph.source_of(of).map(|c| graph.var(c.src).comp),
    }
}

/// Reject requests where a design variable reaches a response through a
/// component without derivatives.
pub fn check_availability(graph: &Graph, wrt: &[VarId], of: &[VarId]) -> DerivResult<()> {
    let targets: Vec<CompId> = of.iter().filter_map(|o| response_owner(graph, *o)).collect();
    let reaching = graph.reaching(&targets);

    let mut components: Vec<String> = Vec::new();
    let mut blocked: Vec<String> = Vec::new();
    for w in wrt {
        let var = graph.var(*w);
        let reach = graph.reachable_from(&[var.comp]);
        let mut hit = false;
        for node in graph.nodes() {
            let i = node.id.idx();
            if reach[i] && reaching[i] && node.derivative_method() == DerivativeMethod::Unavailable {
                hit = true;
                if !components.contains(&node.name) {
                    components.push(node.name.clone());
                }
            }
        }
        if hit {
            blocked.push(var.path.clone());
        }
    }
    if blocked.is_empty() {
        Ok(())
    } else {
        Err(DerivError::Unavailable {
            components,
            wrt: blocked,
        })
    }
}

/// The linear system of the relevant part of the graph.
struct System {
    /// Per registry variable: offset among the unknowns.
    offset: Vec<Option<usize>>,
    /// Diagonal blocks in topological order, with member names for errors.
    blocks: Vec<(Range<usize>, String)>,
    comps: Vec<CompId>,
    size: usize,
}

impl System {
    fn new(graph: &Graph, relevant: &[bool]) -> Self {
        let mut offset = vec![None; graph.registry().vars().len()];
        let mut blocks = Vec::new();
        let mut comps = Vec::new();
        let mut size = 0;
        for region in graph.regions() {
            let start = size;
            let mut names = Vec::new();
            for &c in region.members.iter().filter(|c| relevant[c.idx()]) {
                for &vid in graph.registry().outputs_of(c) {
                    offset[vid.idx()] = Some(size);
                    size += graph.var(vid).size();
                }
                comps.push(c);
                names.push(graph.node(c).name.as_str());
            }
            if size > start {
                blocks.push((start..size, names.join(", ")));
            }
        }
        Self {
            offset,
            blocks,
            comps,
            size,
        }
    }
}

fn solve_block(a: DMatrix<f64>, rhs: &DMatrix<f64>, members: &str) -> DerivResult<DMatrix<f64>> {
    a.lu().solve(rhs).ok_or_else(|| DerivError::Singular {
        members: members.to_string(),
    })
}

/// Total derivatives of `of` with respect to the free inputs `wrt`, at the
/// values currently held by `ctx` (normally a converged evaluation).
pub fn derivatives(
    graph: &Graph,
    ctx: &mut RunContext,
    wrt: &[VarId],
    of: &[VarId],
    opts: &DerivOptions,
) -> DerivResult<TotalJacobian> {
    let timer = Timer::start();
    check_wrt(graph, wrt)?;
    check_availability(graph, wrt, of)?;

    let (wrt_offs, n_wrt) = offsets(graph, wrt);
    let (of_offs, n_of) = offsets(graph, of);
    let mode = opts.mode.resolve(n_wrt, n_of);

    let sources: Vec<CompId> = wrt.iter().map(|w| graph.var(*w).comp).collect();
    let targets: Vec<CompId> = of.iter().filter_map(|o| response_owner(graph, *o)).collect();
    let downstream = graph.reachable_from(&sources);
    let upstream = graph.reaching(&targets);
    let relevant: Vec<bool> = downstream.iter().zip(&upstream).map(|(a, b)| *a && *b).collect();
    let sys = System::new(graph, &relevant);

    // Local partials at the current point.
    let values = ctx.values().as_slice();
    let compute = |c: &CompId| -> DerivResult<LocalJacobian> {
        let (mut u, mut y) = (Vec::new(), Vec::new());
        graph.gather_inputs(*c, values, &mut u);
        graph.gather_outputs(*c, values, &mut y);
        Ok(local_partials(graph.node(*c), &u, &y, false)?)
    };
    let locals: Vec<LocalJacobian> = if opts.parallel {
        sys.comps.par_iter().map(compute).collect::<DerivResult<_>>()?
    } else {
        sys.comps.iter().map(compute).collect::<DerivResult<_>>()?
    };

    // A = dR/dY, B = dR/dP.
    let n = sys.size;
    let mut a = DMatrix::zeros(n, n);
    let mut b = DMatrix::zeros(n, n_wrt);
    for (c, local) in sys.comps.iter().zip(&locals) {
        let outputs = graph.registry().outputs_of(*c);
        let Some(row0) = outputs.first().and_then(|v| sys.offset[v.idx()]) else {
            continue;
        };
        let ny = local.dr_dy.nrows();
        a.view_mut((row0, row0), (ny, ny)).copy_from(&local.dr_dy);

        let mut col = 0;
        for &vid in graph.registry().inputs_of(*c) {
            let size = graph.var(vid).size();
            let dr_du = local.dr_du.columns(col, size);
            if let Some(conn) = graph.source_of(vid) {
                if let Some(src) = sys.offset[conn.src.idx()] {
                    let mut target = a.view_mut((row0, src), (ny, size));
                    target += dr_du * conn.conv.scale;
                }
            } else if let Some(k) = wrt.iter().position(|w| *w == vid) {
                let mut target = b.view_mut((row0, wrt_offs[k]), (ny, size));
                target += dr_du;
            }
            col += size;
        }
    }

    // Response selection: J = C dY/dP + D.
    let mut c_sel = DMatrix::zeros(n_of, n);
    let mut d = DMatrix::zeros(n_of, n_wrt);
    for (i, o) in of.iter().enumerate() {
        let size = graph.var(*o).size();
        let row = of_offs[i];
        match graph.var(*o).kind() {
            VarKind::Output => {
                if let Some(off) = sys.offset[o.idx()] {
                    c_sel.view_mut((row, off), (size, size)).fill_diagonal(1.0);
                }
            }
            VarKind::Input => match graph.source_of(*o) {
                Some(conn) => {
                    if let Some(off) = sys.offset[conn.src.idx()] {
                        c_sel
                            .view_mut((row, off), (size, size))
                            .fill_diagonal(conn.conv.scale);
                    }
                }
                None => {
                    if let Some(k) = wrt.iter().position(|w| w == o) {
                        d.view_mut((row, wrt_offs[k]), (size, size)).fill_diagonal(1.0);
                    }
                }
            },
        }
    }

    let jac = match mode {
        DerivMode::Forward | DerivMode::Auto => {
            let mut x = DMatrix::zeros(n, n_wrt);
            for (r, members) in &sys.blocks {
                let len = r.len();
                let mut rhs = -b.rows(r.start, len);
                if r.start > 0 {
                    rhs -= a.view((r.start, 0), (len, r.start)) * x.rows(0, r.start);
                }
                let diag = a.view((r.start, r.start), (len, len)).into_owned();
                let sol = solve_block(diag, &rhs, members)?;
                x.rows_mut(r.start, len).copy_from(&sol);
            }
            &c_sel * x + d
        }
        DerivMode::Reverse => {
            let mut lambda = DMatrix::zeros(n, n_of);
            for (r, members) in sys.blocks.iter().rev() {
                let len = r.len();
                let mut rhs = c_sel.columns(r.start, len).transpose();
                let tail = n - r.end;
                if tail > 0 {
                    rhs -= a.view((r.end, r.start), (tail, len)).transpose() * lambda.rows(r.end, tail);
                }
                let diag = a.view((r.start, r.start), (len, len)).transpose();
                let sol = solve_block(diag, &rhs, members)?;
                lambda.rows_mut(r.start, len).copy_from(&sol);
            }
            -(lambda.transpose() * &b) + d
        }
    };

    ctx.counters.partials += locals.len() as u64;
    let elapsed = timer.stop_into(&ctx.timings.derivatives);
    debug!(
        mode = ?mode,
        wrt = n_wrt,
        of = n_of,
        unknowns = n,
        blocks = sys.blocks.len(),
        elapsed_s = elapsed,
        "total derivatives computed"
    );
    Ok(TotalJacobian::new(graph, of, wrt, jac, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdo_components::ExprComponent;
    use mdo_graph::GraphBuilder;
    use mdo_solver::{EvaluateOptions, evaluate};

    fn chain() -> Graph {
        let mut b = GraphBuilder::new();
        b.add("a", ExprComponent::new(&["y = x**2"]).unwrap());
        b.add("b", ExprComponent::new(&["z = 3*y + w"]).unwrap());
        b.connect("a.y", "b.y");
        b.build().unwrap()
    }

    #[test]
    fn mode_resolution() {
        assert_eq!(DerivMode::Auto.resolve(2, 3), DerivMode::Forward);
        assert_eq!(DerivMode::Auto.resolve(3, 3), DerivMode::Forward);
        assert_eq!(DerivMode::Auto.resolve(4, 3), DerivMode::Reverse);
        assert_eq!(DerivMode::Reverse.resolve(1, 9), DerivMode::Reverse);
    }

    #[test]
    fn chain_rule_through_explicit_regions() {
        let g = chain();
        let mut ctx = RunContext::new(&g);
        ctx.set_path(&g, "a.x", &[2.0]).unwrap();
        evaluate(&g, &mut ctx, &EvaluateOptions::default()).unwrap();

        let x = g.resolve("a.x").unwrap();
        let w = g.resolve("b.w").unwrap();
        let z = g.resolve("b.z").unwrap();
        for mode in [DerivMode::Forward, DerivMode::Reverse] {
            let jac = derivatives(&g, &mut ctx, &[x, w], &[z], &DerivOptions::with_mode(mode)).unwrap();
            assert_eq!(jac.mode(), mode);
            assert!((jac.get(z, x).unwrap() - 12.0).abs() < 1e-10);
            assert!((jac.get(z, w).unwrap() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn design_variable_as_response_is_identity() {
        let g = chain();
        let mut ctx = RunContext::new(&g);
        let x = g.resolve("a.x").unwrap();
        let w = g.resolve("b.w").unwrap();
        let jac = derivatives(&g, &mut ctx, &[x], &[x, w], &DerivOptions::default()).unwrap();
        assert_eq!(jac.get(x, x), Some(1.0));
        assert_eq!(jac.get(w, x), Some(0.0));
    }

    #[test]
    fn connected_input_is_not_a_design_variable() {
        let g = chain();
        let mut ctx = RunContext::new(&g);
        let y_in = g.resolve("b.y").unwrap();
        let z = g.resolve("b.z").unwrap();
        assert!(matches!(
            derivatives(&g, &mut ctx, &[y_in], &[z], &DerivOptions::default()),
            Err(DerivError::InvalidRequest { .. })
        ));
    }
}
