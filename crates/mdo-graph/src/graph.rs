//! Core graph data structures.

use mdo_components::{Component, ComponentKind, ComponentLayout, DerivativeMethod};
use mdo_core::{CompId, ConvergenceConfig, Conversion, RegionId, VarId, VarInfo, VarRegistry};

/// A component instance registered in the graph.
pub struct Node {
    pub id: CompId,
    pub name: String,
    pub component: Box<dyn Component>,
    pub layout: ComponentLayout,
}

impl Node {
    pub fn kind(&self) -> ComponentKind {
        self.layout.kind()
    }

    pub fn derivative_method(&self) -> DerivativeMethod {
        self.component.derivative_method()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.layout.kind())
            .finish()
    }
}

/// A validated output -> input edge with its unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub src: VarId,
    pub dst: VarId,
    pub conv: Conversion,
}

/// How a region is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// A single explicit component outside any cycle: evaluated once.
    Explicit,
    /// A strongly-connected set of components, or an implicit component:
    /// resolved iteratively by a convergence solver.
    Coupled,
}

/// Unit of execution in topological order.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    /// Members in declaration order.
    pub members: Vec<CompId>,
    pub config: ConvergenceConfig,
    pub level: usize,
}

impl Region {
    pub fn is_coupled(&self) -> bool {
        self.kind == RegionKind::Coupled
    }
}

/// The graph: a validated, immutable set of components, connections and
/// execution regions.
///
/// Regions are stored in topological order; `levels` groups regions with no
/// data dependency between them so they can run concurrently.
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) registry: VarRegistry,
    pub(crate) connections: Vec<Connection>,
    /// Per variable: index of the connection feeding it (inputs only).
    pub(crate) source_of: Vec<Option<usize>>,
    /// Per variable: connections leaving it (outputs only).
    pub(crate) targets_of: Vec<Vec<usize>>,
    pub(crate) regions: Vec<Region>,
    pub(crate) region_of: Vec<RegionId>,
    pub(crate) levels: Vec<Vec<RegionId>>,
    pub(crate) order: Vec<CompId>,
    pub(crate) succ: Vec<Vec<CompId>>,
    pub(crate) pred: Vec<Vec<CompId>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("connections", &self.connections.len())
            .field("regions", &self.regions)
            .finish()
    }
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: CompId) -> &Node {
        &self.nodes[id.idx()]
    }

    pub fn component_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find_component(&self, name: &str) -> Option<CompId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn registry(&self) -> &VarRegistry {
        &self.registry
    }

    pub fn var(&self, id: VarId) -> &VarInfo {
        self.registry.var(id)
    }

    pub fn resolve(&self, path: &str) -> mdo_core::MdoResult<VarId> {
        self.registry.resolve(path)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connection feeding an input, if any.
    pub fn source_of(&self, input: VarId) -> Option<&Connection> {
        self.source_of[input.idx()].map(|c| &self.connections[c])
    }

    /// Connections leaving an output.
    pub fn targets_of(&self, output: VarId) -> impl Iterator<Item = &Connection> {
        self.targets_of[output.idx()]
            .iter()
            .map(|c| &self.connections[*c])
    }

    /// An input with no incoming connection; its value comes from the run context.
    pub fn is_free_input(&self, var: VarId) -> bool {
        self.registry.var(var).kind() == mdo_core::VarKind::Input
            && self.source_of[var.idx()].is_none()
    }

    pub fn free_inputs(&self) -> impl Iterator<Item = &VarInfo> {
        self.registry
            .vars()
            .iter()
            .filter(|v| self.is_free_input(v.id))
    }

    /// Regions in topological order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.idx()]
    }

    pub fn region_of(&self, comp: CompId) -> RegionId {
        self.region_of[comp.idx()]
    }

    /// Groups of regions without mutual data dependency, in execution order.
    pub fn levels(&self) -> &[Vec<RegionId>] {
        &self.levels
    }

    /// Component execution sequence, computed once at build time.
    pub fn topological_order(&self) -> &[CompId] {
        &self.order
    }

    /// Components fed directly by `comp`.
    pub fn successors(&self, comp: CompId) -> &[CompId] {
        &self.succ[comp.idx()]
    }

    /// Components feeding `comp` directly.
    pub fn predecessors(&self, comp: CompId) -> &[CompId] {
        &self.pred[comp.idx()]
    }

    /// Mask of components reachable from any of `from` (inclusive).
    pub fn reachable_from(&self, from: &[CompId]) -> Vec<bool> {
        self.flood(from, &self.succ)
    }

    /// Mask of components from which any of `to` is reachable (inclusive).
    pub fn reaching(&self, to: &[CompId]) -> Vec<bool> {
        self.flood(to, &self.pred)
    }

    /// Components downstream of `comp`, itself included, in topological order.
    pub fn downstream(&self, comp: CompId) -> Vec<CompId> {
        let mask = self.reachable_from(&[comp]);
        self.order.iter().copied().filter(|c| mask[c.idx()]).collect()
    }

    /// Components upstream of `comp`, itself included, in topological order.
    pub fn upstream(&self, comp: CompId) -> Vec<CompId> {
        let mask = self.reaching(&[comp]);
        self.order.iter().copied().filter(|c| mask[c.idx()]).collect()
    }

    fn flood(&self, seeds: &[CompId], adj: &[Vec<CompId>]) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<CompId> = seeds.to_vec();
        while let Some(c) = stack.pop() {
            if std::mem::replace(&mut seen[c.idx()], true) {
                continue;
            }
            stack.extend(adj[c.idx()].iter().copied().filter(|n| !seen[n.idx()]));
        }
        seen
    }

    /// Gather a component's inputs into `buf` (local layout order), pulling
    /// connected inputs from their sources with unit conversion.
    pub fn gather_inputs(&self, comp: CompId, values: &[f64], buf: &mut Vec<f64>) {
        buf.clear();
        for &vid in self.registry.inputs_of(comp) {
            let var = self.registry.var(vid);
            match self.source_of[vid.idx()] {
                Some(c) => {
                    let conn = &self.connections[c];
                    let src = self.registry.var(conn.src);
                    buf.extend(values[src.range()].iter().map(|v| conn.conv.apply(*v)));
                }
                None => buf.extend_from_slice(&values[var.range()]),
            }
        }
    }

    /// Copy a component's local outputs back into the flat value vector.
    pub fn scatter_outputs(&self, comp: CompId, local: &[f64], values: &mut [f64]) {
        let mut off = 0;
        for &vid in self.registry.outputs_of(comp) {
            let var = self.registry.var(vid);
            let n = var.size();
            values[var.range()].copy_from_slice(&local[off..off + n]);
            off += n;
        }
    }

    /// Copy gathered local inputs back, so connected inputs show what the
    /// component actually saw.
    pub fn scatter_inputs(&self, comp: CompId, local: &[f64], values: &mut [f64]) {
        let mut off = 0;
        for &vid in self.registry.inputs_of(comp) {
            let var = self.registry.var(vid);
            let n = var.size();
            values[var.range()].copy_from_slice(&local[off..off + n]);
            off += n;
        }
    }

    /// A component's outputs, gathered in local layout order.
    pub fn gather_outputs(&self, comp: CompId, values: &[f64], buf: &mut Vec<f64>) {
        buf.clear();
        for &vid in self.registry.outputs_of(comp) {
            buf.extend_from_slice(&values[self.registry.var(vid).range()]);
        }
    }
}
