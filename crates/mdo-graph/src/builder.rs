//! Incremental graph builder.

use mdo_components::{Component, ComponentLayout, Declarations};
use mdo_core::{CompId, ComponentVars, ConvergenceConfig, VarRegistry};
use tracing::{debug, warn};

use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, Node};
use crate::topology;
use crate::validate;

/// Builder for constructing a graph incrementally.
///
/// Use `add_component` and `connect` to describe the model, then call
/// `build()` to validate and freeze it into an immutable `Graph`. The
/// builder is consumed, so a failed build leaves nothing half-constructed.
#[derive(Default)]
pub struct GraphBuilder {
    components: Vec<(String, Box<dyn Component>)>,
    connections: Vec<(String, String)>,
    default_solver: ConvergenceConfig,
    cycle_solvers: Vec<(String, ConvergenceConfig)>,
}

impl GraphBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component and return its ID. Names must be unique.
    pub fn add_component(&mut self, name: impl Into<String>, component: Box<dyn Component>) -> CompId {
        let id = CompId::from_usize(self.components.len());
        self.components.push((name.into(), component));
        id
    }

    /// Convenience wrapper boxing `component`.
    pub fn add(&mut self, name: impl Into<String>, component: impl Component + 'static) -> CompId {
        self.add_component(name, Box::new(component))
    }

    /// Connect an output `comp.var` to an input `comp.var`.
    pub fn connect(&mut self, src: impl Into<String>, dst: impl Into<String>) -> &mut Self {
        self.connections.push((src.into(), dst.into()));
        self
    }

    /// Fan one output out to several inputs.
    pub fn connect_many<S: AsRef<str>>(&mut self, src: &str, dsts: &[S]) -> &mut Self {
        for d in dsts {
            self.connect(src, d.as_ref());
        }
        self
    }

    /// Convergence configuration for every coupled region without an override.
    pub fn default_solver(&mut self, config: ConvergenceConfig) -> &mut Self {
        self.default_solver = config;
        self
    }

    /// Override the configuration of the coupled region containing `member`.
    pub fn cycle_solver(&mut self, member: impl Into<String>, config: ConvergenceConfig) -> &mut Self {
        self.cycle_solvers.push((member.into(), config));
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> GraphResult<Graph> {
        // Unique names.
        for (i, (name, _)) in self.components.iter().enumerate() {
            if self.components[..i].iter().any(|(n, _)| n == name) {
                return Err(GraphError::DuplicateComponent { name: name.clone() });
            }
        }

        // Declarations and local layouts.
        let mut decls = Vec::with_capacity(self.components.len());
        let mut layouts = Vec::with_capacity(self.components.len());
        for (name, comp) in &self.components {
            let mut decl = Declarations::new();
            comp.declare(&mut decl);
            let layout = ComponentLayout::new(&decl, comp.kind())
                .map_err(|e| GraphError::declaration(name, e))?;
            if layout.outputs().is_empty() {
                return Err(GraphError::Declaration {
                    comp: name.clone(),
                    reason: "component declares no outputs".to_string(),
                });
            }
            decls.push(decl);
            layouts.push(layout);
        }

        let registry = VarRegistry::build(self.components.iter().zip(&decls).map(
            |((name, _), decl)| ComponentVars {
                name,
                inputs: decl.inputs(),
                outputs: decl.outputs(),
            },
        ))?;

        // Connections.
        let connections = self
            .connections
            .iter()
            .map(|(s, d)| validate::validate_connection(&registry, s, d))
            .collect::<GraphResult<Vec<_>>>()?;
        let source_of = validate::validate_single_source(&registry, &connections)?;
        let targets_of = validate::fan_out(&registry, &connections);

        // Solver configurations.
        self.default_solver
            .validate()
            .map_err(|e| GraphError::InvalidSolverConfig {
                region: "default".to_string(),
                reason: e.to_string(),
            })?;

        let kinds: Vec<_> = layouts.iter().map(|l| l.kind()).collect();
        let edges: Vec<(CompId, CompId)> = connections
            .iter()
            .map(|c| {
                (
                    validate::var_owner(&registry, c.src),
                    validate::var_owner(&registry, c.dst),
                )
            })
            .collect();
        let mut topo = topology::analyse(&kinds, &edges, self.default_solver);

        for (member, config) in &self.cycle_solvers {
            let comp = self
                .components
                .iter()
                .position(|(n, _)| n == member)
                .map(CompId::from_usize)
                .ok_or_else(|| GraphError::UnknownComponent {
                    name: member.clone(),
                })?;
            config.validate().map_err(|e| GraphError::InvalidSolverConfig {
                region: format!("region of '{member}'"),
                reason: e.to_string(),
            })?;
            let region = &mut topo.regions[topo.region_of[comp.idx()].idx()];
            if !region.is_coupled() {
                warn!(
                    component = member.as_str(),
                    "solver override on a component outside any coupled region is ignored"
                );
                continue;
            }
            region.config = *config;
        }

        let nodes: Vec<Node> = self
            .components
            .into_iter()
            .zip(layouts)
            .enumerate()
            .map(|(i, ((name, component), layout))| Node {
                id: CompId::from_usize(i),
                name,
                component,
                layout,
            })
            .collect();

        debug!(
            components = nodes.len(),
            connections = connections.len(),
            regions = topo.regions.len(),
            coupled = topo.regions.iter().filter(|r| r.is_coupled()).count(),
            levels = topo.levels.len(),
            "graph built"
        );

        Ok(Graph {
            nodes,
            registry,
            connections,
            source_of,
            targets_of,
            regions: topo.regions,
            region_of: topo.region_of,
            levels: topo.levels,
            order: topo.order,
            succ: topo.succ,
            pred: topo.pred,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdo_components::ExprComponent;

    fn expr(eqs: &[&str]) -> Box<dyn Component> {
        Box::new(ExprComponent::new(eqs).unwrap())
    }

    #[test]
    fn builder_basic() {
        let mut b = GraphBuilder::new();
        let a = b.add_component("a", expr(&["y = 2*x"]));
        let c = b.add_component("c", expr(&["z = y + 1"]));
        b.connect("a.y", "c.y");
        assert_eq!(a.index(), 0);
        assert_eq!(c.index(), 1);

        let g = b.build().unwrap();
        assert_eq!(g.component_count(), 2);
        assert_eq!(g.connections().len(), 1);
        assert_eq!(g.topological_order(), &[a, c]);
        assert!(g.is_free_input(g.resolve("a.x").unwrap()));
        assert!(!g.is_free_input(g.resolve("c.y").unwrap()));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut b = GraphBuilder::new();
        b.add_component("a", expr(&["y = x"]));
        b.add_component("a", expr(&["z = x"]));
        assert!(matches!(
            b.build(),
            Err(GraphError::DuplicateComponent { .. })
        ));
    }

    #[test]
    fn unknown_override_rejected() {
        let mut b = GraphBuilder::new();
        b.add_component("a", expr(&["y = x"]));
        b.cycle_solver("ghost", ConvergenceConfig::newton());
        assert!(matches!(b.build(), Err(GraphError::UnknownComponent { .. })));
    }

    #[test]
    fn override_applies_to_whole_region() {
        let mut b = GraphBuilder::new();
        b.add_component("a", expr(&["a_out = b_in + 1"]));
        b.add_component("b", expr(&["b_out = 0.5*a_in"]));
        b.connect("a.a_out", "b.a_in").connect("b.b_out", "a.b_in");
        b.cycle_solver("b", ConvergenceConfig::newton());
        let g = b.build().unwrap();
        assert_eq!(g.regions().len(), 1);
        assert_eq!(g.regions()[0].config, ConvergenceConfig::newton());
    }
}
