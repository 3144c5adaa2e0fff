//! mdo-graph: coupling-graph layer.
//!
//! Provides:
//! - Incremental graph builder with connection validation (shapes, units,
//!   direction, single source per input)
//! - Strongly-connected region detection and stable topological ordering
//! - Levels of mutually independent regions for parallel execution
//! - Reachability queries for the derivative layer
//!
//! Execution lives in `mdo-solver`; the graph is topology and data routing only.
//!
//! # Example
//!
//! ```
//! use mdo_components::ExprComponent;
//! use mdo_graph::GraphBuilder;
//!
//! let mut builder = GraphBuilder::new();
//! builder.add("rotor", ExprComponent::new(&["thrust = 0.5*area"]).unwrap());
//! builder.add("tower", ExprComponent::new(&["moment = 90*thrust"]).unwrap());
//! builder.connect("rotor.thrust", "tower.thrust");
//! let graph = builder.build().unwrap();
//!
//! assert_eq!(graph.component_count(), 2);
//! assert_eq!(graph.regions().len(), 2);
//! ```

pub mod builder;
pub mod error;
pub mod graph;
pub(crate) mod topology;
pub(crate) mod validate;

// Re-exports for ergonomics
pub use builder::GraphBuilder;
pub use error::{GraphError, GraphResult};
pub use graph::{Connection, Graph, Node, Region, RegionKind};
