//! Strongly-connected regions, topological order and levels.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use mdo_components::ComponentKind;
use mdo_core::{CompId, ConvergenceConfig, RegionId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::{Region, RegionKind};

/// Result of the structural analysis of the component dependency graph.
#[derive(Debug)]
pub(crate) struct Topology {
    pub regions: Vec<Region>,
    pub region_of: Vec<RegionId>,
    pub levels: Vec<Vec<RegionId>>,
    pub order: Vec<CompId>,
    pub succ: Vec<Vec<CompId>>,
    pub pred: Vec<Vec<CompId>>,
}

/// Analyse `n` components linked by the directed `edges` (source component,
/// destination component).
///
/// Regions are sorted topologically; ties are broken by the lowest
/// declaration index among a region's members so the order is stable.
pub(crate) fn analyse(
    kinds: &[ComponentKind],
    edges: &[(CompId, CompId)],
    default_config: ConvergenceConfig,
) -> Topology {
    let n = kinds.len();
    let mut dg: DiGraph<(), ()> = DiGraph::with_capacity(n, edges.len());
    let idx: Vec<NodeIndex> = (0..n).map(|_| dg.add_node(())).collect();

    let mut succ: Vec<Vec<CompId>> = vec![Vec::new(); n];
    let mut pred: Vec<Vec<CompId>> = vec![Vec::new(); n];
    let mut self_loop = vec![false; n];
    for &(s, d) in edges {
        if succ[s.idx()].contains(&d) {
            continue;
        }
        succ[s.idx()].push(d);
        pred[d.idx()].push(s);
        if s == d {
            self_loop[s.idx()] = true;
        }
        dg.add_edge(idx[s.idx()], idx[d.idx()], ());
    }
    for list in succ.iter_mut().chain(pred.iter_mut()) {
        list.sort();
    }

    // Strongly-connected components, members sorted by declaration order.
    let mut sccs: Vec<Vec<CompId>> = tarjan_scc(&dg)
        .into_iter()
        .map(|scc| {
            let mut members: Vec<CompId> = scc
                .into_iter()
                .map(|ni| CompId::from_usize(ni.index()))
                .collect();
            members.sort();
            members
        })
        .collect();
    sccs.sort_by_key(|m| m[0]);

    let mut scc_of = vec![0usize; n];
    for (si, members) in sccs.iter().enumerate() {
        for c in members {
            scc_of[c.idx()] = si;
        }
    }

    // Condensed DAG.
    let m = sccs.len();
    let mut dag_succ: Vec<Vec<usize>> = vec![Vec::new(); m];
    let mut indegree = vec![0usize; m];
    for &(s, d) in edges {
        let (a, b) = (scc_of[s.idx()], scc_of[d.idx()]);
        if a != b && !dag_succ[a].contains(&b) {
            dag_succ[a].push(b);
            indegree[b] += 1;
        }
    }

    // Kahn's algorithm with a min-heap on the first member's declaration index.
    let mut heap: BinaryHeap<Reverse<(CompId, usize)>> = BinaryHeap::new();
    for (si, deg) in indegree.iter().enumerate() {
        if *deg == 0 {
            heap.push(Reverse((sccs[si][0], si)));
        }
    }
    let mut topo: Vec<usize> = Vec::with_capacity(m);
    while let Some(Reverse((_, si))) = heap.pop() {
        topo.push(si);
        for &next in &dag_succ[si] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                heap.push(Reverse((sccs[next][0], next)));
            }
        }
    }
    debug_assert_eq!(topo.len(), m, "condensation must be acyclic");

    // Levels: longest path from a source region.
    let mut level_of_scc = vec![0usize; m];
    for &si in &topo {
        for &next in &dag_succ[si] {
            level_of_scc[next] = level_of_scc[next].max(level_of_scc[si] + 1);
        }
    }

    let mut regions = Vec::with_capacity(m);
    let mut region_of = vec![RegionId::from_index(0); n];
    let mut levels: Vec<Vec<RegionId>> = Vec::new();
    let mut order = Vec::with_capacity(n);
    for (ri, &si) in topo.iter().enumerate() {
        let id = RegionId::from_usize(ri);
        let members = sccs[si].clone();
        let coupled = members.len() > 1
            || self_loop[members[0].idx()]
            || kinds[members[0].idx()] == ComponentKind::Implicit;
        for c in &members {
            region_of[c.idx()] = id;
        }
        order.extend(members.iter().copied());

        let level = level_of_scc[si];
        if levels.len() <= level {
            levels.resize(level + 1, Vec::new());
        }
        levels[level].push(id);

        regions.push(Region {
            id,
            kind: if coupled {
                RegionKind::Coupled
            } else {
                RegionKind::Explicit
            },
            members,
            config: default_config,
            level,
        });
    }

    Topology {
        regions,
        region_of,
        levels,
        order,
        succ,
        pred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(i: usize) -> CompId {
        CompId::from_usize(i)
    }

    #[test]
    fn chain_is_ordered_with_one_region_per_component() {
        let kinds = vec![ComponentKind::Explicit; 3];
        // declared in reverse dependency order: 2 -> 1 -> 0
        let topo = analyse(&kinds, &[(c(2), c(1)), (c(1), c(0))], ConvergenceConfig::default());
        assert_eq!(topo.order, vec![c(2), c(1), c(0)]);
        assert_eq!(topo.regions.len(), 3);
        assert!(topo.regions.iter().all(|r| r.kind == RegionKind::Explicit));
        assert_eq!(topo.levels.len(), 3);
    }

    #[test]
    fn cycle_becomes_one_coupled_region() {
        let kinds = vec![ComponentKind::Explicit; 4];
        let edges = [(c(0), c(1)), (c(1), c(2)), (c(2), c(1)), (c(2), c(3))];
        let topo = analyse(&kinds, &edges, ConvergenceConfig::default());
        assert_eq!(topo.regions.len(), 3);
        let coupled = &topo.regions[1];
        assert_eq!(coupled.kind, RegionKind::Coupled);
        assert_eq!(coupled.members, vec![c(1), c(2)]);
        assert_eq!(topo.region_of[2], coupled.id);
        assert_eq!(topo.order, vec![c(0), c(1), c(2), c(3)]);
    }

    #[test]
    fn independent_components_share_a_level_in_declaration_order() {
        let kinds = vec![ComponentKind::Explicit; 3];
        let edges = [(c(0), c(2)), (c(1), c(2))];
        let topo = analyse(&kinds, &edges, ConvergenceConfig::default());
        assert_eq!(topo.levels[0].len(), 2);
        assert_eq!(topo.order, vec![c(0), c(1), c(2)]);
        assert_eq!(topo.regions[2].level, 1);
    }

    #[test]
    fn implicit_and_self_loops_are_coupled() {
        let kinds = vec![ComponentKind::Implicit, ComponentKind::Explicit];
        let topo = analyse(&kinds, &[(c(1), c(1))], ConvergenceConfig::default());
        assert!(topo.regions.iter().all(|r| r.kind == RegionKind::Coupled));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn order_respects_edges_between_regions(
            raw in prop::collection::vec((0usize..8, 0usize..8), 0..20)
        ) {
            let kinds = vec![ComponentKind::Explicit; 8];
            let edges: Vec<(CompId, CompId)> = raw
                .iter()
                .map(|(a, b)| (CompId::from_usize(*a), CompId::from_usize(*b)))
                .collect();
            let topo = analyse(&kinds, &edges, ConvergenceConfig::default());

            prop_assert_eq!(topo.order.len(), 8);
            let pos = |c: CompId| topo.order.iter().position(|x| *x == c).unwrap();
            for (s, d) in &edges {
                let (rs, rd) = (topo.region_of[s.idx()], topo.region_of[d.idx()]);
                if rs != rd {
                    prop_assert!(pos(*s) < pos(*d));
                    prop_assert!(topo.regions[rs.idx()].level < topo.regions[rd.idx()].level);
                }
            }
        }
    }
}
