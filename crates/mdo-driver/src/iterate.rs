//! Accepted iterates and the run history.

use mdo_core::Values;
use mdo_graph::Graph;
use nalgebra::{DMatrix, DVector};

/// Warnings attached to an accepted iterate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterateFlags {
    /// Coupled regions that did not converge (accepted because the driver
    /// was told to keep unconverged candidates).
    pub unconverged: Vec<String>,
    /// Design variables held without derivatives.
    pub frozen: Vec<String>,
}

impl IterateFlags {
    pub fn is_clean(&self) -> bool {
        self.unconverged.is_empty() && self.frozen.is_empty()
    }
}

/// Immutable snapshot of one accepted design.
#[derive(Clone, Debug)]
pub struct Iterate {
    /// Position in the history; the starting point is 0.
    pub index: usize,
    /// Graph evaluations performed when this iterate was produced.
    pub evaluation: u64,
    pub elapsed_s: f64,
    /// Flat design vector in the variables' own units.
    pub design: Vec<f64>,
    pub objective: f64,
    /// One value per constraint entry, in declaration order.
    pub constraints: Vec<f64>,
    /// Largest scaled constraint violation.
    pub max_violation: f64,
    pub merit: f64,
    pub values: Values,
    /// Scaled objective gradient, when the algorithm asked for one.
    pub gradient: Option<DVector<f64>>,
    /// Scaled constraint Jacobian, inequalities then equalities.
    pub constraint_jacobian: Option<DMatrix<f64>>,
    pub flags: IterateFlags,
}

impl Iterate {
    /// Value of `comp.var` at this iterate.
    pub fn value(&self, graph: &Graph, path: &str) -> Option<&[f64]> {
        let id = graph.resolve(path).ok()?;
        Some(self.values.get(graph.var(id)))
    }

    pub fn is_feasible(&self, ctol: f64) -> bool {
        self.max_violation <= ctol
    }
}

/// Ordered, append-only list of accepted iterates.
///
/// Merits are all scored by the algorithm's latest merit function, so they
/// stay comparable when a penalty weight grows during the run.
#[derive(Clone, Debug, Default)]
pub struct History {
    iterates: Vec<Iterate>,
}

impl History {
    pub(crate) fn push(&mut self, iterate: Iterate) {
        self.iterates.push(iterate);
    }

    pub(crate) fn rebase_merits(&mut self, merits: &[f64]) {
        for (it, m) in self.iterates.iter_mut().zip(merits) {
            it.merit = *m;
        }
    }

    pub fn len(&self) -> usize {
        self.iterates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Iterate> {
        self.iterates.iter()
    }

    pub fn as_slice(&self) -> &[Iterate] {
        &self.iterates
    }

    pub fn get(&self, index: usize) -> Option<&Iterate> {
        self.iterates.get(index)
    }

    pub fn last(&self) -> Option<&Iterate> {
        self.iterates.last()
    }

    /// Lowest merit; the latest one on ties.
    pub fn best(&self) -> Option<&Iterate> {
        self.iterates
            .iter()
            .rev()
            .min_by(|a, b| a.merit.total_cmp(&b.merit))
    }

    pub fn objectives(&self) -> Vec<f64> {
        self.iterates.iter().map(|i| i.objective).collect()
    }

    pub fn merits(&self) -> Vec<f64> {
        self.iterates.iter().map(|i| i.merit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iterate(index: usize, merit: f64) -> Iterate {
        Iterate {
            index,
            evaluation: index as u64,
            elapsed_s: 0.0,
            design: vec![index as f64],
            objective: merit,
            constraints: Vec::new(),
            max_violation: 0.0,
            merit,
            values: Values::zeros(1),
            gradient: None,
            constraint_jacobian: None,
            flags: IterateFlags::default(),
        }
    }

    #[test]
    fn best_prefers_latest_on_ties() {
        let mut h = History::default();
        h.push(iterate(0, 3.0));
        h.push(iterate(1, 1.0));
        h.push(iterate(2, 1.0));
        assert_eq!(h.best().map(|i| i.index), Some(2));
        assert_eq!(h.merits(), vec![3.0, 1.0, 1.0]);
        assert_eq!(h.last().map(|i| i.index), Some(2));
    }
}
