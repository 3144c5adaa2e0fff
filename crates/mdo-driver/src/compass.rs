//! Compass (coordinate pattern) search over a subset of design entries.

use nalgebra::DVector;

use crate::optimizer::DesignSpace;

/// Polls `x ± step * scale_i * e_i` for each searched coordinate in turn.
/// A full round without improvement halves the step.
#[derive(Clone, Debug)]
pub(crate) struct CompassSearch {
    coords: Vec<usize>,
    scales: Vec<f64>,
    step: f64,
    min_step: f64,
    /// Next direction: `coords[cursor / 2]`, positive when even.
    cursor: usize,
    /// Directions tried since the last improvement.
    failures: usize,
}

/// Outcome of reporting a polled trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Improved,
    Continue,
    /// Every direction failed; the step was contracted.
    Contracted,
}

impl CompassSearch {
    /// Searches `coords` with an initial step relative to each coordinate's
    /// bound width (or magnitude when unbounded).
    pub fn new(coords: Vec<usize>, space: &DesignSpace, x: &DVector<f64>, step: f64, min_step: f64) -> Self {
        let scales = coords
            .iter()
            .map(|&i| {
                let width = space.upper[i] - space.lower[i];
                if width.is_finite() && width > 0.0 {
                    width
                } else {
                    x[i].abs().max(1.0)
                }
            })
            .collect();
        Self {
            coords,
            scales,
            step,
            min_step,
            cursor: 0,
            failures: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.coords.is_empty() || self.step < self.min_step
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Next trial point from `x`, skipping directions blocked by a bound.
    /// `None` once the step has shrunk below its minimum.
    pub fn poll(&mut self, x: &DVector<f64>, space: &DesignSpace) -> Option<DVector<f64>> {
        while !self.is_done() {
            let k = self.cursor / 2;
            let sign = if self.cursor % 2 == 0 { 1.0 } else { -1.0 };
            let i = self.coords[k];
            let mut trial = x.clone();
            trial[i] += sign * self.step * self.scales[k];
            let trial = space.project(&trial);
            if (trial[i] - x[i]).abs() > 0.0 {
                return Some(trial);
            }
            self.advance();
        }
        None
    }

    /// Record whether the last polled trial improved on its base point.
    pub fn report(&mut self, improved: bool) -> PollOutcome {
        if improved {
            self.failures = 0;
            return PollOutcome::Improved;
        }
        if self.advance() {
            PollOutcome::Contracted
        } else {
            PollOutcome::Continue
        }
    }

    /// Move to the next direction; returns `true` when a full round failed.
    fn advance(&mut self) -> bool {
        self.cursor = (self.cursor + 1) % (2 * self.coords.len());
        self.failures += 1;
        if self.failures >= 2 * self.coords.len() {
            self.failures = 0;
            self.step *= 0.5;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> DesignSpace {
        DesignSpace {
            lower: DVector::from_vec(vec![0.0, 0.0]),
            upper: DVector::from_vec(vec![4.0, 4.0]),
            n_ineq: 0,
            n_eq: 0,
        }
    }

    #[test]
    fn polls_both_directions_then_contracts() {
        let s = space();
        let x = DVector::from_vec(vec![2.0, 2.0]);
        let mut c = CompassSearch::new(vec![1], &s, &x, 0.25, 1e-3);
        let up = c.poll(&x, &s).unwrap();
        assert_eq!(up.as_slice(), &[2.0, 3.0]);
        assert_eq!(c.report(false), PollOutcome::Continue);
        let down = c.poll(&x, &s).unwrap();
        assert_eq!(down.as_slice(), &[2.0, 1.0]);
        assert_eq!(c.report(false), PollOutcome::Contracted);
        assert_eq!(c.step(), 0.125);
    }

    #[test]
    fn blocked_directions_are_skipped() {
        let s = space();
        let x = DVector::from_vec(vec![4.0, 0.0]);
        let mut c = CompassSearch::new(vec![0], &s, &x, 0.25, 1e-3);
        let trial = c.poll(&x, &s).unwrap();
        assert_eq!(trial.as_slice(), &[3.0, 0.0]);
    }

    #[test]
    fn finishes_when_step_is_tiny() {
        let s = space();
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let mut c = CompassSearch::new(vec![0, 1], &s, &x, 0.25, 0.1);
        let mut polls = 0;
        while c.poll(&x, &s).is_some() {
            c.report(false);
            polls += 1;
        }
        assert!(c.is_done());
        assert_eq!(polls, 8);
    }
}
