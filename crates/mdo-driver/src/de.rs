//! Differential evolution (rand/1/bin) with penalized constraints.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::optimizer::{DesignSpace, Evaluation, Optimizer, Termination, Verdict};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeConfig {
    /// Members per generation; `0` picks ten per design entry (at least 15).
    pub population_size: usize,
    /// Differential weight.
    pub f: f64,
    /// Crossover probability.
    pub cr: f64,
    /// Weight of the constraint violation added to the objective.
    pub penalty: f64,
    /// Converged when the merit spread of a generation falls below
    /// `tol * (1 + |best|)`.
    pub tol: f64,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            population_size: 0,
            f: 0.8,
            cr: 0.9,
            penalty: 1e3,
            tol: 1e-8,
            seed: None,
        }
    }
}

#[derive(Clone, Debug)]
struct Member {
    x: DVector<f64>,
    merit: f64,
}

#[derive(Clone, Copy, Debug)]
enum Pending {
    Initial(usize),
    Trial(usize),
    Idle,
}

/// Population-based derivative-free search. Needs finite bounds.
#[derive(Debug)]
pub struct DifferentialEvolution {
    config: DeConfig,
    rng: StdRng,
    space: Option<DesignSpace>,
    population: Vec<Member>,
    best: usize,
    target: usize,
    generation: usize,
    pending: Pending,
    trial: DVector<f64>,
    stop: Option<Termination>,
}

impl DifferentialEvolution {
    pub fn new(config: DeConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            space: None,
            population: Vec::new(),
            best: 0,
            target: 0,
            generation: 0,
            pending: Pending::Idle,
            trial: DVector::zeros(0),
            stop: None,
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    fn random_member(&mut self, space: &DesignSpace) -> DVector<f64> {
        DVector::from_iterator(
            space.dim(),
            (0..space.dim()).map(|i| self.rng.gen_range(space.lower[i]..=space.upper[i])),
        )
    }

    /// Three distinct members other than `target`.
    fn pick_three(&mut self, target: usize) -> [usize; 3] {
        let np = self.population.len();
        let mut picked = [target; 3];
        for k in 0..3 {
            loop {
                let r = self.rng.gen_range(0..np);
                if r != target && !picked[..k].contains(&r) {
                    picked[k] = r;
                    break;
                }
            }
        }
        picked
    }

    fn make_trial(&mut self, target: usize) -> DVector<f64> {
        let [r1, r2, r3] = self.pick_three(target);
        let n = self.population[target].x.len();
        let j_rand = self.rng.gen_range(0..n);
        let mut trial = self.population[target].x.clone();
        for j in 0..n {
            if j == j_rand || self.rng.gen_bool(self.config.cr) {
                trial[j] = self.population[r1].x[j]
                    + self.config.f * (self.population[r2].x[j] - self.population[r3].x[j]);
            }
        }
        match &self.space {
            Some(space) => space.project(&trial),
            None => trial,
        }
    }

    fn end_of_generation(&mut self) {
        self.generation += 1;
        let finite: Vec<f64> = self
            .population
            .iter()
            .map(|m| m.merit)
            .filter(|m| m.is_finite())
            .collect();
        if finite.len() < self.population.len() {
            return;
        }
        let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        debug!(generation = self.generation, best = lo, spread = hi - lo, "DE generation");
        if hi - lo <= self.config.tol * (1.0 + lo.abs()) {
            self.stop = Some(Termination {
                converged: true,
                message: format!("population converged after {} generations", self.generation),
            });
        }
    }
}

impl Optimizer for DifferentialEvolution {
    fn name(&self) -> &'static str {
        "differential-evolution"
    }

    fn needs_gradients(&self) -> bool {
        false
    }

    fn uses_step_tolerances(&self) -> bool {
        false
    }

    fn start(&mut self, space: &DesignSpace, x0: &Evaluation) {
        let n = space.dim();
        let np = match self.config.population_size {
            0 => (10 * n).max(15),
            p => p.max(4),
        };
        let mut population = Vec::with_capacity(np);
        population.push(Member {
            x: x0.x.clone(),
            merit: self.merit(x0),
        });
        for _ in 1..np {
            let x = self.random_member(space);
            population.push(Member {
                x,
                merit: f64::INFINITY,
            });
        }
        self.population = population;
        self.space = Some(space.clone());
        self.best = 0;
        self.target = 0;
        self.generation = 0;
        self.pending = Pending::Idle;
        self.stop = None;
    }

    fn propose(&mut self) -> DVector<f64> {
        let unevaluated = self.population.iter().position(|m| m.merit == f64::INFINITY);
        match unevaluated {
            Some(k) if self.generation == 0 => {
                self.pending = Pending::Initial(k);
                self.population[k].x.clone()
            }
            _ => {
                let target = self.target;
                self.trial = self.make_trial(target);
                self.pending = Pending::Trial(target);
                self.trial.clone()
            }
        }
    }

    fn accept(&mut self, result: Option<&Evaluation>) -> Verdict {
        let merit = result.map_or(f64::INFINITY, |e| self.merit(e));
        let merit = if merit.is_nan() { f64::INFINITY } else { merit };
        let improved_best = merit < self.population[self.best].merit;

        match std::mem::replace(&mut self.pending, Pending::Idle) {
            Pending::Initial(k) => {
                // Failed members take the worst finite merit so they are not
                // proposed again.
                self.population[k].merit = if merit.is_finite() { merit } else { f64::MAX };
                if improved_best {
                    self.best = k;
                }
            }
            Pending::Trial(i) => {
                if merit <= self.population[i].merit {
                    self.population[i] = Member {
                        x: self.trial.clone(),
                        merit,
                    };
                    if improved_best {
                        self.best = i;
                    }
                }
                self.target += 1;
                if self.target == self.population.len() {
                    self.target = 0;
                    self.end_of_generation();
                }
            }
            Pending::Idle => return Verdict::Reject,
        }

        if improved_best {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    fn terminate(&self) -> Option<Termination> {
        self.stop.clone()
    }

    fn merit(&self, eval: &Evaluation) -> f64 {
        eval.f + self.config.penalty * eval.violation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(x: &DVector<f64>) -> Evaluation {
        // minimize (x0 - 3)^2 + x1^2  s.t.  x1 >= 1
        Evaluation {
            x: x.clone(),
            f: (x[0] - 3.0).powi(2) + x[1] * x[1],
            g: DVector::from_vec(vec![1.0 - x[1]]),
            h: DVector::zeros(0),
            grad_f: None,
            jac_g: None,
            jac_h: None,
            frozen: vec![false; 2],
        }
    }

    fn run(seed: u64, budget: usize) -> (Vec<f64>, Evaluation) {
        let space = DesignSpace {
            lower: DVector::from_vec(vec![0.0, 0.0]),
            upper: DVector::from_vec(vec![10.0, 5.0]),
            n_ineq: 1,
            n_eq: 0,
        };
        let mut de = DifferentialEvolution::new(DeConfig {
            seed: Some(seed),
            ..DeConfig::default()
        });
        let mut best = eval(&DVector::from_vec(vec![9.0, 4.0]));
        de.start(&space, &best);
        let mut merits = vec![de.merit(&best)];
        for _ in 0..budget {
            if de.terminate().is_some() {
                break;
            }
            let x = space.project(&de.propose());
            let e = eval(&x);
            if de.accept(Some(&e)) == Verdict::Accept {
                merits.push(de.merit(&e));
                best = e;
            }
        }
        (merits, best)
    }

    #[test]
    fn finds_constrained_minimum() {
        let (merits, best) = run(7, 6000);
        assert!((best.x[0] - 3.0).abs() < 1e-2, "x0 = {}", best.x[0]);
        assert!((best.x[1] - 1.0).abs() < 1e-2, "x1 = {}", best.x[1]);
        assert!(merits.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let (a, _) = run(11, 300);
        let (b, _) = run(11, 300);
        assert_eq!(a, b);
    }

    #[test]
    fn failed_trials_do_not_replace_members() {
        let space = DesignSpace {
            lower: DVector::from_vec(vec![0.0]),
            upper: DVector::from_vec(vec![1.0]),
            n_ineq: 0,
            n_eq: 0,
        };
        let mut de = DifferentialEvolution::new(DeConfig {
            population_size: 4,
            seed: Some(1),
            ..DeConfig::default()
        });
        let x0 = Evaluation {
            x: DVector::from_vec(vec![0.5]),
            f: 1.0,
            g: DVector::zeros(0),
            h: DVector::zeros(0),
            grad_f: None,
            jac_g: None,
            jac_h: None,
            frozen: vec![false],
        };
        de.start(&space, &x0);
        for _ in 0..12 {
            de.propose();
            assert_eq!(de.accept(None), Verdict::Reject);
        }
        assert_eq!(de.population[0].merit, 1.0);
    }
}
