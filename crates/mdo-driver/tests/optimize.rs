//! End-to-end optimization over small coupling graphs.

use std::time::Duration;

use mdo_components::{
    Component, ComponentError, Declarations, DerivativeMethod, ExprComponent, Inputs, Outputs,
    Passthrough,
};
use mdo_core::VarMeta;
use mdo_driver::{
    Algorithm, DeConfig, DriverConfig, DriverProgressEvent, OptProblem, RunStatus, optimize,
    optimize_in, optimize_with_progress,
};
use mdo_graph::{Graph, GraphBuilder};
use mdo_solver::RunContext;
use proptest::prelude::*;

fn parabola() -> Graph {
    let mut b = GraphBuilder::new();
    b.add(
        "parab",
        ExprComponent::new(&["f = (x - t)**2"])
            .unwrap()
            .var(VarMeta::input("x").bounds(0.0, 10.0))
            .unwrap()
            .var(VarMeta::input("t").value(3.0))
            .unwrap(),
    );
    b.build().unwrap()
}

fn assert_non_increasing(values: &[f64]) {
    for w in values.windows(2) {
        assert!(w[1] <= w[0], "history increased: {values:?}");
    }
}

#[test]
fn parabola_converges_from_any_start() {
    let g = parabola();
    for start in [0.0, 10.0, 7.3, 1.5, 3.0] {
        let mut p = OptProblem::new(&g, "parabola");
        p.design_var("parab.x").unwrap().initial(vec![start]);
        p.objective("parab.f").unwrap();

        let result = optimize(&p, &DriverConfig::default()).unwrap();
        assert_eq!(result.status, RunStatus::Converged, "start {start}: {}", result.message);
        let best = result.best.as_ref().unwrap();
        assert!((best.design[0] - 3.0).abs() < 1e-6, "start {start}: x = {}", best.design[0]);
        assert!(best.objective < 1e-10);
        assert_eq!(result.history.get(0).map(|i| i.design[0]), Some(start));
        assert_non_increasing(&result.history.objectives());
        assert_eq!(result.iterations + 1, result.history.len());
    }
}

/// `ivc` fans two design variables out to an objective and a constraint.
fn constrained(objective: &str, constraint: &str) -> Graph {
    let mut b = GraphBuilder::new();
    b.add(
        "ivc",
        Passthrough::new(vec![
            VarMeta::input("x").bounds(-5.0, 5.0),
            VarMeta::input("y").bounds(-5.0, 5.0),
        ]),
    );
    b.add("obj", ExprComponent::new(&[objective]).unwrap());
    b.add("con", ExprComponent::new(&[constraint]).unwrap());
    b.connect_many("ivc.x_out", &["obj.x", "con.x"])
        .connect_many("ivc.y_out", &["obj.y", "con.y"]);
    b.build().unwrap()
}

#[test]
fn inequality_constrained_minimum() {
    let g = constrained("f = (x - 3)**2 + (y - 1)**2", "s = x + y");
    let mut p = OptProblem::new(&g, "halfplane");
    p.design_var("ivc.x").unwrap();
    p.design_var("ivc.y").unwrap();
    p.objective("obj.f").unwrap();
    p.constraint_upper("con.s", 2.0).unwrap();

    let result = optimize(&p, &DriverConfig::default()).unwrap();
    assert_eq!(result.status, RunStatus::Converged, "{}", result.message);
    let best = result.best.unwrap();
    assert!((best.design[0] - 2.0).abs() < 1e-6, "{:?}", best.design);
    assert!(best.design[1].abs() < 1e-6, "{:?}", best.design);
    assert!(best.max_violation <= 1e-6);
    assert!((best.value(&g, "con.s").unwrap()[0] - 2.0).abs() < 1e-6);
    assert!(best.constraint_jacobian.is_some());
}

#[test]
fn equality_constrained_minimum() {
    let g = constrained("f = x**2 + y**2", "s = x + y");
    let mut p = OptProblem::new(&g, "line");
    p.design_var("ivc.x").unwrap();
    p.design_var("ivc.y").unwrap();
    p.objective("obj.f").unwrap();
    p.constraint_equals("con.s", 2.0).unwrap();

    let result = optimize(&p, &DriverConfig::default()).unwrap();
    assert_eq!(result.status, RunStatus::Converged, "{}", result.message);
    let best = result.best.unwrap();
    assert!((best.design[0] - 1.0).abs() < 1e-6);
    assert!((best.design[1] - 1.0).abs() < 1e-6);
}

#[test]
fn infeasible_starts_keep_the_merit_history_ordered() {
    let g = constrained("f = (x - 4)**4 + y**2", "s = x**2 + y**2");
    for start in [[-5.0, -5.0], [0.5, -1.0], [5.0, 5.0], [-3.0, 4.0]] {
        let mut p = OptProblem::new(&g, "circle");
        p.design_var("ivc.x").unwrap().initial(vec![start[0]]);
        p.design_var("ivc.y").unwrap().initial(vec![start[1]]);
        p.objective("obj.f").unwrap();
        p.constraint_upper("con.s", 1.0).unwrap();

        let result = optimize(&p, &DriverConfig::default()).unwrap();
        let merits = result.history.merits();
        assert!(merits.len() > 1, "start {start:?}: {}", result.message);
        for w in merits.windows(2) {
            assert!(
                w[1] <= w[0] + 1e-12 * w[0].abs().max(1.0),
                "start {start:?}: {merits:?}"
            );
        }
        assert!(result.history.get(0).is_some_and(|i| i.max_violation > 0.0));
    }
}

#[test]
fn unreachable_constraint_is_reported_infeasible() {
    let mut b = GraphBuilder::new();
    b.add(
        "c",
        ExprComponent::new(&["f = x"])
            .unwrap()
            .var(VarMeta::input("x").bounds(0.0, 2.0))
            .unwrap(),
    );
    let g = b.build().unwrap();
    let mut p = OptProblem::new(&g, "impossible");
    p.design_var("c.x").unwrap();
    p.objective("c.f").unwrap();
    p.constraint_lower("c.x", 5.0).unwrap();

    let result = optimize(&p, &DriverConfig::default()).unwrap();
    assert_eq!(result.status, RunStatus::Infeasible, "{}", result.message);
    let best = result.best.unwrap();
    assert!((best.design[0] - 2.0).abs() < 1e-9);
    assert!((best.max_violation - 3.0).abs() < 1e-9);
}

#[test]
fn failed_candidates_are_rejected_and_the_step_shrinks() {
    let mut b = GraphBuilder::new();
    b.add(
        "c",
        ExprComponent::new(&["f = sqrt(5 - x) + (x - 3)**2"])
            .unwrap()
            .var(VarMeta::input("x").bounds(0.0, 10.0))
            .unwrap(),
    );
    let g = b.build().unwrap();
    let mut p = OptProblem::new(&g, "edge");
    p.design_var("c.x").unwrap();
    p.objective("c.f").unwrap();

    let mut rejected = Vec::new();
    let result = optimize_with_progress(&p, &DriverConfig::default(), |e| {
        if let DriverProgressEvent::Rejected { reason, .. } = e {
            rejected.push(reason.clone());
        }
    })
    .unwrap();
    assert_eq!(result.status, RunStatus::Converged, "{}", result.message);
    assert!(!rejected.is_empty());
    assert!(rejected[0].contains("'c'"), "{}", rejected[0]);

    let x = result.best.unwrap().design[0];
    let slope = -0.5 / (5.0 - x).sqrt() + 2.0 * (x - 3.0);
    assert!(slope.abs() < 1e-4, "x = {x}, slope = {slope}");
}

#[test]
fn progress_events_follow_the_history() {
    let g = parabola();
    let mut p = OptProblem::new(&g, "parabola");
    p.design_var("parab.x").unwrap().initial(vec![9.0]);
    p.objective("parab.f").unwrap();

    let mut events = Vec::new();
    let result = optimize_with_progress(&p, &DriverConfig::default(), |e| events.push(e.clone())).unwrap();
    assert!(matches!(events.first(), Some(DriverProgressEvent::Started { design_entries: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(DriverProgressEvent::Finished {
            status: RunStatus::Converged,
            ..
        })
    ));
    let accepted = events
        .iter()
        .filter(|e| matches!(e, DriverProgressEvent::Accepted { .. }))
        .count();
    assert_eq!(accepted, result.history.len());
}

#[test]
fn budgets_and_timeout_stop_the_run() {
    let g = parabola();
    let mut p = OptProblem::new(&g, "parabola");
    p.design_var("parab.x").unwrap().initial(vec![9.0]);
    p.objective("parab.f").unwrap();

    let timed = DriverConfig {
        timeout: Some(Duration::ZERO),
        ..DriverConfig::default()
    };
    let result = optimize(&p, &timed).unwrap();
    assert_eq!(result.status, RunStatus::TimedOut);
    assert_eq!(result.history.len(), 1);
    assert!(result.best.is_some());

    let short = DriverConfig {
        max_evaluations: 1,
        ..DriverConfig::default()
    };
    let result = optimize(&p, &short).unwrap();
    assert_eq!(result.status, RunStatus::MaxEvaluations);
    assert_eq!(result.evaluations, 1);
    assert_eq!(result.history.len(), 1);
}

#[test]
fn differential_evolution_finds_the_minimum() {
    let g = parabola();
    let mut p = OptProblem::new(&g, "parabola");
    p.design_var("parab.x").unwrap().initial(vec![9.0]);
    p.objective("parab.f").unwrap();

    let config = DriverConfig {
        max_evaluations: 3000,
        ..DriverConfig::with_algorithm(Algorithm::DifferentialEvolution(DeConfig {
            seed: Some(3),
            ..DeConfig::default()
        }))
    };
    let result = optimize(&p, &config).unwrap();
    assert!(
        matches!(result.status, RunStatus::Converged | RunStatus::MaxEvaluations),
        "{:?}: {}",
        result.status,
        result.message
    );
    assert!((result.best.unwrap().design[0] - 3.0).abs() < 1e-3);
    for w in result.history.merits().windows(2) {
        assert!(w[1] < w[0]);
    }
}

#[test]
fn differential_evolution_needs_bounds() {
    let mut b = GraphBuilder::new();
    b.add("c", ExprComponent::new(&["f = x**2"]).unwrap());
    let g = b.build().unwrap();
    let mut p = OptProblem::new(&g, "open");
    p.design_var("c.x").unwrap();
    p.objective("c.f").unwrap();
    let config = DriverConfig::with_algorithm(Algorithm::DifferentialEvolution(DeConfig::default()));
    assert!(matches!(
        optimize(&p, &config),
        Err(mdo_driver::DriverError::Config { .. })
    ));
}

/// Black-box model without derivatives: `b = (a - 1.5)^2`.
struct Lookup;

impl Component for Lookup {
    fn declare(&self, decl: &mut Declarations) {
        decl.add_input(VarMeta::input("a").bounds(-4.0, 4.0))
            .add_output(VarMeta::output("b"));
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::Unavailable
    }

    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<(), ComponentError> {
        outputs.set_scalar("b", (inputs.scalar("a")? - 1.5).powi(2))
    }
}

#[test]
fn design_variables_without_derivatives_use_compass_search() {
    let mut b = GraphBuilder::new();
    b.add("lookup", Lookup);
    b.add(
        "smooth",
        ExprComponent::new(&["s = (x - 3)**2"])
            .unwrap()
            .var(VarMeta::input("x").bounds(0.0, 10.0))
            .unwrap(),
    );
    b.add("sum", ExprComponent::new(&["f = b + s"]).unwrap());
    b.connect("lookup.b", "sum.b").connect("smooth.s", "sum.s");
    let g = b.build().unwrap();

    let mut p = OptProblem::new(&g, "mixed");
    p.design_var("lookup.a").unwrap();
    p.design_var("smooth.x").unwrap();
    p.objective("sum.f").unwrap();

    let result = optimize(&p, &DriverConfig::default()).unwrap();
    assert_eq!(result.status, RunStatus::Converged, "{}", result.message);
    let best = result.best.unwrap();
    assert!((best.design[0] - 1.5).abs() < 1e-3, "{:?}", best.design);
    assert!((best.design[1] - 3.0).abs() < 1e-6, "{:?}", best.design);
    assert_eq!(best.flags.frozen, vec!["lookup.a".to_string()]);
    assert_non_increasing(&result.history.objectives());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn accepted_objectives_never_increase(start in 0.0f64..10.0, target in 1.0f64..9.0) {
        let g = parabola();
        let mut p = OptProblem::new(&g, "parabola");
        p.design_var("parab.x").unwrap();
        p.objective("parab.f").unwrap();

        let mut ctx = RunContext::new(&g);
        ctx.set_path(&g, "parab.x", &[start]).unwrap();
        ctx.set_path(&g, "parab.t", &[target]).unwrap();
        let result = optimize_in(&p, &DriverConfig::default(), &mut ctx, &mut |_| {}).unwrap();

        let objectives = result.history.objectives();
        for w in objectives.windows(2) {
            prop_assert!(w[1] <= w[0]);
        }
        prop_assert_eq!(result.status, RunStatus::Converged);
        prop_assert!((ctx.get_path(&g, "parab.x").unwrap()[0] - target).abs() < 1e-6);
    }
}
