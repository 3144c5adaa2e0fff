//! End-to-end evaluation of small wind-turbine style graphs.

use mdo_components::{ExprComponent, ImplicitExpr, Passthrough};
use mdo_core::{ConvergenceConfig, VarMeta};
use mdo_graph::{Graph, GraphBuilder};
use mdo_solver::{CycleState, EvaluateOptions, RunContext, SolverError, evaluate, evaluate_strict};
use proptest::prelude::*;

/// Rotor sizing feeding two independent branches, one of them a
/// structure/loads cycle, with a cost roll-up at the end.
fn turbine(config: ConvergenceConfig) -> Graph {
    let mut b = GraphBuilder::new();
    b.add(
        "ivc",
        Passthrough::new(vec![
            VarMeta::input("diameter").units("m").value(120.0),
            VarMeta::input("hub_height").units("m").value(90.0),
        ]),
    );
    b.add(
        "rotor",
        ExprComponent::new(&["area = pi*diameter**2/4", "thrust = 0.5*1.225*area*0.8*100"])
            .unwrap(),
    );
    b.add(
        "tower",
        ExprComponent::new(&["tower_mass = 0.002*hub_height**3"]).unwrap(),
    );
    b.add(
        "structure",
        ExprComponent::new(&["blade_mass = 1e-4*thrust + 0.1*deflection + 1000"]).unwrap(),
    );
    b.add(
        "loads",
        ExprComponent::new(&["deflection = 1e-3*blade_mass + 0.5"]).unwrap(),
    );
    b.add(
        "cost",
        ExprComponent::new(&["capex = 3*blade_mass + 1.5*tower_mass"]).unwrap(),
    );
    b.connect("ivc.diameter_out", "rotor.diameter")
        .connect("ivc.hub_height_out", "tower.hub_height")
        .connect("rotor.thrust", "structure.thrust")
        .connect("structure.blade_mass", "loads.blade_mass")
        .connect("loads.deflection", "structure.deflection")
        .connect("structure.blade_mass", "cost.blade_mass")
        .connect("tower.tower_mass", "cost.tower_mass");
    b.default_solver(config);
    b.build().unwrap()
}

#[test]
fn parallel_and_sequential_schedules_are_bit_identical() {
    let g = turbine(ConvergenceConfig::default());
    let mut par = RunContext::new(&g);
    let mut seq = RunContext::new(&g);
    let r1 = evaluate(&g, &mut par, &EvaluateOptions::default()).unwrap();
    let r2 = evaluate(&g, &mut seq, &EvaluateOptions::sequential()).unwrap();
    assert!(r1.converged() && r2.converged());
    assert_eq!(par.values(), seq.values());
    assert_eq!(r1.cycles[0].iterations, r2.cycles[0].iterations);
}

#[test]
fn rerunning_with_fixed_inputs_is_bit_identical() {
    let g = turbine(ConvergenceConfig::default());
    let mut a = RunContext::new(&g);
    let mut b = RunContext::new(&g);
    evaluate(&g, &mut a, &EvaluateOptions::default()).unwrap();
    evaluate(&g, &mut b, &EvaluateOptions::default()).unwrap();
    assert_eq!(a.values(), b.values());
}

#[test]
fn coupled_region_policies_agree() {
    let gs = turbine(ConvergenceConfig::gauss_seidel().with_tol(1e-12, 1e-12));
    let newton = turbine(ConvergenceConfig::newton().with_tol(1e-12, 1e-12));
    let mut c1 = RunContext::new(&gs);
    let mut c2 = RunContext::new(&newton);
    evaluate_strict(&gs, &mut c1, &EvaluateOptions::default()).unwrap();
    let report = evaluate_strict(&newton, &mut c2, &EvaluateOptions::default()).unwrap();
    assert_eq!(report.cycles[0].policy, "newton");
    for path in ["structure.blade_mass", "loads.deflection", "cost.capex"] {
        let (a, b) = (c1.get_path(&gs, path).unwrap()[0], c2.get_path(&newton, path).unwrap()[0]);
        assert!((a - b).abs() <= 1e-8 * a.abs().max(1.0), "{path}: {a} vs {b}");
    }
    // blade_mass = 1e-4*thrust + 0.1*(1e-3*m + 0.5) + 1000
    let thrust = c1.get_path(&gs, "rotor.thrust").unwrap()[0];
    let expected = (1e-4 * thrust + 0.05 + 1000.0) / (1.0 - 1e-4);
    let m = c1.get_path(&gs, "structure.blade_mass").unwrap()[0];
    assert!((m - expected).abs() < 1e-8);
}

#[test]
fn scenario_two_component_cycle() {
    let mut b = GraphBuilder::new();
    b.add("a", ExprComponent::new(&["a_out = b_in + 1"]).unwrap());
    b.add("b", ExprComponent::new(&["b_out = 0.5*a_in"]).unwrap());
    b.connect("a.a_out", "b.a_in").connect("b.b_out", "a.b_in");
    b.default_solver(ConvergenceConfig::gauss_seidel().with_tol(1e-10, 1e-8));
    let g = b.build().unwrap();

    let mut ctx = RunContext::new(&g);
    let report = evaluate(&g, &mut ctx, &EvaluateOptions::default()).unwrap();
    let cycle = &report.cycles[0];
    assert_eq!(cycle.state, CycleState::Converged);
    assert!(cycle.iterations < 50);
    assert!((ctx.get_path(&g, "a.a_out").unwrap()[0] - 2.0).abs() < 1e-6);
    assert!((ctx.get_path(&g, "b.b_out").unwrap()[0] - 1.0).abs() < 1e-6);

    // idempotence from the converged point
    let again = evaluate(&g, &mut ctx, &EvaluateOptions::default()).unwrap();
    assert!(again.cycles[0].iterations <= 1);
}

#[test]
fn implicit_component_is_solved_in_its_own_region() {
    let mut b = GraphBuilder::new();
    b.add("load", ExprComponent::new(&["a = 2*p"]).unwrap());
    b.add(
        "root",
        ImplicitExpr::new(&[("x", "x**2 - a")])
            .unwrap()
            .var(VarMeta::output("x").value(1.0).lower(0.0))
            .unwrap(),
    );
    b.connect("load.a", "root.a");
    b.default_solver(ConvergenceConfig::newton());
    let g = b.build().unwrap();
    assert!(g.regions()[1].is_coupled());

    let mut ctx = RunContext::new(&g);
    ctx.set_path(&g, "load.p", &[8.0]).unwrap();
    evaluate_strict(&g, &mut ctx, &EvaluateOptions::default()).unwrap();
    assert!((ctx.get_path(&g, "root.x").unwrap()[0] - 4.0).abs() < 1e-5);
}

#[test]
fn bound_blocked_implicit_solve_is_not_converged() {
    let mut b = GraphBuilder::new();
    b.add(
        "shift",
        ImplicitExpr::new(&[("x", "x + a")])
            .unwrap()
            .var(VarMeta::input("a").value(1.0))
            .unwrap()
            .var(VarMeta::output("x").lower(0.0))
            .unwrap(),
    );
    let g = b.build().unwrap();

    let mut ctx = RunContext::new(&g);
    let report = evaluate(&g, &mut ctx, &EvaluateOptions::default()).unwrap();
    assert!(!report.converged());
    let cycle = &report.cycles[0];
    assert_eq!(cycle.state, CycleState::MaxIterExceeded);
    assert!(cycle.residual >= 1.0 - 1e-12, "residual = {}", cycle.residual);
    assert_eq!(ctx.get_path(&g, "shift.x").unwrap(), &[0.0]);

    let mut ctx = RunContext::new(&g);
    let err = evaluate_strict(&g, &mut ctx, &EvaluateOptions::default()).unwrap_err();
    assert!(matches!(err, SolverError::CycleResolutionFailure { .. }));
}

#[test]
fn unit_conversion_applies_during_evaluation() {
    let mut b = GraphBuilder::new();
    b.add(
        "src",
        ExprComponent::new(&["len = 2*x"])
            .unwrap()
            .var(VarMeta::output("len").units("m"))
            .unwrap(),
    );
    b.add(
        "dst",
        ExprComponent::new(&["y = len_ft + 0"])
            .unwrap()
            .var(VarMeta::input("len_ft").units("ft"))
            .unwrap(),
    );
    b.connect("src.len", "dst.len_ft");
    let g = b.build().unwrap();
    let mut ctx = RunContext::new(&g);
    ctx.set_path(&g, "src.x", &[0.1524]).unwrap();
    evaluate(&g, &mut ctx, &EvaluateOptions::default()).unwrap();
    assert!((ctx.get_path(&g, "dst.y").unwrap()[0] - 1.0).abs() < 1e-9);
}

#[test]
fn evaluation_error_names_the_component() {
    let mut b = GraphBuilder::new();
    b.add("bad", ExprComponent::new(&["y = sqrt(x)"]).unwrap());
    let g = b.build().unwrap();
    let mut ctx = RunContext::new(&g);
    ctx.set_path(&g, "bad.x", &[-4.0]).unwrap();
    match evaluate(&g, &mut ctx, &EvaluateOptions::default()) {
        Err(SolverError::Evaluation { comp, .. }) => assert_eq!(comp, "bad"),
        other => panic!("unexpected {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn schedule_does_not_change_results(d in 40.0f64..200.0, h in 50.0f64..150.0) {
        let g = turbine(ConvergenceConfig::default());
        let mut par = RunContext::new(&g);
        let mut seq = RunContext::new(&g);
        for ctx in [&mut par, &mut seq] {
            ctx.set_path(&g, "ivc.diameter", &[d]).unwrap();
            ctx.set_path(&g, "ivc.hub_height", &[h]).unwrap();
        }
        evaluate(&g, &mut par, &EvaluateOptions::default()).unwrap();
        evaluate(&g, &mut seq, &EvaluateOptions::sequential()).unwrap();
        prop_assert_eq!(par.values(), seq.values());
    }
}
