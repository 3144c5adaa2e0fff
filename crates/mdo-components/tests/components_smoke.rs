//! Integration tests for user-defined and built-in components.

use mdo_components::{
    Component, ComponentError, ComponentLayout, Declarations, DerivativeMethod, ExprComponent,
    Inputs, Outputs, Partials,
};
use mdo_core::VarMeta;

/// Blade mass from span and a mass-per-length distribution.
struct BladeMass;

impl Component for BladeMass {
    fn declare(&self, decl: &mut Declarations) {
        decl.add_input(VarMeta::input("span").units("m").value(60.0))
            .add_input(VarMeta::input("rho_l").units("kg/m").vector(3).value(300.0))
            .add_output(VarMeta::output("mass").units("kg"))
            .declare_partials("mass", "*");
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::Analytic
    }

    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<(), ComponentError> {
        let span = inputs.scalar("span")?;
        let rho = inputs.get("rho_l")?;
        let mean = rho.iter().sum::<f64>() / rho.len() as f64;
        outputs.set_scalar("mass", span * mean)
    }

    fn compute_partials(
        &self,
        inputs: &Inputs<'_>,
        _outputs: &Inputs<'_>,
        partials: &mut Partials<'_>,
    ) -> Result<(), ComponentError> {
        let span = inputs.scalar("span")?;
        let rho = inputs.get("rho_l")?;
        let n = rho.len() as f64;
        partials.set_scalar("mass", "span", rho.iter().sum::<f64>() / n)?;
        partials.set("mass", "rho_l", &vec![span / n; rho.len()])
    }
}

fn layout_of(c: &dyn Component) -> ComponentLayout {
    let mut d = Declarations::new();
    c.declare(&mut d);
    ComponentLayout::new(&d, c.kind()).unwrap()
}

#[test]
fn custom_component_with_analytic_partials() {
    let c = BladeMass;
    let layout = layout_of(&c);
    let u = [50.0, 100.0, 200.0, 300.0];
    let mut y = [0.0];
    c.compute(
        &Inputs::new(layout.inputs(), &u),
        &mut Outputs::new(layout.outputs(), &mut y),
    )
    .unwrap();
    assert_eq!(y[0], 10_000.0);

    let mut p = Partials::new(&layout);
    c.compute_partials(
        &Inputs::new(layout.inputs(), &u),
        &Inputs::new(layout.outputs(), &y),
        &mut p,
    )
    .unwrap();
    assert_eq!(p.matrix()[(0, 0)], 200.0);
    assert!((p.matrix()[(0, 3)] - 50.0 / 3.0).abs() < 1e-12);
}

#[test]
fn expression_component_complex_step_partials() {
    let c = ExprComponent::new(&["f = (x - 3)**2 + sin(y)"]).unwrap();
    let layout = layout_of(&c);
    assert!(matches!(
        c.derivative_method(),
        DerivativeMethod::ComplexStep { .. }
    ));

    let h = 1e-30;
    let base = [1.5, 0.25];
    for col in 0..2 {
        let mut u: Vec<mdo_components::C64> = base
            .iter()
            .map(|v| nalgebra::Complex::new(*v, 0.0))
            .collect();
        u[col].im = h;
        let mut y = [nalgebra::Complex::new(0.0, 0.0)];
        c.compute_complex(
            &mdo_components::ComplexInputs::new(layout.inputs(), &u),
            &mut mdo_components::ComplexOutputs::new(layout.outputs(), &mut y),
        )
        .unwrap();
        let d = y[0].im / h;
        let exact = if col == 0 { 2.0 * (1.5 - 3.0) } else { 0.25_f64.cos() };
        assert!((d - exact).abs() < 1e-14, "column {col}: {d} vs {exact}");
    }
}
