//! Independent-variable fan-out.

use mdo_core::VarMeta;

use crate::declare::Declarations;
use crate::error::ComponentResult;
use crate::partials::Partials;
use crate::traits::{Component, DerivativeMethod};
use crate::view::{ComplexInputs, ComplexOutputs, Inputs, Outputs};

/// Copies each input `name` to an output `name_out` with the same shape and
/// units.
///
/// Free inputs of a passthrough are the natural place to attach design
/// variables that feed several components.
#[derive(Debug, Clone)]
pub struct Passthrough {
    vars: Vec<VarMeta>,
}

impl Passthrough {
    pub fn new(vars: Vec<VarMeta>) -> Self {
        Self { vars }
    }

    pub fn output_name(input: &str) -> String {
        format!("{input}_out")
    }
}

impl Component for Passthrough {
    fn declare(&self, decl: &mut Declarations) {
        for v in &self.vars {
            decl.add_input(v.clone());
        }
        for v in &self.vars {
            let mut out = v.clone();
            out.name = Self::output_name(&v.name);
            decl.add_output(out);
        }
        for v in &self.vars {
            decl.declare_partials(&Self::output_name(&v.name), &v.name);
        }
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::Analytic
    }

    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> ComponentResult<()> {
        outputs.as_mut_slice().copy_from_slice(inputs.as_slice());
        Ok(())
    }

    fn compute_partials(
        &self,
        _inputs: &Inputs<'_>,
        _outputs: &Inputs<'_>,
        partials: &mut Partials<'_>,
    ) -> ComponentResult<()> {
        for v in &self.vars {
            partials.set_diagonal(&Self::output_name(&v.name), &v.name, &vec![1.0; v.size()])?;
        }
        Ok(())
    }

    fn compute_complex(
        &self,
        inputs: &ComplexInputs<'_>,
        outputs: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        outputs.as_mut_slice().copy_from_slice(inputs.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::ComponentLayout;
    use crate::traits::ComponentKind;

    #[test]
    fn copies_values_with_identity_partials() {
        let c = Passthrough::new(vec![
            VarMeta::input("span").units("m").value(60.0),
            VarMeta::input("chord").vector(2),
        ]);
        let mut d = Declarations::new();
        c.declare(&mut d);
        assert_eq!(d.outputs()[0].name, "span_out");
        assert_eq!(d.outputs()[0].units.as_deref(), Some("m"));
        let layout = ComponentLayout::new(&d, ComponentKind::Explicit).unwrap();

        let u = [60.0, 1.0, 2.0];
        let mut y = [0.0; 3];
        c.compute(
            &Inputs::new(layout.inputs(), &u),
            &mut Outputs::new(layout.outputs(), &mut y),
        )
        .unwrap();
        assert_eq!(y, u);

        let mut p = Partials::new(&layout);
        c.compute_partials(
            &Inputs::new(layout.inputs(), &u),
            &Inputs::new(layout.outputs(), &y),
            &mut p,
        )
        .unwrap();
        assert_eq!(p.matrix(), &nalgebra::DMatrix::<f64>::identity(3, 3));
    }
}
