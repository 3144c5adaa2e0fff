//! Affine map `y = A x + b`.

use mdo_core::VarMeta;
use nalgebra::{DMatrix, DVector};

use crate::declare::Declarations;
use crate::error::{ComponentError, ComponentResult};
use crate::partials::Partials;
use crate::traits::{Component, DerivativeMethod};
use crate::view::{ComplexInputs, ComplexOutputs, Inputs, Outputs};

#[derive(Debug, Clone)]
pub struct LinearMap {
    input: VarMeta,
    output: VarMeta,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl LinearMap {
    /// `input` must have `a.ncols()` entries; the output gets `a.nrows()`.
    pub fn new(
        input: VarMeta,
        output: impl Into<String>,
        a: DMatrix<f64>,
        b: DVector<f64>,
    ) -> ComponentResult<Self> {
        if input.size() != a.ncols() {
            return Err(ComponentError::invalid(format!(
                "input '{}' has {} entries but the matrix has {} columns",
                input.name,
                input.size(),
                a.ncols()
            )));
        }
        if b.len() != a.nrows() {
            return Err(ComponentError::invalid(format!(
                "offset has {} entries but the matrix has {} rows",
                b.len(),
                a.nrows()
            )));
        }
        let output = if a.nrows() == 1 {
            VarMeta::output(output)
        } else {
            VarMeta::output(output).vector(a.nrows())
        };
        Ok(Self {
            input,
            output,
            a,
            b,
        })
    }

    pub fn output_units(mut self, units: impl Into<String>) -> Self {
        self.output = self.output.units(units);
        self
    }
}

impl Component for LinearMap {
    fn declare(&self, decl: &mut Declarations) {
        decl.add_input(self.input.clone());
        decl.add_output(self.output.clone());
        decl.declare_partials(&self.output.name, &self.input.name);
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::Analytic
    }

    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> ComponentResult<()> {
        let x = DVector::from_column_slice(inputs.get(&self.input.name)?);
        let y = &self.a * x + &self.b;
        outputs.set(&self.output.name, y.as_slice())
    }

    fn compute_partials(
        &self,
        _inputs: &Inputs<'_>,
        _outputs: &Inputs<'_>,
        partials: &mut Partials<'_>,
    ) -> ComponentResult<()> {
        // row-major for `set`
        let rows: Vec<f64> = self.a.transpose().iter().copied().collect();
        partials.set(&self.output.name, &self.input.name, &rows)
    }

    fn compute_complex(
        &self,
        inputs: &ComplexInputs<'_>,
        outputs: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        let x = inputs.get(&self.input.name)?;
        let y = outputs.get_mut(&self.output.name)?;
        for (i, yi) in y.iter_mut().enumerate() {
            let mut acc = nalgebra::Complex::new(self.b[i], 0.0);
            for (j, xj) in x.iter().enumerate() {
                acc += *xj * self.a[(i, j)];
            }
            *yi = acc;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::ComponentLayout;
    use crate::traits::ComponentKind;

    #[test]
    fn evaluates_and_differentiates() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DVector::from_column_slice(&[1.0, -1.0]);
        let c = LinearMap::new(VarMeta::input("x").vector(3), "y", a.clone(), b).unwrap();
        let mut d = Declarations::new();
        c.declare(&mut d);
        let layout = ComponentLayout::new(&d, ComponentKind::Explicit).unwrap();

        let u = [1.0, 1.0, 1.0];
        let mut y = [0.0; 2];
        c.compute(
            &Inputs::new(layout.inputs(), &u),
            &mut Outputs::new(layout.outputs(), &mut y),
        )
        .unwrap();
        assert_eq!(y, [7.0, 14.0]);

        let mut p = Partials::new(&layout);
        c.compute_partials(
            &Inputs::new(layout.inputs(), &u),
            &Inputs::new(layout.outputs(), &y),
            &mut p,
        )
        .unwrap();
        assert_eq!(p.matrix(), &a);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let a = DMatrix::<f64>::zeros(2, 2);
        let b = DVector::<f64>::zeros(2);
        assert!(LinearMap::new(VarMeta::input("x").vector(3), "y", a.clone(), b).is_err());
        assert!(LinearMap::new(VarMeta::input("x").vector(2), "y", a, DVector::zeros(1)).is_err());
    }
}
