//! Local partial-derivative matrix of one component.

use nalgebra::DMatrix;

use crate::declare::ComponentLayout;
use crate::error::{ComponentError, ComponentResult};

/// Dense local Jacobian.
///
/// Rows are outputs (explicit: `dy/du`) or residuals (implicit: `dR/du`
/// followed by `dR/dy` in the columns). Writes are checked against the
/// declared sparsity.
#[derive(Debug, Clone)]
pub struct Partials<'a> {
    layout: &'a ComponentLayout,
    data: DMatrix<f64>,
}

impl<'a> Partials<'a> {
    pub fn new(layout: &'a ComponentLayout) -> Self {
        Self {
            layout,
            data: DMatrix::zeros(layout.output_size(), layout.column_size()),
        }
    }

    fn block(&self, of: &str, wrt: &str) -> ComponentResult<(usize, usize, usize, usize)> {
        let undeclared = || ComponentError::UndeclaredPartial {
            of: of.to_string(),
            wrt: wrt.to_string(),
        };
        let row = self.layout.output_index(of).ok_or_else(undeclared)?;
        let col = self.layout.column_index(wrt).ok_or_else(undeclared)?;
        if !self.layout.is_declared(row, col) {
            return Err(undeclared());
        }
        let out = &self.layout.outputs()[row];
        let c = self.layout.column(col);
        Ok((out.offset, out.size, self.layout.column_offset(col), c.size))
    }

    /// Set the block `d(of)/d(wrt)` from row-major values.
    pub fn set(&mut self, of: &str, wrt: &str, values: &[f64]) -> ComponentResult<()> {
        let (r0, nr, c0, nc) = self.block(of, wrt)?;
        if values.len() != nr * nc {
            return Err(ComponentError::invalid(format!(
                "d({of})/d({wrt}) expects {} entries, got {}",
                nr * nc,
                values.len()
            )));
        }
        for i in 0..nr {
            for j in 0..nc {
                self.data[(r0 + i, c0 + j)] = values[i * nc + j];
            }
        }
        Ok(())
    }

    pub fn set_scalar(&mut self, of: &str, wrt: &str, value: f64) -> ComponentResult<()> {
        self.set(of, wrt, &[value])
    }

    /// Set a square block to a diagonal.
    pub fn set_diagonal(&mut self, of: &str, wrt: &str, diag: &[f64]) -> ComponentResult<()> {
        let (r0, nr, c0, nc) = self.block(of, wrt)?;
        if nr != nc || diag.len() != nr {
            return Err(ComponentError::invalid(format!(
                "d({of})/d({wrt}) is {nr}x{nc}, cannot set a diagonal of {}",
                diag.len()
            )));
        }
        for (i, d) in diag.iter().enumerate() {
            for j in 0..nc {
                self.data[(r0 + i, c0 + j)] = if i == j { *d } else { 0.0 };
            }
        }
        Ok(())
    }

    /// Copy of the block `d(of)/d(wrt)`.
    pub fn get(&self, of: &str, wrt: &str) -> ComponentResult<DMatrix<f64>> {
        let (r0, nr, c0, nc) = self.block(of, wrt)?;
        Ok(self.data.view((r0, c0), (nr, nc)).into_owned())
    }

    pub fn layout(&self) -> &ComponentLayout {
        self.layout
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Raw matrix access for numeric differentiation, bypassing sparsity checks.
    pub fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.data
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::Declarations;
    use crate::traits::ComponentKind;
    use mdo_core::VarMeta;

    fn layout() -> ComponentLayout {
        let mut d = Declarations::new();
        d.add_input(VarMeta::input("x").vector(2))
            .add_input(VarMeta::input("s"))
            .add_output(VarMeta::output("y").vector(2))
            .declare_partials("y", "x");
        ComponentLayout::new(&d, ComponentKind::Explicit).unwrap()
    }

    #[test]
    fn set_and_get_blocks() {
        let layout = layout();
        let mut p = Partials::new(&layout);
        p.set("y", "x", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(p.matrix()[(1, 0)], 3.0);
        assert_eq!(p.matrix()[(1, 2)], 0.0);
        assert_eq!(p.get("y", "x").unwrap()[(0, 1)], 2.0);

        p.set_diagonal("y", "x", &[5.0, 6.0]).unwrap();
        assert_eq!(p.matrix()[(0, 1)], 0.0);
        assert_eq!(p.matrix()[(1, 1)], 6.0);
    }

    #[test]
    fn undeclared_pairs_rejected() {
        let layout = layout();
        let mut p = Partials::new(&layout);
        assert!(matches!(
            p.set_scalar("y", "s", 1.0),
            Err(ComponentError::UndeclaredPartial { .. })
        ));
        assert!(p.set("y", "x", &[1.0]).is_err());
    }
}
