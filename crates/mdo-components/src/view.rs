//! Named access to a component's local input, output and residual buffers.

use crate::declare::LocalVar;
use crate::error::{ComponentError, ComponentResult};
use crate::scalar::C64;

fn find<'v>(vars: &'v [LocalVar], name: &str) -> ComponentResult<&'v LocalVar> {
    vars.iter()
        .find(|v| v.name == name)
        .ok_or_else(|| ComponentError::MissingVariable {
            name: name.to_string(),
        })
}

fn expect_scalar(var: &LocalVar) -> ComponentResult<()> {
    if var.size != 1 {
        return Err(ComponentError::invalid(format!(
            "'{}' has {} entries, not a scalar",
            var.name, var.size
        )));
    }
    Ok(())
}

/// Read-only view over a local buffer.
#[derive(Debug, Clone, Copy)]
pub struct VarView<'a, T> {
    vars: &'a [LocalVar],
    data: &'a [T],
}

impl<'a, T: Copy> VarView<'a, T> {
    pub fn new(vars: &'a [LocalVar], data: &'a [T]) -> Self {
        debug_assert_eq!(vars.iter().map(|v| v.size).sum::<usize>(), data.len());
        Self { vars, data }
    }

    pub fn get(&self, name: &str) -> ComponentResult<&'a [T]> {
        let var = find(self.vars, name)?;
        Ok(&self.data[var.range()])
    }

    pub fn scalar(&self, name: &str) -> ComponentResult<T> {
        let var = find(self.vars, name)?;
        expect_scalar(var)?;
        Ok(self.data[var.offset])
    }

    pub fn vars(&self) -> &'a [LocalVar] {
        self.vars
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }
}

/// Mutable view over a local buffer.
#[derive(Debug)]
pub struct VarViewMut<'a, T> {
    vars: &'a [LocalVar],
    data: &'a mut [T],
}

impl<'a, T: Copy> VarViewMut<'a, T> {
    pub fn new(vars: &'a [LocalVar], data: &'a mut [T]) -> Self {
        debug_assert_eq!(vars.iter().map(|v| v.size).sum::<usize>(), data.len());
        Self { vars, data }
    }

    pub fn get(&self, name: &str) -> ComponentResult<&[T]> {
        let var = find(self.vars, name)?;
        Ok(&self.data[var.range()])
    }

    pub fn get_mut(&mut self, name: &str) -> ComponentResult<&mut [T]> {
        let var = find(self.vars, name)?;
        Ok(&mut self.data[var.range()])
    }

    pub fn set(&mut self, name: &str, values: &[T]) -> ComponentResult<()> {
        let var = find(self.vars, name)?;
        if values.len() != var.size {
            return Err(ComponentError::invalid(format!(
                "'{}' expects {} entries, got {}",
                var.name,
                var.size,
                values.len()
            )));
        }
        self.data[var.range()].copy_from_slice(values);
        Ok(())
    }

    pub fn set_scalar(&mut self, name: &str, value: T) -> ComponentResult<()> {
        let var = find(self.vars, name)?;
        expect_scalar(var)?;
        self.data[var.offset] = value;
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        &*self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }
}

pub type Inputs<'a> = VarView<'a, f64>;
pub type Outputs<'a> = VarViewMut<'a, f64>;
pub type ComplexInputs<'a> = VarView<'a, C64>;
pub type ComplexOutputs<'a> = VarViewMut<'a, C64>;
