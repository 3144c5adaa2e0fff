//! Components defined by equation strings.

use mdo_core::{Shape, VarMeta};

use crate::common::check_finite;
use crate::declare::Declarations;
use crate::error::{ComponentError, ComponentResult};
use crate::expr::{Equation, Expr, Source};
use crate::scalar::Scalar;
use crate::traits::{Component, ComponentKind, DerivativeMethod};
use crate::view::{ComplexInputs, ComplexOutputs, Inputs, Outputs, VarView, VarViewMut};

/// Size a variable needs to satisfy every indexed reference to it.
fn referenced_size(exprs: &[&Expr], name: &str) -> Option<usize> {
    exprs
        .iter()
        .flat_map(|e| e.vars())
        .filter(|v| v.name == name)
        .filter_map(|v| v.index)
        .max()
        .map(|i| i + 1)
}

fn offsets(metas: &[VarMeta]) -> Vec<(String, usize, usize)> {
    let mut off = 0;
    metas
        .iter()
        .map(|m| {
            let entry = (m.name.clone(), off, m.size());
            off += m.size();
            entry
        })
        .collect()
}

fn lookup(table: &[(String, usize, usize)], name: &str) -> Option<(usize, usize)> {
    table
        .iter()
        .find(|(n, _, _)| n == name)
        .map(|(_, off, size)| (*off, *size))
}

fn replace_meta(
    metas: &mut [VarMeta],
    meta: VarMeta,
    check: impl Fn(&VarMeta, &VarMeta) -> ComponentResult<()>,
) -> ComponentResult<bool> {
    match metas.iter_mut().find(|m| m.name == meta.name) {
        Some(slot) => {
            check(slot, &meta)?;
            let kind = slot.kind;
            *slot = meta;
            slot.kind = kind;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Explicit component computing each output from an equation such as
/// `y = 2*b + 1`.
///
/// Inputs are the names referenced on the right-hand sides, outputs the
/// left-hand sides. Outputs are scalars; inputs referenced with an index
/// (`v[2]`) become vectors. Derivatives come from complex-step evaluation of
/// the same expressions.
#[derive(Debug, Clone)]
pub struct ExprComponent {
    equations: Vec<Equation>,
    inputs: Vec<VarMeta>,
    outputs: Vec<VarMeta>,
}

impl ExprComponent {
    pub fn new<S: AsRef<str>>(equations: &[S]) -> ComponentResult<Self> {
        if equations.is_empty() {
            return Err(ComponentError::invalid("expression component needs an equation"));
        }
        let equations = equations
            .iter()
            .map(|s| Equation::parse(s.as_ref()))
            .collect::<ComponentResult<Vec<_>>>()?;

        let mut outputs: Vec<VarMeta> = Vec::new();
        for eq in &equations {
            if outputs.iter().any(|o| o.name == eq.lhs) {
                return Err(ComponentError::invalid(format!(
                    "output '{}' is defined twice",
                    eq.lhs
                )));
            }
            outputs.push(VarMeta::output(eq.lhs.clone()));
        }

        let exprs: Vec<&Expr> = equations.iter().map(|e| &e.rhs).collect();
        let mut inputs: Vec<VarMeta> = Vec::new();
        for eq in &equations {
            for name in eq.rhs.names() {
                if outputs.iter().any(|o| o.name == name) {
                    return Err(ComponentError::invalid(format!(
                        "output '{name}' used on a right-hand side"
                    )));
                }
                if inputs.iter().any(|i| i.name == name) {
                    continue;
                }
                let meta = match referenced_size(&exprs, &name) {
                    Some(n) => VarMeta::input(name).vector(n),
                    None => VarMeta::input(name),
                };
                inputs.push(meta);
            }
        }

        let mut comp = Self {
            equations,
            inputs,
            outputs,
        };
        comp.bind()?;
        Ok(comp)
    }

    /// Override the metadata (units, default, bounds, shape of an input) of a
    /// variable already referenced by the equations.
    pub fn var(mut self, meta: VarMeta) -> ComponentResult<Self> {
        let replaced_input = replace_meta(&mut self.inputs, meta.clone(), |_, _| Ok(()))?;
        let replaced = replaced_input
            || replace_meta(&mut self.outputs, meta.clone(), |_, new| {
                if new.shape != Shape::Scalar {
                    return Err(ComponentError::invalid(format!(
                        "output '{}' of an expression component must be scalar",
                        new.name
                    )));
                }
                Ok(())
            })?;
        if !replaced {
            return Err(ComponentError::MissingVariable { name: meta.name });
        }
        self.bind()?;
        Ok(self)
    }

    fn bind(&mut self) -> ComponentResult<()> {
        let table = offsets(&self.inputs);
        for eq in &mut self.equations {
            eq.rhs
                .bind(|name| lookup(&table, name).map(|(off, size)| (Source::Input, off, size)))?;
        }
        Ok(())
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    fn eval_into<T: Scalar>(
        &self,
        inputs: &VarView<'_, T>,
        outputs: &mut VarViewMut<'_, T>,
    ) -> ComponentResult<()> {
        let u = inputs.as_slice();
        let out = outputs.as_mut_slice();
        for (slot, eq) in out.iter_mut().zip(&self.equations) {
            let v = eq.rhs.eval(u, &[]);
            check_finite(v.re(), &eq.lhs).map_err(|_| ComponentError::Domain {
                what: format!("'{} = {}' evaluated to {}", eq.lhs, eq.rhs.source(), v.re()),
            })?;
            *slot = v;
        }
        Ok(())
    }
}

impl Component for ExprComponent {
    fn declare(&self, decl: &mut Declarations) {
        for m in &self.inputs {
            decl.add_input(m.clone());
        }
        for m in &self.outputs {
            decl.add_output(m.clone());
        }
        for eq in &self.equations {
            for name in eq.rhs.names() {
                decl.declare_partials(&eq.lhs, &name);
            }
        }
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::complex_step()
    }

    fn compute(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> ComponentResult<()> {
        self.eval_into(inputs, outputs)
    }

    fn compute_complex(
        &self,
        inputs: &ComplexInputs<'_>,
        outputs: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        self.eval_into(inputs, outputs)
    }
}

/// Implicit component with one scalar state per residual expression
/// `R(inputs, states) = 0`.
///
/// ```text
/// ImplicitExpr::new(&[("x", "x**2 - a")])
/// ```
#[derive(Debug, Clone)]
pub struct ImplicitExpr {
    residuals: Vec<(String, Expr)>,
    inputs: Vec<VarMeta>,
    outputs: Vec<VarMeta>,
}

impl ImplicitExpr {
    pub fn new<S: AsRef<str>, R: AsRef<str>>(residuals: &[(S, R)]) -> ComponentResult<Self> {
        if residuals.is_empty() {
            return Err(ComponentError::invalid("implicit component needs a residual"));
        }
        let mut outputs: Vec<VarMeta> = Vec::new();
        let mut parsed = Vec::with_capacity(residuals.len());
        for (state, src) in residuals {
            let state = state.as_ref().trim();
            if !crate::expr::is_identifier(state) {
                return Err(ComponentError::invalid(format!(
                    "state '{state}' is not a variable name"
                )));
            }
            if outputs.iter().any(|o| o.name == state) {
                return Err(ComponentError::invalid(format!("state '{state}' declared twice")));
            }
            outputs.push(VarMeta::output(state));
            parsed.push((state.to_string(), Expr::parse(src.as_ref())?));
        }

        let exprs: Vec<&Expr> = parsed.iter().map(|(_, e)| e).collect();
        let mut inputs: Vec<VarMeta> = Vec::new();
        for (_, e) in &parsed {
            for name in e.names() {
                if outputs.iter().any(|o| o.name == name) || inputs.iter().any(|i| i.name == name)
                {
                    continue;
                }
                let meta = match referenced_size(&exprs, &name) {
                    Some(n) => VarMeta::input(name).vector(n),
                    None => VarMeta::input(name),
                };
                inputs.push(meta);
            }
        }

        let mut comp = Self {
            residuals: parsed,
            inputs,
            outputs,
        };
        comp.bind()?;
        Ok(comp)
    }

    /// Override metadata of an input or a state (bounds, initial guess, units).
    pub fn var(mut self, meta: VarMeta) -> ComponentResult<Self> {
        let replaced = replace_meta(&mut self.inputs, meta.clone(), |_, _| Ok(()))?
            || replace_meta(&mut self.outputs, meta.clone(), |_, new| {
                if new.shape != Shape::Scalar {
                    return Err(ComponentError::invalid(format!(
                        "state '{}' must be scalar",
                        new.name
                    )));
                }
                Ok(())
            })?;
        if !replaced {
            return Err(ComponentError::MissingVariable { name: meta.name });
        }
        self.bind()?;
        Ok(self)
    }

    fn bind(&mut self) -> ComponentResult<()> {
        let ins = offsets(&self.inputs);
        let outs = offsets(&self.outputs);
        for (_, e) in &mut self.residuals {
            e.bind(|name| {
                lookup(&outs, name)
                    .map(|(off, size)| (Source::Output, off, size))
                    .or_else(|| lookup(&ins, name).map(|(off, size)| (Source::Input, off, size)))
            })?;
        }
        Ok(())
    }

    fn residuals_into<T: Scalar>(
        &self,
        inputs: &VarView<'_, T>,
        outputs: &VarView<'_, T>,
        residuals: &mut VarViewMut<'_, T>,
    ) -> ComponentResult<()> {
        let u = inputs.as_slice();
        let y = outputs.as_slice();
        let r = residuals.as_mut_slice();
        for (slot, (state, e)) in r.iter_mut().zip(&self.residuals) {
            let v = e.eval(u, y);
            check_finite(v.re(), state).map_err(|_| ComponentError::Domain {
                what: format!("residual of '{state}' ({}) evaluated to {}", e.source(), v.re()),
            })?;
            *slot = v;
        }
        Ok(())
    }
}

impl Component for ImplicitExpr {
    fn declare(&self, decl: &mut Declarations) {
        for m in &self.inputs {
            decl.add_input(m.clone());
        }
        for m in &self.outputs {
            decl.add_output(m.clone());
        }
        for (state, e) in &self.residuals {
            // the state's own column is always present so dR/dy is never structurally empty
            decl.declare_partials(state, state);
            for name in e.names() {
                decl.declare_partials(state, &name);
            }
        }
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Implicit
    }

    fn derivative_method(&self) -> DerivativeMethod {
        DerivativeMethod::complex_step()
    }

    fn compute(&self, _inputs: &Inputs<'_>, _outputs: &mut Outputs<'_>) -> ComponentResult<()> {
        Err(ComponentError::NotSupported {
            what: "implicit expressions have no direct solve",
        })
    }

    fn apply_residuals(
        &self,
        inputs: &Inputs<'_>,
        outputs: &Inputs<'_>,
        residuals: &mut Outputs<'_>,
    ) -> ComponentResult<()> {
        self.residuals_into(inputs, outputs, residuals)
    }

    fn apply_residuals_complex(
        &self,
        inputs: &ComplexInputs<'_>,
        outputs: &ComplexInputs<'_>,
        residuals: &mut ComplexOutputs<'_>,
    ) -> ComponentResult<()> {
        self.residuals_into(inputs, outputs, residuals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::ComponentLayout;
    use crate::scalar::C64;
    use nalgebra::Complex;

    fn layout_of(c: &dyn Component) -> ComponentLayout {
        let mut d = Declarations::new();
        c.declare(&mut d);
        ComponentLayout::new(&d, c.kind()).unwrap()
    }

    #[test]
    fn infers_inputs_and_outputs() {
        let c = ExprComponent::new(&["y = 2*b + 1", "z = b*v[1] + w"]).unwrap();
        let layout = layout_of(&c);
        let names: Vec<&str> = layout.inputs().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["b", "v", "w"]);
        assert_eq!(layout.inputs()[1].size, 2);
        assert_eq!(layout.output_size(), 2);
        assert!(!layout.is_declared(0, 1));
        assert!(layout.is_declared(1, 2));

        let u = [3.0, 0.0, 4.0, 1.0];
        let mut y = [0.0; 2];
        c.compute(
            &Inputs::new(layout.inputs(), &u),
            &mut Outputs::new(layout.outputs(), &mut y),
        )
        .unwrap();
        assert_eq!(y, [7.0, 13.0]);
    }

    #[test]
    fn rejects_outputs_on_right_hand_side() {
        assert!(ExprComponent::new(&["y = 1", "z = y + 1"]).is_err());
        assert!(ExprComponent::new(&["y = 1", "y = 2"]).is_err());
    }

    #[test]
    fn metadata_override() {
        let c = ExprComponent::new(&["y = x"])
            .unwrap()
            .var(VarMeta::input("x").units("m").value(2.0))
            .unwrap()
            .var(VarMeta::output("y").units("mm"))
            .unwrap();
        let mut d = Declarations::new();
        c.declare(&mut d);
        assert_eq!(d.inputs()[0].units.as_deref(), Some("m"));
        assert_eq!(d.inputs()[0].default, vec![2.0]);
        assert_eq!(d.outputs()[0].units.as_deref(), Some("mm"));
        assert!(c.clone().var(VarMeta::input("q")).is_err());
        assert!(c.var(VarMeta::output("y").vector(2)).is_err());
    }

    #[test]
    fn domain_errors_are_reported() {
        let c = ExprComponent::new(&["y = log(x)"]).unwrap();
        let layout = layout_of(&c);
        let mut y = [0.0];
        let err = c
            .compute(
                &Inputs::new(layout.inputs(), &[-1.0]),
                &mut Outputs::new(layout.outputs(), &mut y),
            )
            .unwrap_err();
        assert!(matches!(err, ComponentError::Domain { .. }));
    }

    #[test]
    fn implicit_residuals_and_complex_step() {
        let c = ImplicitExpr::new(&[("x", "x**2 - a")])
            .unwrap()
            .var(VarMeta::output("x").value(1.0).lower(0.0))
            .unwrap();
        let layout = layout_of(&c);
        assert_eq!(layout.kind(), ComponentKind::Implicit);
        assert_eq!(layout.column_size(), 2);

        let mut r = [0.0];
        c.apply_residuals(
            &Inputs::new(layout.inputs(), &[4.0]),
            &Inputs::new(layout.outputs(), &[3.0]),
            &mut Outputs::new(layout.outputs(), &mut r),
        )
        .unwrap();
        assert_eq!(r, [5.0]);

        let h = 1e-30;
        let mut rc = [C64::new(0.0, 0.0)];
        c.apply_residuals_complex(
            &ComplexInputs::new(layout.inputs(), &[Complex::new(4.0, 0.0)]),
            &ComplexInputs::new(layout.outputs(), &[Complex::new(3.0, h)]),
            &mut ComplexOutputs::new(layout.outputs(), &mut rc),
        )
        .unwrap();
        assert!((rc[0].im / h - 6.0).abs() < 1e-12);
    }
}
