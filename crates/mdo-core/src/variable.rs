//! Variable declarations.

use crate::shape::Shape;

/// Direction of a variable relative to its owning component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarKind {
    Input,
    Output,
}

/// Declared metadata of one variable.
///
/// Units are kept as the declared string and parsed when the registry is built,
/// so an invalid unit is reported together with the variable's full path.
#[derive(Clone, Debug, PartialEq)]
pub struct VarMeta {
    pub name: String,
    pub kind: VarKind,
    pub shape: Shape,
    pub units: Option<String>,
    pub default: Vec<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub desc: String,
}

impl VarMeta {
    fn new(name: impl Into<String>, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            shape: Shape::Scalar,
            units: None,
            default: vec![0.0],
            lower: None,
            upper: None,
            desc: String::new(),
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::Input)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::Output)
    }

    /// Set the shape; the default becomes zeros of the new size.
    pub fn shape(mut self, shape: Shape) -> Self {
        self.default = vec![0.0; shape.size()];
        self.shape = shape;
        self
    }

    pub fn vector(self, n: usize) -> Self {
        self.shape(Shape::Vector(n))
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Fill the default with a constant.
    pub fn value(mut self, v: f64) -> Self {
        self.default = vec![v; self.shape.size()];
        self
    }

    /// Set an explicit default; its length is checked against the shape at build time.
    pub fn values(mut self, v: Vec<f64>) -> Self {
        self.default = v;
        self
    }

    pub fn bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }

    pub fn lower(mut self, lower: f64) -> Self {
        self.lower = Some(lower);
        self
    }

    pub fn upper(mut self, upper: f64) -> Self {
        self.upper = Some(upper);
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Clip a value into the declared bounds.
    pub fn clip(&self, v: f64) -> f64 {
        let v = self.lower.map_or(v, |lo| v.max(lo));
        self.upper.map_or(v, |hi| v.min(hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let m = VarMeta::output("EA")
            .vector(3)
            .units("N")
            .value(2.0)
            .bounds(0.0, 10.0)
            .desc("axial stiffness");
        assert_eq!(m.kind, VarKind::Output);
        assert_eq!(m.default, vec![2.0, 2.0, 2.0]);
        assert_eq!(m.units.as_deref(), Some("N"));
        assert_eq!(m.clip(12.0), 10.0);
        assert_eq!(m.clip(-1.0), 0.0);
    }

    #[test]
    fn shape_resets_default() {
        let m = VarMeta::input("x").value(4.0).vector(2);
        assert_eq!(m.default, vec![0.0, 0.0]);
    }
}
