//! Variable and partial-derivative declarations of a component.

use mdo_core::{VarKind, VarMeta};

use crate::error::{ComponentError, ComponentResult};
use crate::traits::ComponentKind;

/// Collected by [`Component::declare`](crate::Component::declare).
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    inputs: Vec<VarMeta>,
    outputs: Vec<VarMeta>,
    partials: Vec<(String, String)>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, mut meta: VarMeta) -> &mut Self {
        meta.kind = VarKind::Input;
        self.inputs.push(meta);
        self
    }

    pub fn add_output(&mut self, mut meta: VarMeta) -> &mut Self {
        meta.kind = VarKind::Output;
        self.outputs.push(meta);
        self
    }

    /// Declare that `of` depends on `wrt`. Either side may be `*`.
    ///
    /// A component that declares no partials at all is treated as dense.
    pub fn declare_partials(&mut self, of: &str, wrt: &str) -> &mut Self {
        self.partials.push((of.to_string(), wrt.to_string()));
        self
    }

    pub fn inputs(&self) -> &[VarMeta] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarMeta] {
        &self.outputs
    }

    pub fn partials(&self) -> &[(String, String)] {
        &self.partials
    }
}

/// Name, offset and size of one variable inside a component's local buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

impl LocalVar {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

fn locals(metas: &[VarMeta]) -> (Vec<LocalVar>, usize) {
    let mut offset = 0;
    let vars = metas
        .iter()
        .map(|m| {
            let v = LocalVar {
                name: m.name.clone(),
                offset,
                size: m.size(),
            };
            offset += v.size;
            v
        })
        .collect();
    (vars, offset)
}

/// Resolved local layout of a component: input/output offsets and the
/// declared sparsity of its partials.
///
/// Partial columns are the inputs followed, for implicit components, by the
/// outputs (states).
#[derive(Debug, Clone)]
pub struct ComponentLayout {
    kind: ComponentKind,
    inputs: Vec<LocalVar>,
    outputs: Vec<LocalVar>,
    input_size: usize,
    output_size: usize,
    /// `declared[of * n_cols + col]`, indexed by variable (not entry).
    declared: Vec<bool>,
}

impl ComponentLayout {
    pub fn new(decl: &Declarations, kind: ComponentKind) -> ComponentResult<Self> {
        let (inputs, input_size) = locals(&decl.inputs);
        let (outputs, output_size) = locals(&decl.outputs);

        let n_cols = match kind {
            ComponentKind::Explicit => inputs.len(),
            ComponentKind::Implicit => inputs.len() + outputs.len(),
        };
        let mut layout = Self {
            kind,
            inputs,
            outputs,
            input_size,
            output_size,
            declared: Vec::new(),
        };

        if decl.partials.is_empty() {
            layout.declared = vec![true; layout.outputs.len() * n_cols];
            return Ok(layout);
        }

        let mut declared = vec![false; layout.outputs.len() * n_cols];
        for (of, wrt) in &decl.partials {
            let rows: Vec<usize> = if of == "*" {
                (0..layout.outputs.len()).collect()
            } else {
                vec![layout.output_index(of).ok_or_else(|| {
                    ComponentError::invalid(format!(
                        "partial declared for unknown output '{of}'"
                    ))
                })?]
            };
            let cols: Vec<usize> = if wrt == "*" {
                (0..n_cols).collect()
            } else {
                vec![layout.column_index(wrt).ok_or_else(|| {
                    ComponentError::invalid(format!(
                        "partial declared with respect to unknown variable '{wrt}'"
                    ))
                })?]
            };
            for r in &rows {
                for c in &cols {
                    declared[r * n_cols + c] = true;
                }
            }
        }
        layout.declared = declared;
        Ok(layout)
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn inputs(&self) -> &[LocalVar] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[LocalVar] {
        &self.outputs
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Number of partial columns (variables, not entries).
    pub fn column_vars(&self) -> usize {
        match self.kind {
            ComponentKind::Explicit => self.inputs.len(),
            ComponentKind::Implicit => self.inputs.len() + self.outputs.len(),
        }
    }

    /// Width of the local partials matrix.
    pub fn column_size(&self) -> usize {
        match self.kind {
            ComponentKind::Explicit => self.input_size,
            ComponentKind::Implicit => self.input_size + self.output_size,
        }
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|v| v.name == name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|v| v.name == name)
    }

    /// Column variable index of `name`: an input, or (implicit only) an output.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.input_index(name) {
            return Some(i);
        }
        match self.kind {
            ComponentKind::Implicit => self.output_index(name).map(|o| self.inputs.len() + o),
            ComponentKind::Explicit => None,
        }
    }

    /// Column variable by index, with its offset in the partials matrix.
    pub fn column(&self, col: usize) -> &LocalVar {
        if col < self.inputs.len() {
            &self.inputs[col]
        } else {
            &self.outputs[col - self.inputs.len()]
        }
    }

    /// Offset of a column variable in the partials matrix.
    pub fn column_offset(&self, col: usize) -> usize {
        if col < self.inputs.len() {
            self.inputs[col].offset
        } else {
            self.input_size + self.outputs[col - self.inputs.len()].offset
        }
    }

    pub fn is_declared(&self, of: usize, col: usize) -> bool {
        self.declared[of * self.column_vars() + col]
    }

    /// Whether any output depends on column variable `col`.
    pub fn column_declared(&self, col: usize) -> bool {
        (0..self.outputs.len()).any(|o| self.is_declared(o, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl() -> Declarations {
        let mut d = Declarations::new();
        d.add_input(VarMeta::input("a"))
            .add_input(VarMeta::input("v").vector(3))
            .add_output(VarMeta::output("y"))
            .add_output(VarMeta::output("z").vector(2));
        d
    }

    #[test]
    fn offsets_follow_declaration_order() {
        let layout = ComponentLayout::new(&decl(), ComponentKind::Explicit).unwrap();
        assert_eq!(layout.input_size(), 4);
        assert_eq!(layout.output_size(), 3);
        assert_eq!(layout.inputs()[1].offset, 1);
        assert_eq!(layout.outputs()[1].range(), 1..3);
        assert_eq!(layout.column_size(), 4);
    }

    #[test]
    fn no_declarations_means_dense() {
        let layout = ComponentLayout::new(&decl(), ComponentKind::Explicit).unwrap();
        assert!(layout.is_declared(1, 0));
        assert!(layout.column_declared(1));
    }

    #[test]
    fn wildcards_and_sparsity() {
        let mut d = decl();
        d.declare_partials("y", "a").declare_partials("z", "*");
        let layout = ComponentLayout::new(&d, ComponentKind::Explicit).unwrap();
        assert!(layout.is_declared(0, 0));
        assert!(!layout.is_declared(0, 1));
        assert!(layout.is_declared(1, 1));
    }

    #[test]
    fn implicit_columns_include_states() {
        let mut d = decl();
        d.declare_partials("y", "z");
        let layout = ComponentLayout::new(&d, ComponentKind::Implicit).unwrap();
        assert_eq!(layout.column_size(), 7);
        let col = layout.column_index("z").unwrap();
        assert_eq!(col, 3);
        assert_eq!(layout.column_offset(col), 5);
        assert!(layout.is_declared(0, col));

        assert!(ComponentLayout::new(&d, ComponentKind::Explicit).is_err());
    }
}
