//! Variable registry: the static, validated namespace of a coupling graph.
//!
//! Every `(component, name)` pair is resolved once into a [`VarId`] with a
//! fixed slot in the flat [`Values`] vector. After construction the registry is
//! read-only and can be shared freely between workers.

use std::collections::HashMap;

use crate::error::{MdoError, MdoResult};
use crate::ids::{CompId, VarId};
use crate::units::Unit;
use crate::variable::{VarKind, VarMeta};

/// Variables declared by one component, in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct ComponentVars<'a> {
    pub name: &'a str,
    pub inputs: &'a [VarMeta],
    pub outputs: &'a [VarMeta],
}

/// A resolved variable.
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub id: VarId,
    pub comp: CompId,
    /// Full path `component.variable`.
    pub path: String,
    pub meta: VarMeta,
    /// Parsed unit; `None` when the declaration carried no unit.
    pub unit: Option<Unit>,
    /// Offset in the flat value vector.
    pub offset: usize,
    /// Offset within the owning component's input (or output) block.
    pub local_offset: usize,
}

impl VarInfo {
    pub fn size(&self) -> usize {
        self.meta.size()
    }

    pub fn kind(&self) -> VarKind {
        self.meta.kind
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VarRegistry {
    vars: Vec<VarInfo>,
    by_path: HashMap<String, VarId>,
    comp_names: Vec<String>,
    comp_inputs: Vec<Vec<VarId>>,
    comp_outputs: Vec<Vec<VarId>>,
    total_size: usize,
}

impl VarRegistry {
    /// Build the registry for components given in declaration order.
    pub fn build<'a>(components: impl IntoIterator<Item = ComponentVars<'a>>) -> MdoResult<Self> {
        let mut reg = VarRegistry::default();

        for (ci, comp) in components.into_iter().enumerate() {
            let comp_id = CompId::from_usize(ci);
            if comp.name.is_empty() || comp.name.contains('.') {
                return Err(MdoError::InvalidDeclaration {
                    path: comp.name.to_string(),
                    reason: "component names must be non-empty and must not contain '.'"
                        .to_string(),
                });
            }
            reg.comp_names.push(comp.name.to_string());

            let mut inputs = Vec::with_capacity(comp.inputs.len());
            let mut outputs = Vec::with_capacity(comp.outputs.len());
            let mut seen: HashMap<&str, ()> = HashMap::new();

            for (metas, expected, ids) in [
                (comp.inputs, VarKind::Input, &mut inputs),
                (comp.outputs, VarKind::Output, &mut outputs),
            ] {
                let mut local_offset = 0;
                for meta in metas {
                    if seen.insert(meta.name.as_str(), ()).is_some() {
                        return Err(MdoError::DuplicateVariable {
                            comp: comp.name.to_string(),
                            name: meta.name.clone(),
                        });
                    }
                    let path = format!("{}.{}", comp.name, meta.name);
                    let info = reg.make_info(comp_id, path, meta, expected, local_offset)?;
                    local_offset += info.size();
                    ids.push(info.id);
                    reg.by_path.insert(info.path.clone(), info.id);
                    reg.total_size += info.size();
                    reg.vars.push(info);
                }
            }

            reg.comp_inputs.push(inputs);
            reg.comp_outputs.push(outputs);
        }

        Ok(reg)
    }

    fn make_info(
        &self,
        comp: CompId,
        path: String,
        meta: &VarMeta,
        expected: VarKind,
        local_offset: usize,
    ) -> MdoResult<VarInfo> {
        let bad = |reason: String| MdoError::InvalidDeclaration {
            path: path.clone(),
            reason,
        };

        if meta.name.is_empty() || meta.name.contains('.') {
            return Err(bad("variable names must be non-empty and must not contain '.'".into()));
        }
        if meta.kind != expected {
            return Err(bad(format!("declared as {:?} in the {:?} list", meta.kind, expected)));
        }
        if meta.size() == 0 {
            return Err(bad("zero-sized variable".into()));
        }
        if meta.default.len() != meta.size() {
            return Err(bad(format!(
                "default has {} entries, shape {} needs {}",
                meta.default.len(),
                meta.shape,
                meta.size()
            )));
        }
        if meta.default.iter().any(|v| !v.is_finite()) {
            return Err(bad("non-finite default".into()));
        }
        if let (Some(lo), Some(hi)) = (meta.lower, meta.upper) {
            if lo > hi {
                return Err(bad(format!("lower bound {lo} exceeds upper bound {hi}")));
            }
        }
        let unit = match &meta.units {
            Some(expr) => Some(Unit::parse(expr)?),
            None => None,
        };

        Ok(VarInfo {
            id: VarId::from_usize(self.vars.len()),
            comp,
            path,
            meta: meta.clone(),
            unit,
            offset: self.total_size,
            local_offset,
        })
    }

    pub fn vars(&self) -> &[VarInfo] {
        &self.vars
    }

    pub fn var(&self, id: VarId) -> &VarInfo {
        &self.vars[id.idx()]
    }

    pub fn get(&self, id: VarId) -> Option<&VarInfo> {
        self.vars.get(id.idx())
    }

    /// Resolve `component.variable` into a handle.
    pub fn resolve(&self, path: &str) -> MdoResult<VarId> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| MdoError::UnknownVariable {
                path: path.to_string(),
            })
    }

    pub fn component_count(&self) -> usize {
        self.comp_names.len()
    }

    pub fn component_name(&self, comp: CompId) -> &str {
        &self.comp_names[comp.idx()]
    }

    pub fn inputs_of(&self, comp: CompId) -> &[VarId] {
        &self.comp_inputs[comp.idx()]
    }

    pub fn outputs_of(&self, comp: CompId) -> &[VarId] {
        &self.comp_outputs[comp.idx()]
    }

    /// Total flat size of a component's inputs.
    pub fn input_size(&self, comp: CompId) -> usize {
        self.inputs_of(comp).iter().map(|v| self.var(*v).size()).sum()
    }

    /// Total flat size of a component's outputs.
    pub fn output_size(&self, comp: CompId) -> usize {
        self.outputs_of(comp).iter().map(|v| self.var(*v).size()).sum()
    }

    /// Total number of flat value entries.
    pub fn size(&self) -> usize {
        self.total_size
    }

    /// Values initialised from the declared defaults.
    pub fn initial_values(&self) -> Values {
        let mut data = vec![0.0; self.total_size];
        for v in &self.vars {
            data[v.range()].copy_from_slice(&v.meta.default);
        }
        Values { data }
    }
}

/// Flat storage of every variable value of a graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Values {
    data: Vec<f64>,
}

impl Values {
    pub fn zeros(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, var: &VarInfo) -> &[f64] {
        &self.data[var.range()]
    }

    pub fn get_mut(&mut self, var: &VarInfo) -> &mut [f64] {
        &mut self.data[var.range()]
    }

    /// Overwrite one variable, checking the length.
    pub fn set(&mut self, var: &VarInfo, value: &[f64]) -> MdoResult<()> {
        if value.len() != var.size() {
            return Err(MdoError::InvalidArg {
                what: format!(
                    "value for '{}' has {} entries, expected {}",
                    var.path,
                    value.len(),
                    var.size()
                ),
            });
        }
        self.data[var.range()].copy_from_slice(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<VarMeta>, Vec<VarMeta>, Vec<VarMeta>, Vec<VarMeta>) {
        (
            vec![VarMeta::input("x").value(1.0), VarMeta::input("v").vector(2)],
            vec![VarMeta::output("y").units("m")],
            vec![VarMeta::input("y").units("mm")],
            vec![VarMeta::output("z").vector(3).value(5.0)],
        )
    }

    #[test]
    fn build_assigns_offsets_in_declaration_order() {
        let (ai, ao, bi, bo) = sample();
        let reg = VarRegistry::build([
            ComponentVars {
                name: "a",
                inputs: &ai,
                outputs: &ao,
            },
            ComponentVars {
                name: "b",
                inputs: &bi,
                outputs: &bo,
            },
        ])
        .unwrap();

        assert_eq!(reg.size(), 1 + 2 + 1 + 1 + 3);
        let v = reg.var(reg.resolve("a.v").unwrap());
        assert_eq!(v.offset, 1);
        assert_eq!(v.local_offset, 1);
        let z = reg.var(reg.resolve("b.z").unwrap());
        assert_eq!(z.offset, 5);
        assert_eq!(z.local_offset, 0);
        assert_eq!(reg.input_size(CompId::from_index(0)), 3);
        assert_eq!(reg.output_size(CompId::from_index(1)), 3);

        let values = reg.initial_values();
        assert_eq!(values.get(z), &[5.0, 5.0, 5.0]);
        assert_eq!(values.get(reg.var(reg.resolve("a.x").unwrap())), &[1.0]);
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let reg = VarRegistry::build([]).unwrap();
        assert!(matches!(
            reg.resolve("nope.x"),
            Err(MdoError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn duplicate_names_rejected_across_kinds() {
        let inputs = vec![VarMeta::input("x")];
        let outputs = vec![VarMeta::output("x")];
        let err = VarRegistry::build([ComponentVars {
            name: "c",
            inputs: &inputs,
            outputs: &outputs,
        }])
        .unwrap_err();
        assert!(matches!(err, MdoError::DuplicateVariable { .. }));
    }

    #[test]
    fn bad_declarations_rejected() {
        let inputs = vec![VarMeta::input("x").vector(3).values(vec![1.0])];
        let err = VarRegistry::build([ComponentVars {
            name: "c",
            inputs: &inputs,
            outputs: &[],
        }])
        .unwrap_err();
        assert!(matches!(err, MdoError::InvalidDeclaration { .. }));

        let inputs = vec![VarMeta::input("x").units("parsec")];
        let err = VarRegistry::build([ComponentVars {
            name: "c",
            inputs: &inputs,
            outputs: &[],
        }])
        .unwrap_err();
        assert!(matches!(err, MdoError::InvalidUnit { .. }));

        let inputs = vec![VarMeta::input("x").bounds(2.0, 1.0)];
        assert!(
            VarRegistry::build([ComponentVars {
                name: "c",
                inputs: &inputs,
                outputs: &[],
            }])
            .is_err()
        );
    }

    #[test]
    fn set_checks_length() {
        let outputs = vec![VarMeta::output("y").vector(2)];
        let reg = VarRegistry::build([ComponentVars {
            name: "c",
            inputs: &[],
            outputs: &outputs,
        }])
        .unwrap();
        let mut values = reg.initial_values();
        let y = reg.var(reg.resolve("c.y").unwrap());
        assert!(values.set(y, &[1.0]).is_err());
        values.set(y, &[1.0, 2.0]).unwrap();
        assert_eq!(values.get(y), &[1.0, 2.0]);
    }
}
