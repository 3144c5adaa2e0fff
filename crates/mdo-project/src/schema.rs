//! Project schema definitions.

use std::collections::BTreeMap;

use mdo_core::{ConvergenceConfig, ConvergencePolicy, Shape, VarKind, VarMeta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
    #[serde(default)]
    pub solvers: SolverSettingsDef,
    /// Values assigned to unconnected inputs before the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputValueDef>,
    /// Without an optimization section the project is evaluated once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentDef {
    pub name: String,
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ComponentKind {
    /// Copies each input `x` to an output `x_out`.
    Passthrough { vars: Vec<VarDef> },
    /// `output = matrix * input + offset`.
    LinearMap {
        input: VarDef,
        output: String,
        /// Row-major.
        matrix: Vec<Vec<f64>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        offset: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_units: Option<String>,
    },
    /// Explicit equations such as `y = 2*x + 1`.
    Expression {
        equations: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        vars: Vec<VarDef>,
    },
    /// States driven to zero residuals.
    ImplicitExpression {
        residuals: Vec<ResidualDef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        vars: Vec<VarDef>,
    },
    /// Resolved by type name through the component factory of the application.
    External {
        type_name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, serde_json::Value>,
    },
}

impl ComponentKind {
    pub fn label(&self) -> &str {
        match self {
            ComponentKind::Passthrough { .. } => "Passthrough",
            ComponentKind::LinearMap { .. } => "LinearMap",
            ComponentKind::Expression { .. } => "Expression",
            ComponentKind::ImplicitExpression { .. } => "ImplicitExpression",
            ComponentKind::External { type_name, .. } => type_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidualDef {
    pub state: String,
    pub residual: String,
}

/// A scalar or a list of entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ValueDef {
    Scalar(f64),
    Array(Vec<f64>),
}

impl ValueDef {
    /// Flat entries for a variable of `size` entries; scalars are broadcast.
    pub fn expand(&self, size: usize) -> Vec<f64> {
        match self {
            ValueDef::Scalar(v) => vec![*v; size],
            ValueDef::Array(v) => v.clone(),
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            ValueDef::Scalar(_) => None,
            ValueDef::Array(v) => Some(v.len()),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            ValueDef::Scalar(v) => v.is_finite(),
            ValueDef::Array(v) => v.iter().all(|x| x.is_finite()),
        }
    }
}

/// Variable metadata as written in a project file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VarDef {
    pub name: String,
    /// Dimensions; omitted for scalars, one entry for vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

impl VarDef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn shape(&self) -> Shape {
        match self.shape.as_deref() {
            None | Some([]) => Shape::Scalar,
            Some([n]) => Shape::Vector(*n),
            Some(dims) => Shape::Array(dims.to_vec()),
        }
    }

    pub fn to_meta(&self, kind: VarKind) -> VarMeta {
        let base = match kind {
            VarKind::Input => VarMeta::input(self.name.clone()),
            VarKind::Output => VarMeta::output(self.name.clone()),
        };
        let mut meta = base.shape(self.shape());
        if let Some(units) = &self.units {
            meta = meta.units(units.clone());
        }
        if let Some(value) = &self.value {
            let n = meta.size();
            meta = meta.values(value.expand(n));
        }
        meta.lower = self.lower;
        meta.upper = self.upper;
        meta.desc(self.desc.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionDef {
    /// Output path `component.variable`.
    pub from: String,
    /// One or more input paths.
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputValueDef {
    pub path: String,
    pub value: ValueDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverSettingsDef {
    #[serde(default)]
    pub default: SolverDef,
    /// Overrides addressed by any member component of a coupled region.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<CycleSolverDef>,
    /// Evaluate independent regions concurrently.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for SolverSettingsDef {
    fn default() -> Self {
        Self {
            default: SolverDef::default(),
            cycles: Vec::new(),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSolverDef {
    pub member: String,
    #[serde(flatten)]
    pub solver: SolverDef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type")]
pub enum SolverMethodDef {
    #[default]
    GaussSeidel,
    GaussSeidelAitken,
    Newton {
        #[serde(default = "default_line_search")]
        max_line_search: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverDef {
    #[serde(default)]
    pub method: SolverMethodDef,
    #[serde(default = "default_atol")]
    pub atol: f64,
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    #[serde(default = "default_solver_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_divergence_limit")]
    pub divergence_limit: f64,
    /// Version 1 kept a single tolerance for both criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

impl Default for SolverDef {
    fn default() -> Self {
        Self {
            method: SolverMethodDef::default(),
            atol: default_atol(),
            rtol: default_rtol(),
            max_iterations: default_solver_iterations(),
            divergence_limit: default_divergence_limit(),
            tolerance: None,
        }
    }
}

impl SolverDef {
    pub fn to_config(&self) -> ConvergenceConfig {
        let policy = match self.method {
            SolverMethodDef::GaussSeidel => ConvergencePolicy::GaussSeidel { aitken: false },
            SolverMethodDef::GaussSeidelAitken => ConvergencePolicy::GaussSeidel { aitken: true },
            SolverMethodDef::Newton { max_line_search } => ConvergencePolicy::Newton { max_line_search },
        };
        ConvergenceConfig {
            policy,
            divergence_limit: self.divergence_limit,
            ..ConvergenceConfig::default()
        }
        .with_tol(self.atol, self.rtol)
        .with_max_iterations(self.max_iterations)
    }
}

fn default_true() -> bool {
    true
}

fn default_line_search() -> usize {
    10
}

fn default_atol() -> f64 {
    ConvergenceConfig::default().tol.abs
}

fn default_rtol() -> f64 {
    ConvergenceConfig::default().tol.rel
}

fn default_solver_iterations() -> usize {
    ConvergenceConfig::default().max_iterations
}

fn default_divergence_limit() -> f64 {
    ConvergenceConfig::default().divergence_limit
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationDef {
    pub design_vars: Vec<DesignVarDef>,
    pub objective: ResponseDef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintDef>,
    #[serde(default)]
    pub driver: DriverDef,
    #[serde(default)]
    pub derivatives: DerivativesDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignVarDef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<ValueDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<ValueDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<ValueDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adder: Option<f64>,
}

impl DesignVarDef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lower: None,
            upper: None,
            initial: None,
            scaler: None,
            adder: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseDef {
    pub path: String,
    /// Flat entry of a vector output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<f64>,
}

impl ResponseDef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            index: None,
            scaler: None,
        }
    }
}

/// `equals` alone, or `lower` and/or `upper`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintDef {
    #[serde(flatten)]
    pub response: ResponseDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type")]
pub enum AlgorithmDef {
    #[default]
    Sqp,
    DifferentialEvolution {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        population_size: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        f: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cr: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        penalty: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
}

/// Driver settings; unset fields keep the driver defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverDef {
    #[serde(default)]
    pub algorithm: AlgorithmDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_evaluations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xtol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<usize>,
    #[serde(default)]
    pub accept_unconverged: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DerivModeDef {
    Forward,
    Reverse,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivativesDef {
    #[serde(default)]
    pub mode: DerivModeDef,
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for DerivativesDef {
    fn default() -> Self {
        Self {
            mode: DerivModeDef::Auto,
            parallel: true,
        }
    }
}

/// Split `component.variable`.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('.')
        .filter(|(comp, var)| !comp.is_empty() && !var.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_def_to_meta() {
        let def = VarDef {
            name: "chord".to_string(),
            shape: Some(vec![3]),
            units: Some("m".to_string()),
            value: Some(ValueDef::Scalar(2.0)),
            lower: Some(0.5),
            upper: None,
            desc: "blade chord".to_string(),
        };
        let meta = def.to_meta(VarKind::Input);
        assert_eq!(meta.shape, Shape::Vector(3));
        assert_eq!(meta.default, vec![2.0; 3]);
        assert_eq!(meta.units.as_deref(), Some("m"));
        assert_eq!(meta.lower, Some(0.5));
        assert_eq!(meta.upper, None);
        assert_eq!(meta.kind, VarKind::Input);
    }

    #[test]
    fn solver_def_maps_to_config() {
        let def = SolverDef {
            method: SolverMethodDef::Newton { max_line_search: 4 },
            atol: 1e-12,
            rtol: 1e-8,
            max_iterations: 30,
            ..SolverDef::default()
        };
        let cfg = def.to_config();
        assert_eq!(cfg.policy, ConvergencePolicy::Newton { max_line_search: 4 });
        assert_eq!(cfg.tol.abs, 1e-12);
        assert_eq!(cfg.tol.rel, 1e-8);
        assert_eq!(cfg.max_iterations, 30);
        assert_eq!(SolverDef::default().to_config(), ConvergenceConfig::default());
    }

    #[test]
    fn component_kinds_are_tagged() {
        let yaml = r#"
name: sizing
kind:
  type: Expression
  equations: ["mass = rho * area * length"]
"#;
        let comp: ComponentDef = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(comp.kind, ComponentKind::Expression { ref equations, .. } if equations.len() == 1));

        let yaml = r#"
name: rotor
kind:
  type: External
  type_name: ccblade
  params: { n_sections: 20, airfoil: "naca" }
"#;
        let comp: ComponentDef = serde_yaml::from_str(yaml).unwrap();
        match comp.kind {
            ComponentKind::External { type_name, params } => {
                assert_eq!(type_name, "ccblade");
                assert_eq!(params["n_sections"], serde_json::json!(20));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn values_are_scalars_or_lists() {
        let v: ValueDef = serde_yaml::from_str("1.5").unwrap();
        assert_eq!(v.expand(2), vec![1.5, 1.5]);
        let v: ValueDef = serde_yaml::from_str("[1, 2]").unwrap();
        assert_eq!(v.len(), Some(2));
    }

    #[test]
    fn paths_need_both_parts() {
        assert_eq!(split_path("tower.mass"), Some(("tower", "mass")));
        assert_eq!(split_path("tower."), None);
        assert_eq!(split_path("mass"), None);
    }
}
