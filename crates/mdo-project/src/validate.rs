//! Project validation logic.

use std::collections::HashSet;

use mdo_core::Unit;

use crate::schema::{
    AlgorithmDef, ComponentDef, ComponentKind, ConstraintDef, DesignVarDef, DriverDef,
    OptimizationDef, Project, ResponseDef, SolverDef, ValueDef, VarDef, split_path,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate ID: {id} in {context}")]
    DuplicateId { id: String, context: String },

    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub fn validate_project(project: &Project) -> Result<(), ValidationError> {
    if project.version > crate::migrate::LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: project.version,
        });
    }

    let mut names = HashSet::new();
    for component in &project.components {
        if !names.insert(component.name.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: component.name.clone(),
                context: "components".to_string(),
            });
        }
        validate_component(component)?;
    }

    let mut targets = HashSet::new();
    for conn in &project.connections {
        check_path(&conn.from, &names, "connection source")?;
        if conn.to.is_empty() {
            return Err(invalid(
                format!("connection from '{}'", conn.from),
                "[]",
                "needs at least one target",
            ));
        }
        for to in &conn.to {
            check_path(to, &names, "connection target")?;
            if !targets.insert(to.as_str()) {
                return Err(ValidationError::DuplicateId {
                    id: to.clone(),
                    context: "connection targets".to_string(),
                });
            }
        }
    }

    validate_solver(&project.solvers.default, "solvers.default", project.version)?;
    let mut members = HashSet::new();
    for cycle in &project.solvers.cycles {
        if !names.contains(cycle.member.as_str()) {
            return Err(ValidationError::MissingReference {
                id: cycle.member.clone(),
                context: "cycle solver member".to_string(),
            });
        }
        if !members.insert(cycle.member.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: cycle.member.clone(),
                context: "cycle solvers".to_string(),
            });
        }
        validate_solver(
            &cycle.solver,
            &format!("cycle solver '{}'", cycle.member),
            project.version,
        )?;
    }

    for input in &project.inputs {
        check_path(&input.path, &names, "input value")?;
        if !input.value.is_finite() {
            return Err(invalid(
                format!("input '{}'", input.path),
                format!("{:?}", input.value),
                "must be finite",
            ));
        }
    }

    if let Some(opt) = &project.optimization {
        validate_optimization(opt, &names)?;
    }

    Ok(())
}

fn check_path(path: &str, names: &HashSet<&str>, context: &str) -> Result<(), ValidationError> {
    let Some((comp, _)) = split_path(path) else {
        return Err(invalid(context, path, "expected 'component.variable'"));
    };
    if !names.contains(comp) {
        return Err(ValidationError::MissingReference {
            id: comp.to_string(),
            context: format!("{context} '{path}'"),
        });
    }
    Ok(())
}

fn validate_component(component: &ComponentDef) -> Result<(), ValidationError> {
    let name = &component.name;
    if name.is_empty() || name.contains('.') {
        return Err(invalid("component name", name, "must be non-empty and contain no '.'"));
    }

    match &component.kind {
        ComponentKind::Passthrough { vars } => {
            if vars.is_empty() {
                return Err(invalid(
                    format!("component '{name}' vars"),
                    "[]",
                    "a passthrough needs at least one variable",
                ));
            }
            validate_vars(vars, name)?;
        }
        ComponentKind::LinearMap {
            input,
            output,
            matrix,
            offset,
            output_units,
        } => {
            validate_var(input, name)?;
            if output.is_empty() {
                return Err(invalid(format!("component '{name}' output"), output, "must be named"));
            }
            let cols = matrix.first().map_or(0, Vec::len);
            if cols == 0 || matrix.iter().any(|row| row.len() != cols) {
                return Err(invalid(
                    format!("component '{name}' matrix"),
                    format!("{} rows", matrix.len()),
                    "must be non-empty with rows of equal length",
                ));
            }
            if matrix.iter().flatten().any(|v| !v.is_finite()) {
                return Err(invalid(format!("component '{name}' matrix"), "non-finite", "must be finite"));
            }
            if !offset.is_empty() && offset.len() != matrix.len() {
                return Err(invalid(
                    format!("component '{name}' offset"),
                    offset.len(),
                    "must have one entry per matrix row",
                ));
            }
            let size = input.shape().size();
            if size != cols {
                return Err(invalid(
                    format!("component '{name}' input '{}'", input.name),
                    size,
                    "entry count must equal the matrix column count",
                ));
            }
            if let Some(units) = output_units {
                validate_units(units, &format!("component '{name}' output"))?;
            }
        }
        ComponentKind::Expression { equations, vars } => {
            if equations.is_empty() || equations.iter().any(|e| e.trim().is_empty()) {
                return Err(invalid(
                    format!("component '{name}' equations"),
                    equations.len(),
                    "needs at least one non-empty equation",
                ));
            }
            validate_vars(vars, name)?;
        }
        ComponentKind::ImplicitExpression { residuals, vars } => {
            if residuals.is_empty() {
                return Err(invalid(
                    format!("component '{name}' residuals"),
                    0,
                    "needs at least one residual",
                ));
            }
            let mut states = HashSet::new();
            for r in residuals {
                if !states.insert(r.state.as_str()) {
                    return Err(ValidationError::DuplicateId {
                        id: r.state.clone(),
                        context: format!("component '{name}' states"),
                    });
                }
            }
            validate_vars(vars, name)?;
        }
        ComponentKind::External { type_name, .. } => {
            if type_name.trim().is_empty() {
                return Err(invalid(format!("component '{name}' type_name"), type_name, "must be named"));
            }
        }
    }
    Ok(())
}

fn validate_vars(vars: &[VarDef], component: &str) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for var in vars {
        if !seen.insert(var.name.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: var.name.clone(),
                context: format!("component '{component}' variables"),
            });
        }
        validate_var(var, component)?;
    }
    Ok(())
}

fn validate_var(var: &VarDef, component: &str) -> Result<(), ValidationError> {
    let field = format!("component '{component}' variable '{}'", var.name);
    if var.name.is_empty() || var.name.contains('.') {
        return Err(invalid(field, &var.name, "must be non-empty and contain no '.'"));
    }
    if var.shape.as_ref().is_some_and(|dims| dims.contains(&0)) {
        return Err(invalid(format!("{field} shape"), format!("{:?}", var.shape), "dimensions must be positive"));
    }
    if let Some(units) = &var.units {
        validate_units(units, &field)?;
    }
    if let Some(value) = &var.value {
        let size = var.shape().size();
        if value.len().is_some_and(|n| n != size) {
            return Err(invalid(format!("{field} value"), format!("{value:?}"), "length must match the shape"));
        }
        if !value.is_finite() {
            return Err(invalid(format!("{field} value"), format!("{value:?}"), "must be finite"));
        }
    }
    if let (Some(lo), Some(hi)) = (var.lower, var.upper) {
        if lo > hi {
            return Err(invalid(format!("{field} bounds"), format!("[{lo}, {hi}]"), "lower exceeds upper"));
        }
    }
    Ok(())
}

fn validate_units(units: &str, field: &str) -> Result<(), ValidationError> {
    Unit::parse(units)
        .map(|_| ())
        .map_err(|e| invalid(format!("{field} units"), units, &e.to_string()))
}

fn validate_solver(solver: &SolverDef, field: &str, version: u32) -> Result<(), ValidationError> {
    if version >= 2 && solver.tolerance.is_some() {
        return Err(invalid(
            format!("{field} tolerance"),
            format!("{:?}", solver.tolerance),
            "replaced by atol and rtol",
        ));
    }
    solver
        .to_config()
        .validate()
        .map_err(|e| invalid(field, format!("{:?}", solver.method), &e.to_string()))
}

fn validate_optimization(opt: &OptimizationDef, names: &HashSet<&str>) -> Result<(), ValidationError> {
    if opt.design_vars.is_empty() {
        return Err(invalid("optimization design_vars", "[]", "needs at least one design variable"));
    }
    let mut paths = HashSet::new();
    for dv in &opt.design_vars {
        check_path(&dv.path, names, "design variable")?;
        if !paths.insert(dv.path.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: dv.path.clone(),
                context: "design variables".to_string(),
            });
        }
        validate_design_var(dv)?;
    }

    validate_response(&opt.objective, names, "objective")?;
    for c in &opt.constraints {
        validate_constraint(c, names)?;
    }
    validate_driver(&opt.driver)
}

fn validate_design_var(dv: &DesignVarDef) -> Result<(), ValidationError> {
    let field = format!("design variable '{}'", dv.path);
    if let Some(scaler) = dv.scaler {
        if !(scaler.is_finite() && scaler > 0.0) {
            return Err(invalid(format!("{field} scaler"), scaler, "must be positive and finite"));
        }
    }
    if dv.adder.is_some_and(|a| !a.is_finite()) {
        return Err(invalid(format!("{field} adder"), format!("{:?}", dv.adder), "must be finite"));
    }
    let lens = [&dv.lower, &dv.upper, &dv.initial]
        .into_iter()
        .flatten()
        .filter_map(ValueDef::len)
        .collect::<Vec<_>>();
    if lens.windows(2).any(|w| w[0] != w[1]) {
        return Err(invalid(field, format!("{lens:?}"), "bounds and initial value differ in length"));
    }
    if let (Some(lo), Some(hi)) = (&dv.lower, &dv.upper) {
        let n = lens.first().copied().unwrap_or(1);
        let violated = lo.expand(n).iter().zip(hi.expand(n)).any(|(l, h)| *l > h);
        if violated {
            return Err(invalid(format!("{field} bounds"), format!("{lo:?} > {hi:?}"), "lower exceeds upper"));
        }
    }
    if dv.initial.as_ref().is_some_and(|v| !v.is_finite()) {
        return Err(invalid(format!("{field} initial"), "non-finite", "must be finite"));
    }
    Ok(())
}

fn validate_response(r: &ResponseDef, names: &HashSet<&str>, context: &str) -> Result<(), ValidationError> {
    check_path(&r.path, names, context)?;
    if let Some(scaler) = r.scaler {
        if !(scaler.is_finite() && scaler > 0.0) {
            return Err(invalid(format!("{context} '{}' scaler", r.path), scaler, "must be positive and finite"));
        }
    }
    Ok(())
}

fn validate_constraint(c: &ConstraintDef, names: &HashSet<&str>) -> Result<(), ValidationError> {
    validate_response(&c.response, names, "constraint")?;
    let field = format!("constraint '{}'", c.response.path);
    let given = [c.lower, c.upper, c.equals];
    if given.iter().flatten().any(|v| !v.is_finite()) {
        return Err(invalid(field, format!("{given:?}"), "bounds must be finite"));
    }
    match (c.lower, c.upper, c.equals) {
        (None, None, None) => Err(invalid(field, "none", "needs lower, upper or equals")),
        (_, _, Some(_)) if c.lower.is_some() || c.upper.is_some() => {
            Err(invalid(field, format!("{given:?}"), "equals excludes lower and upper"))
        }
        (Some(lo), Some(hi), None) if lo > hi => {
            Err(invalid(field, format!("[{lo}, {hi}]"), "lower exceeds upper"))
        }
        _ => Ok(()),
    }
}

fn validate_driver(driver: &DriverDef) -> Result<(), ValidationError> {
    let positive = |name: &str, v: Option<f64>| match v {
        Some(v) if !(v.is_finite() && v > 0.0) => {
            Err(invalid(format!("driver {name}"), v, "must be positive and finite"))
        }
        _ => Ok(()),
    };
    positive("ftol", driver.ftol)?;
    positive("xtol", driver.xtol)?;
    positive("ctol", driver.ctol)?;
    if let Some(t) = driver.timeout_s {
        if !(t.is_finite() && t >= 0.0) {
            return Err(invalid("driver timeout_s", t, "must be non-negative and finite"));
        }
    }
    for (name, v) in [
        ("max_iterations", driver.max_iterations),
        ("max_evaluations", driver.max_evaluations),
        ("max_failures", driver.max_failures),
    ] {
        if v == Some(0) {
            return Err(invalid(format!("driver {name}"), 0, "must be at least 1"));
        }
    }

    if let AlgorithmDef::DifferentialEvolution { f, cr, penalty, .. } = &driver.algorithm {
        if let Some(f) = f {
            if !(*f > 0.0 && *f <= 2.0) {
                return Err(invalid("differential evolution f", f, "must be in (0, 2]"));
            }
        }
        if let Some(cr) = cr {
            if !(0.0..=1.0).contains(cr) {
                return Err(invalid("differential evolution cr", cr, "must be in [0, 1]"));
            }
        }
        positive("differential evolution penalty", *penalty)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConnectionDef, CycleSolverDef, ResidualDef};

    fn project() -> Project {
        Project {
            version: 2,
            name: "tower".to_string(),
            components: vec![
                ComponentDef {
                    name: "geom".to_string(),
                    kind: ComponentKind::Passthrough {
                        vars: vec![VarDef {
                            units: Some("m".to_string()),
                            ..VarDef::named("height")
                        }],
                    },
                },
                ComponentDef {
                    name: "mass".to_string(),
                    kind: ComponentKind::Expression {
                        equations: vec!["m = 7850 * 0.3 * h".to_string()],
                        vars: vec![],
                    },
                },
            ],
            connections: vec![ConnectionDef {
                from: "geom.height_out".to_string(),
                to: vec!["mass.h".to_string()],
            }],
            solvers: Default::default(),
            inputs: vec![],
            optimization: None,
        }
    }

    #[test]
    fn valid_project_passes() {
        validate_project(&project()).unwrap();
    }

    #[test]
    fn duplicate_components_are_rejected() {
        let mut p = project();
        p.components.push(p.components[0].clone());
        assert!(matches!(validate_project(&p), Err(ValidationError::DuplicateId { .. })));
    }

    #[test]
    fn connections_reference_known_components() {
        let mut p = project();
        p.connections[0].to.push("hub.h".to_string());
        assert!(matches!(validate_project(&p), Err(ValidationError::MissingReference { .. })));

        let mut p = project();
        p.connections.push(ConnectionDef {
            from: "geom.height_out".to_string(),
            to: vec!["mass.h".to_string()],
        });
        assert!(matches!(validate_project(&p), Err(ValidationError::DuplicateId { .. })));
    }

    #[test]
    fn bad_units_are_rejected() {
        let mut p = project();
        if let ComponentKind::Passthrough { vars } = &mut p.components[0].kind {
            vars[0].units = Some("furlongs**".to_string());
        }
        assert!(matches!(validate_project(&p), Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn legacy_tolerance_is_rejected_at_latest_version() {
        let mut p = project();
        p.solvers.default.tolerance = Some(1e-8);
        assert!(validate_project(&p).is_err());
    }

    #[test]
    fn cycle_solvers_name_a_component() {
        let mut p = project();
        p.solvers.cycles.push(CycleSolverDef {
            member: "nacelle".to_string(),
            solver: SolverDef::default(),
        });
        assert!(matches!(validate_project(&p), Err(ValidationError::MissingReference { .. })));
    }

    #[test]
    fn implicit_states_are_unique() {
        let mut p = project();
        p.components.push(ComponentDef {
            name: "balance".to_string(),
            kind: ComponentKind::ImplicitExpression {
                residuals: vec![
                    ResidualDef {
                        state: "x".to_string(),
                        residual: "x - 1".to_string(),
                    },
                    ResidualDef {
                        state: "x".to_string(),
                        residual: "x - 2".to_string(),
                    },
                ],
                vars: vec![],
            },
        });
        assert!(matches!(validate_project(&p), Err(ValidationError::DuplicateId { .. })));
    }

    #[test]
    fn linear_map_shapes_must_agree() {
        let mut p = project();
        p.components.push(ComponentDef {
            name: "loads".to_string(),
            kind: ComponentKind::LinearMap {
                input: VarDef {
                    shape: Some(vec![3]),
                    ..VarDef::named("f")
                },
                output: "m".to_string(),
                matrix: vec![vec![1.0, 2.0]],
                offset: vec![],
                output_units: None,
            },
        });
        assert!(validate_project(&p).is_err());
    }

    #[test]
    fn constraints_need_a_consistent_bound() {
        let names: HashSet<&str> = ["mass"].into_iter().collect();
        let base = ConstraintDef {
            response: ResponseDef::new("mass.m"),
            lower: None,
            upper: None,
            equals: None,
        };
        assert!(validate_constraint(&base, &names).is_err());
        let both = ConstraintDef {
            lower: Some(1.0),
            equals: Some(2.0),
            ..base.clone()
        };
        assert!(validate_constraint(&both, &names).is_err());
        let range = ConstraintDef {
            lower: Some(3.0),
            upper: Some(1.0),
            ..base.clone()
        };
        assert!(validate_constraint(&range, &names).is_err());
        let ok = ConstraintDef {
            upper: Some(1e5),
            ..base
        };
        validate_constraint(&ok, &names).unwrap();
    }

    #[test]
    fn design_variables_are_checked() {
        let mut dv = DesignVarDef::new("geom.height");
        dv.lower = Some(ValueDef::Array(vec![0.0, 1.0]));
        dv.upper = Some(ValueDef::Array(vec![1.0]));
        assert!(validate_design_var(&dv).is_err());

        let mut dv = DesignVarDef::new("geom.height");
        dv.lower = Some(ValueDef::Scalar(5.0));
        dv.upper = Some(ValueDef::Scalar(1.0));
        assert!(validate_design_var(&dv).is_err());

        let mut dv = DesignVarDef::new("geom.height");
        dv.scaler = Some(0.0);
        assert!(validate_design_var(&dv).is_err());
    }

    #[test]
    fn driver_settings_are_checked() {
        let de = DriverDef {
            algorithm: AlgorithmDef::DifferentialEvolution {
                population_size: None,
                f: Some(2.5),
                cr: None,
                penalty: None,
                seed: None,
            },
            ..DriverDef::default()
        };
        assert!(validate_driver(&de).is_err());
        let zero = DriverDef {
            max_evaluations: Some(0),
            ..DriverDef::default()
        };
        assert!(validate_driver(&zero).is_err());
        validate_driver(&DriverDef::default()).unwrap();
    }
}
