//! Compile a project definition into a runnable graph, optimization problem
//! and driver settings.

use std::time::Duration;

use mdo_components::{Component, ExprComponent, ImplicitExpr, LinearMap, Passthrough};
use mdo_core::{VarId, VarKind};
use mdo_derivs::{DerivMode, DerivOptions};
use mdo_driver::{Algorithm, ConstraintBound, DeConfig, DriverConfig, OptProblem, Response, SqpConfig};
use mdo_graph::{Graph, GraphBuilder};
use mdo_project::schema::{
    AlgorithmDef, ComponentDef, ComponentKind, ConstraintDef, DerivModeDef, OptimizationDef,
    Project, ResponseDef,
};
use mdo_solver::{EvaluateOptions, RunContext};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::factory::{ComponentFactory, ComponentParams};

/// A project turned into a validated graph.
#[derive(Debug)]
pub struct CompiledProject {
    pub name: String,
    pub graph: Graph,
    pub eval: EvaluateOptions,
    pub optimization: Option<OptimizationDef>,
    inputs: Vec<(VarId, Vec<f64>)>,
}

impl CompiledProject {
    /// Fresh run context holding the declared defaults and the project's
    /// input values.
    pub fn context(&self) -> AppResult<RunContext> {
        let mut ctx = RunContext::new(&self.graph);
        for (id, value) in &self.inputs {
            ctx.set(&self.graph, *id, value)?;
        }
        Ok(ctx)
    }

    /// `None` for analysis-only projects.
    pub fn problem(&self) -> AppResult<Option<OptProblem<'_>>> {
        self.optimization
            .as_ref()
            .map(|opt| build_problem(&self.graph, &self.name, opt))
            .transpose()
    }

    pub fn driver_config(&self) -> Option<DriverConfig> {
        self.optimization
            .as_ref()
            .map(|opt| driver_config(opt, self.eval))
    }
}

pub fn compile_project(project: &Project, factory: &ComponentFactory) -> AppResult<CompiledProject> {
    let mut builder = GraphBuilder::new();
    for def in &project.components {
        builder.add_component(def.name.clone(), build_component(def, factory)?);
    }
    for conn in &project.connections {
        builder.connect_many(&conn.from, &conn.to);
    }
    builder.default_solver(project.solvers.default.to_config());
    for cycle in &project.solvers.cycles {
        builder.cycle_solver(cycle.member.clone(), cycle.solver.to_config());
    }
    let graph = builder.build()?;

    let mut inputs = Vec::with_capacity(project.inputs.len());
    for input in &project.inputs {
        let id = graph.resolve(&input.path)?;
        let var = graph.var(id);
        if !graph.is_free_input(id) {
            return Err(AppError::Compile(format!(
                "input value for '{}': not an unconnected input",
                input.path
            )));
        }
        let value = input.value.expand(var.size());
        if value.len() != var.size() {
            return Err(AppError::Compile(format!(
                "input value for '{}' has {} entries, the variable has {}",
                input.path,
                value.len(),
                var.size()
            )));
        }
        inputs.push((id, value));
    }

    info!(
        project = project.name.as_str(),
        components = graph.component_count(),
        regions = graph.regions().len(),
        coupled = graph.regions().iter().filter(|r| r.is_coupled()).count(),
        "compiled project"
    );

    Ok(CompiledProject {
        name: project.name.clone(),
        graph,
        eval: EvaluateOptions {
            parallel: project.solvers.parallel,
        },
        optimization: project.optimization.clone(),
        inputs,
    })
}

/// Instantiate one component; `External` kinds go through `factory`.
pub fn build_component(def: &ComponentDef, factory: &ComponentFactory) -> AppResult<Box<dyn Component>> {
    debug!(component = def.name.as_str(), kind = def.kind.label(), "building component");
    let component: Box<dyn Component> = match &def.kind {
        ComponentKind::Passthrough { vars } => Box::new(Passthrough::new(
            vars.iter().map(|v| v.to_meta(VarKind::Input)).collect(),
        )),
        ComponentKind::LinearMap {
            input,
            output,
            matrix,
            offset,
            output_units,
        } => {
            let rows = matrix.len();
            let cols = matrix.first().map_or(0, Vec::len);
            let flat: Vec<f64> = matrix.iter().flatten().copied().collect();
            if flat.len() != rows * cols {
                return Err(AppError::Compile(format!(
                    "component '{}': matrix rows differ in length",
                    def.name
                )));
            }
            let a = DMatrix::from_row_slice(rows, cols, &flat);
            let b = if offset.is_empty() {
                DVector::zeros(rows)
            } else {
                DVector::from_column_slice(offset)
            };
            let mut map = LinearMap::new(input.to_meta(VarKind::Input), output.clone(), a, b)?;
            if let Some(units) = output_units {
                map = map.output_units(units.clone());
            }
            Box::new(map)
        }
        ComponentKind::Expression { equations, vars } => {
            let mut comp = ExprComponent::new(equations)?;
            for v in vars {
                comp = comp.var(v.to_meta(VarKind::Input))?;
            }
            Box::new(comp)
        }
        ComponentKind::ImplicitExpression { residuals, vars } => {
            let pairs: Vec<(&str, &str)> = residuals
                .iter()
                .map(|r| (r.state.as_str(), r.residual.as_str()))
                .collect();
            let mut comp = ImplicitExpr::new(&pairs)?;
            for v in vars {
                comp = comp.var(v.to_meta(VarKind::Input))?;
            }
            Box::new(comp)
        }
        ComponentKind::External { type_name, params } => {
            let params = ComponentParams::new(&def.name, params);
            match factory.build(type_name, &params) {
                Some(Ok(comp)) => comp,
                Some(Err(e)) => {
                    return Err(AppError::Compile(format!("component '{}': {e}", def.name)));
                }
                None => {
                    return Err(AppError::UnknownComponentType {
                        component: def.name.clone(),
                        type_name: type_name.clone(),
                    });
                }
            }
        }
    };
    Ok(component)
}

fn apply_response(response: &mut Response, def: &ResponseDef) {
    if let Some(i) = def.index {
        response.index(i);
    }
    if let Some(s) = def.scaler {
        response.scaler(s);
    }
}

fn constraint_bound(c: &ConstraintDef) -> AppResult<ConstraintBound> {
    Ok(match (c.lower, c.upper, c.equals) {
        (None, None, Some(target)) => ConstraintBound::Equals(target),
        (Some(lower), Some(upper), None) => ConstraintBound::Range { lower, upper },
        (Some(lower), None, None) => ConstraintBound::Lower(lower),
        (None, Some(upper), None) => ConstraintBound::Upper(upper),
        _ => {
            return Err(AppError::Compile(format!(
                "constraint '{}' needs equals alone or lower and/or upper",
                c.response.path
            )));
        }
    })
}

/// Resolve design variables, objective and constraints against `graph`.
pub fn build_problem<'g>(
    graph: &'g Graph,
    name: &str,
    opt: &OptimizationDef,
) -> AppResult<OptProblem<'g>> {
    let mut problem = OptProblem::new(graph, name);
    for def in &opt.design_vars {
        let dv = problem.design_var(&def.path)?;
        let n = dv.size();
        if let Some(lower) = &def.lower {
            dv.lower = lower.expand(n);
        }
        if let Some(upper) = &def.upper {
            dv.upper = upper.expand(n);
        }
        if let Some(initial) = &def.initial {
            dv.initial(initial.expand(n));
        }
        dv.scaling(def.scaler.unwrap_or(1.0), def.adder.unwrap_or(0.0));
    }

    apply_response(problem.objective(&opt.objective.path)?, &opt.objective);
    for c in &opt.constraints {
        let bound = constraint_bound(c)?;
        apply_response(problem.constraint(&c.response.path, bound)?, &c.response);
    }
    problem.validate()?;
    Ok(problem)
}

/// Driver settings with unset project fields left at the driver defaults.
pub fn driver_config(opt: &OptimizationDef, eval: EvaluateOptions) -> DriverConfig {
    let d = &opt.driver;
    let defaults = DriverConfig::default();
    let algorithm = match &d.algorithm {
        AlgorithmDef::Sqp => Algorithm::Sqp(SqpConfig::default()),
        AlgorithmDef::DifferentialEvolution {
            population_size,
            f,
            cr,
            penalty,
            seed,
        } => {
            let base = DeConfig::default();
            Algorithm::DifferentialEvolution(DeConfig {
                population_size: population_size.unwrap_or(base.population_size),
                f: f.unwrap_or(base.f),
                cr: cr.unwrap_or(base.cr),
                penalty: penalty.unwrap_or(base.penalty),
                seed: *seed,
                ..base
            })
        }
    };
    let mode = match opt.derivatives.mode {
        DerivModeDef::Forward => DerivMode::Forward,
        DerivModeDef::Reverse => DerivMode::Reverse,
        DerivModeDef::Auto => DerivMode::Auto,
    };

    DriverConfig {
        algorithm,
        max_iterations: d.max_iterations.unwrap_or(defaults.max_iterations),
        max_evaluations: d.max_evaluations.unwrap_or(defaults.max_evaluations),
        ftol: d.ftol.unwrap_or(defaults.ftol),
        xtol: d.xtol.unwrap_or(defaults.xtol),
        ctol: d.ctol.unwrap_or(defaults.ctol),
        timeout: d.timeout_s.map(Duration::from_secs_f64),
        max_failures: d.max_failures.unwrap_or(defaults.max_failures),
        accept_unconverged: d.accept_unconverged,
        deriv: DerivOptions {
            mode,
            parallel: opt.derivatives.parallel,
        },
        eval,
    }
}
