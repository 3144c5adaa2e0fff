//! Run execution and caching service.

use std::path::Path;
use std::time::Instant;

use mdo_core::Values;
use mdo_driver::{DriverProgressEvent, Iterate, OptProblem, optimize_in};
use mdo_graph::Graph;
use mdo_project::schema::Project;
use mdo_results::{
    IterateRecord, ResponseSnapshot, RunManifest, RunStore, RunType, VariableSnapshot,
    timestamp_now,
};
use mdo_solver::evaluate;
use tracing::{info, warn};

use crate::compile::{CompiledProject, compile_project};
use crate::error::{AppError, AppResult};
use crate::factory::ComponentFactory;
use crate::progress::{RunProgressEvent, RunStage};
use crate::project_service;

/// Options for running a project.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Return a stored run with the same id instead of running again.
    pub use_cache: bool,
    /// Write the run to the store.
    pub persist: bool,
    /// Part of the run id, so results of different solver builds never mix.
    pub solver_version: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            persist: true,
            solver_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Request to run a project file; results are stored next to it.
pub struct RunRequest<'a> {
    pub project_path: &'a Path,
    pub options: RunOptions,
}

#[derive(Debug, Clone, Default)]
pub struct RunTimingSummary {
    pub compile_time_s: f64,
    pub run_time_s: f64,
    pub save_time_s: f64,
    pub load_cache_time_s: f64,
    pub total_time_s: f64,
}

#[derive(Debug, Clone)]
pub struct RunResponse {
    pub run_id: String,
    pub manifest: RunManifest,
    /// Accepted iterates; a single record for an analysis run.
    pub history: Vec<IterateRecord>,
    pub loaded_from_cache: bool,
    pub timing: RunTimingSummary,
}

impl RunResponse {
    /// Lowest-merit record, or the only record of an analysis.
    pub fn best(&self) -> Option<&IterateRecord> {
        self.history
            .iter()
            .rev()
            .min_by(|a, b| {
                let key = |r: &IterateRecord| r.merit.unwrap_or(f64::INFINITY);
                key(a).total_cmp(&key(b))
            })
    }
}

type ProgressCallback<'a> = Option<&'a mut dyn FnMut(RunProgressEvent)>;

fn emit_progress(
    progress_cb: &mut ProgressCallback<'_>,
    run_type: RunType,
    stage: RunStage,
    started: Instant,
    message: Option<String>,
    driver: Option<DriverProgressEvent>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        cb(RunProgressEvent {
            run_type,
            stage,
            elapsed_wall_s: started.elapsed().as_secs_f64(),
            message,
            driver,
        });
    }
}

/// Run a project file, or load the stored run with the same id.
pub fn run_project(request: &RunRequest, factory: &ComponentFactory) -> AppResult<RunResponse> {
    run_project_with_progress(request, factory, None)
}

pub fn run_project_with_progress(
    request: &RunRequest,
    factory: &ComponentFactory,
    mut progress_cb: ProgressCallback<'_>,
) -> AppResult<RunResponse> {
    let started = Instant::now();
    emit_progress(
        &mut progress_cb,
        RunType::Analysis,
        RunStage::LoadingProject,
        started,
        Some("Loading project".to_string()),
        None,
    );
    let project = project_service::load_project(request.project_path)?;
    let store = RunStore::for_project(request.project_path)?;
    run_loaded(&project, factory, &request.options, Some(&store), progress_cb)
}

/// Run an in-memory project. Without a store nothing is cached or persisted.
pub fn run_loaded(
    project: &Project,
    factory: &ComponentFactory,
    options: &RunOptions,
    store: Option<&RunStore>,
    mut progress_cb: ProgressCallback<'_>,
) -> AppResult<RunResponse> {
    let started = Instant::now();
    let mut timing = RunTimingSummary::default();
    project_service::validate_project(project)?;

    let run_type = if project.optimization.is_some() {
        RunType::Optimization
    } else {
        RunType::Analysis
    };

    emit_progress(
        &mut progress_cb,
        run_type,
        RunStage::CheckingCache,
        started,
        Some("Checking run cache".to_string()),
        None,
    );
    let run_id = mdo_results::compute_run_id(project, &run_type, &options.solver_version);

    if let Some(store) = store
        && options.use_cache
        && store.has_run(&run_id)
    {
        emit_progress(
            &mut progress_cb,
            run_type,
            RunStage::LoadingCachedResult,
            started,
            Some("Loading cached run".to_string()),
            None,
        );
        let load_start = Instant::now();
        let manifest = store.load_manifest(&run_id)?;
        let history = store.load_history(&run_id)?;
        timing.load_cache_time_s = load_start.elapsed().as_secs_f64();
        timing.total_time_s = started.elapsed().as_secs_f64();
        info!(run_id = run_id.as_str(), "loaded cached run");
        emit_progress(&mut progress_cb, run_type, RunStage::Completed, started, None, None);
        return Ok(RunResponse {
            run_id,
            manifest,
            history,
            loaded_from_cache: true,
            timing,
        });
    }

    emit_progress(
        &mut progress_cb,
        run_type,
        RunStage::CompilingModel,
        started,
        Some(format!("Compiling {} components", project.components.len())),
        None,
    );
    let compile_start = Instant::now();
    let compiled = compile_project(project, factory)?;
    timing.compile_time_s = compile_start.elapsed().as_secs_f64();

    let run_start = Instant::now();
    let (mut manifest, history) = match compiled.problem()? {
        None => {
            emit_progress(
                &mut progress_cb,
                run_type,
                RunStage::Evaluating,
                started,
                Some("Evaluating model".to_string()),
                None,
            );
            analyze(&compiled)?
        }
        Some(problem) => optimize_compiled(&compiled, &problem, run_type, started, &mut progress_cb)?,
    };
    timing.run_time_s = run_start.elapsed().as_secs_f64();
    manifest.run_id = run_id.clone();
    manifest.solver_version = options.solver_version.clone();

    if let Some(store) = store
        && options.persist
    {
        emit_progress(
            &mut progress_cb,
            run_type,
            RunStage::SavingResults,
            started,
            Some("Saving results".to_string()),
            None,
        );
        let save_start = Instant::now();
        store.save_run(&manifest, &history)?;
        timing.save_time_s = save_start.elapsed().as_secs_f64();
    }

    timing.total_time_s = started.elapsed().as_secs_f64();
    info!(
        run_id = run_id.as_str(),
        status = manifest.status.as_str(),
        iterations = manifest.iterations,
        evaluations = manifest.evaluations,
        total_s = timing.total_time_s,
        "run finished"
    );
    emit_progress(
        &mut progress_cb,
        run_type,
        RunStage::Completed,
        started,
        Some(manifest.status.clone()),
        None,
    );

    Ok(RunResponse {
        run_id,
        manifest,
        history,
        loaded_from_cache: false,
        timing,
    })
}

fn manifest(compiled: &CompiledProject, run_type: RunType) -> RunManifest {
    RunManifest {
        run_id: String::new(),
        problem_name: compiled.name.clone(),
        timestamp: timestamp_now(),
        run_type,
        solver_version: String::new(),
        status: String::new(),
        algorithm: None,
        evaluations: 0,
        iterations: 0,
        elapsed_s: 0.0,
        best_objective: None,
        message: String::new(),
    }
}

fn snapshot(graph: &Graph, values: &Values) -> Vec<VariableSnapshot> {
    graph
        .registry()
        .vars()
        .iter()
        .map(|v| VariableSnapshot {
            path: v.path.clone(),
            value: values.get(v).to_vec(),
        })
        .collect()
}

/// Single evaluation at the stored inputs.
fn analyze(compiled: &CompiledProject) -> AppResult<(RunManifest, Vec<IterateRecord>)> {
    let started = Instant::now();
    let mut ctx = compiled.context()?;
    let report = evaluate(&compiled.graph, &mut ctx, &compiled.eval)?;

    let unconverged: Vec<String> = report
        .unconverged()
        .map(|c| format!("[{}] {:?}", c.members.join(", "), c.state))
        .collect();
    for region in &unconverged {
        warn!(region = region.as_str(), "coupled region did not converge");
    }

    let elapsed_s = started.elapsed().as_secs_f64();
    let record = IterateRecord {
        index: 0,
        evaluation: 1,
        elapsed_s,
        objective: None,
        merit: None,
        max_violation: 0.0,
        design: Vec::new(),
        constraints: Vec::new(),
        variables: snapshot(&compiled.graph, ctx.values()),
        unconverged: unconverged.clone(),
        frozen: Vec::new(),
    };

    let mut manifest = manifest(compiled, RunType::Analysis);
    manifest.status = if unconverged.is_empty() {
        "converged".to_string()
    } else {
        "unconverged".to_string()
    };
    manifest.evaluations = 1;
    manifest.elapsed_s = elapsed_s;
    manifest.message = unconverged.join("; ");
    Ok((manifest, vec![record]))
}

fn optimize_compiled(
    compiled: &CompiledProject,
    problem: &OptProblem<'_>,
    run_type: RunType,
    started: Instant,
    progress_cb: &mut ProgressCallback<'_>,
) -> AppResult<(RunManifest, Vec<IterateRecord>)> {
    let config = compiled
        .driver_config()
        .ok_or_else(|| AppError::Compile("project has no optimization section".to_string()))?;
    emit_progress(
        progress_cb,
        run_type,
        RunStage::Optimizing,
        started,
        Some(format!("Optimizing with {}", config.algorithm.name())),
        None,
    );

    let mut ctx = compiled.context()?;
    let result = optimize_in(problem, &config, &mut ctx, &mut |event: &DriverProgressEvent| {
        emit_progress(
            progress_cb,
            run_type,
            RunStage::Optimizing,
            started,
            None,
            Some(event.clone()),
        );
    })?;

    let labels = problem.constraint_labels();
    let history = result
        .history
        .iter()
        .map(|it| iterate_record(problem, &labels, it))
        .collect();

    let mut manifest = manifest(compiled, run_type);
    manifest.status = result.status.as_str().to_string();
    manifest.algorithm = Some(config.algorithm.name().to_string());
    manifest.evaluations = result.evaluations;
    manifest.iterations = result.iterations;
    manifest.elapsed_s = result.elapsed.as_secs_f64();
    manifest.best_objective = result.best.as_ref().map(|b| b.objective);
    manifest.message = result.message;
    Ok((manifest, history))
}

fn iterate_record(problem: &OptProblem<'_>, labels: &[String], it: &Iterate) -> IterateRecord {
    let mut design = Vec::with_capacity(problem.design_vars().len());
    let mut offset = 0;
    for dv in problem.design_vars() {
        let end = offset + dv.size();
        design.push(VariableSnapshot {
            path: dv.path.clone(),
            value: it.design[offset..end].to_vec(),
        });
        offset = end;
    }

    IterateRecord {
        index: it.index,
        evaluation: it.evaluation,
        elapsed_s: it.elapsed_s,
        objective: Some(it.objective),
        merit: Some(it.merit),
        max_violation: it.max_violation,
        design,
        constraints: labels
            .iter()
            .zip(&it.constraints)
            .map(|(label, value)| ResponseSnapshot {
                label: label.clone(),
                value: *value,
            })
            .collect(),
        variables: snapshot(problem.graph(), &it.values),
        unconverged: it.flags.unconverged.clone(),
        frozen: it.flags.frozen.clone(),
    }
}

/// Stored manifest and history of a run.
pub fn load_run(store: &RunStore, run_id: &str) -> AppResult<(RunManifest, Vec<IterateRecord>)> {
    Ok((store.load_manifest(run_id)?, store.load_history(run_id)?))
}

/// Stored runs of the project at `project_path`.
pub fn list_runs(project_path: &Path) -> AppResult<Vec<RunManifest>> {
    let project = project_service::load_project(project_path)?;
    let store = RunStore::for_project(project_path)?;
    Ok(store.list_runs(&project.name)?)
}
