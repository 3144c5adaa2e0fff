//! Schema migration framework.

use crate::ProjectError;
use crate::schema::{Project, SolverDef};

pub const LATEST_VERSION: u32 = 2;

pub fn migrate_to_latest(mut project: Project) -> Result<Project, ProjectError> {
    while project.version < LATEST_VERSION {
        project = migrate_one_version(project)?;
    }
    Ok(project)
}

fn migrate_one_version(project: Project) -> Result<Project, ProjectError> {
    match project.version {
        1 => migrate_v1_to_v2(project),
        v => Err(ProjectError::Migration {
            what: format!("No migration path from version {}", v),
        }),
    }
}

/// Version 1 solvers carried one `tolerance` used as both the absolute and
/// the relative criterion.
fn migrate_v1_to_v2(mut project: Project) -> Result<Project, ProjectError> {
    fn split(solver: &mut SolverDef) {
        if let Some(tol) = solver.tolerance.take() {
            solver.atol = tol;
            solver.rtol = tol;
        }
    }

    split(&mut project.solvers.default);
    for cycle in &mut project.solvers.cycles {
        split(&mut cycle.solver);
    }

    project.version = 2;
    Ok(project)
}
