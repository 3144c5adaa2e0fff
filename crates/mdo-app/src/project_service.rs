//! Project loading, saving, validation, and introspection.

use std::path::Path;

use mdo_project::schema::{ComponentKind, Project};

use crate::error::{AppError, AppResult};

/// Overview of a project for listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub name: String,
    pub version: u32,
    pub component_count: usize,
    pub connection_count: usize,
    pub external_types: Vec<String>,
    pub design_var_count: usize,
    pub constraint_count: usize,
}

enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> AppResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Ok(Format::Yaml),
        Some("json") => Ok(Format::Json),
        _ => Err(AppError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Load, migrate and validate a YAML or JSON project file.
pub fn load_project(path: &Path) -> AppResult<Project> {
    let format = format_of(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| AppError::ProjectFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let project = match format {
        Format::Yaml => mdo_project::from_yaml_str(&content)?,
        Format::Json => mdo_project::from_json_str(&content)?,
    };
    Ok(project)
}

/// Save a project in the format given by the file extension.
pub fn save_project(path: &Path, project: &Project) -> AppResult<()> {
    match format_of(path)? {
        Format::Yaml => mdo_project::save_yaml(path, project)?,
        Format::Json => mdo_project::save_json(path, project)?,
    }
    Ok(())
}

pub fn validate_project(project: &Project) -> AppResult<()> {
    mdo_project::validate_project(project)
        .map_err(|e| AppError::Project(mdo_project::ProjectError::from(e).to_string()))
}

pub fn summarize(project: &Project) -> ProjectSummary {
    let mut external_types: Vec<String> = project
        .components
        .iter()
        .filter_map(|c| match &c.kind {
            ComponentKind::External { type_name, .. } => Some(type_name.clone()),
            _ => None,
        })
        .collect();
    external_types.sort();
    external_types.dedup();

    let opt = project.optimization.as_ref();
    ProjectSummary {
        name: project.name.clone(),
        version: project.version,
        component_count: project.components.len(),
        connection_count: project.connections.iter().map(|c| c.to.len()).sum(),
        external_types,
        design_var_count: opt.map_or(0, |o| o.design_vars.len()),
        constraint_count: opt.map_or(0, |o| o.constraints.len()),
    }
}
