//! Run storage API.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::types::{IterateRecord, RunManifest};
use crate::{ResultsError, ResultsResult};

/// Directory of runs, one subdirectory per run id holding `manifest.json`
/// and `history.jsonl`.
#[derive(Clone, Debug)]
pub struct RunStore {
    root_dir: PathBuf,
}

impl RunStore {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        if !root_dir.exists() {
            fs::create_dir_all(&root_dir)?;
        }
        Ok(Self { root_dir })
    }

    /// Store next to a project file, under `.windmdo/runs`.
    pub fn for_project(project_path: &Path) -> ResultsResult<Self> {
        let project_dir = project_path
            .parent()
            .ok_or_else(|| ResultsError::InvalidPath {
                message: "project path has no parent directory".to_string(),
            })?;
        Self::new(project_dir.join(".windmdo").join("runs"))
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(run_id)
    }

    /// Path of `file` inside an existing run directory.
    fn run_file(&self, run_id: &str, file: &str) -> ResultsResult<PathBuf> {
        let path = self.run_dir(run_id).join(file);
        if path.exists() {
            Ok(path)
        } else {
            Err(ResultsError::RunNotFound {
                run_id: run_id.to_string(),
            })
        }
    }

    pub fn has_run(&self, run_id: &str) -> bool {
        self.run_dir(run_id).join("manifest.json").exists()
    }

    /// The history is written before the manifest, so a run directory with a
    /// manifest is always complete.
    pub fn save_run(&self, manifest: &RunManifest, records: &[IterateRecord]) -> ResultsResult<()> {
        let run_dir = self.run_dir(&manifest.run_id);
        fs::create_dir_all(&run_dir)?;

        let mut history = BufWriter::new(File::create(run_dir.join("history.jsonl"))?);
        for record in records {
            serde_json::to_writer(&mut history, record)?;
            history.write_all(b"\n")?;
        }
        history.flush()?;

        let mut manifest_file = BufWriter::new(File::create(run_dir.join("manifest.json"))?);
        serde_json::to_writer_pretty(&mut manifest_file, manifest)?;
        manifest_file.flush()?;
        Ok(())
    }

    pub fn load_manifest(&self, run_id: &str) -> ResultsResult<RunManifest> {
        let file = File::open(self.run_file(run_id, "manifest.json")?)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Accepted iterates in the order they were recorded.
    pub fn load_history(&self, run_id: &str) -> ResultsResult<Vec<IterateRecord>> {
        let file = File::open(self.run_file(run_id, "history.jsonl")?)?;
        BufReader::new(file)
            .lines()
            .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .map(|line| -> ResultsResult<IterateRecord> { Ok(serde_json::from_str(&line?)?) })
            .collect()
    }

    /// Manifests of the runs of one problem, oldest first. Directories
    /// without a readable manifest are skipped.
    pub fn list_runs(&self, problem_name: &str) -> ResultsResult<Vec<RunManifest>> {
        if !self.root_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match self.load_manifest(&run_id) {
                Ok(manifest) if manifest.problem_name == problem_name => runs.push(manifest),
                _ => {}
            }
        }

        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(runs)
    }

    pub fn delete_run(&self, run_id: &str) -> ResultsResult<()> {
        let run_dir = self.run_dir(run_id);
        if run_dir.exists() {
            fs::remove_dir_all(run_dir)?;
        }
        Ok(())
    }
}

/// RFC 3339 timestamp in UTC.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
