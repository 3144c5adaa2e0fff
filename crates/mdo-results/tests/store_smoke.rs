use mdo_results::*;

fn manifest(run_id: &str, problem: &str, timestamp: &str) -> RunManifest {
    RunManifest {
        run_id: run_id.to_string(),
        problem_name: problem.to_string(),
        timestamp: timestamp.to_string(),
        run_type: RunType::Optimization,
        solver_version: "v1".to_string(),
        status: "converged".to_string(),
        algorithm: Some("sqp".to_string()),
        evaluations: 12,
        iterations: 2,
        elapsed_s: 0.25,
        best_objective: Some(3.18),
        message: "objective change below ftol".to_string(),
    }
}

fn record(index: usize, objective: f64) -> IterateRecord {
    IterateRecord {
        index,
        evaluation: index as u64 * 3 + 1,
        elapsed_s: index as f64 * 0.1,
        objective: Some(objective),
        merit: Some(objective),
        max_violation: 0.0,
        design: vec![VariableSnapshot {
            path: "ivc.z1".to_string(),
            value: vec![5.0 - index as f64],
        }],
        constraints: vec![ResponseSnapshot {
            label: "con.g1".to_string(),
            value: -1.0,
        }],
        variables: vec![
            VariableSnapshot {
                path: "ivc.z1".to_string(),
                value: vec![5.0 - index as f64],
            },
            VariableSnapshot {
                path: "obj.f".to_string(),
                value: vec![objective],
            },
        ],
        unconverged: vec![],
        frozen: if index == 0 { vec![] } else { vec!["ivc.x".to_string()] },
    }
}

#[test]
fn save_and_load_run() {
    let temp_dir = std::env::temp_dir().join("mdo_results_test");
    let _ = std::fs::remove_dir_all(&temp_dir);
    let store = RunStore::new(temp_dir).unwrap();

    let m = manifest("run_123", "sellar", "2026-02-25T12:00:00+00:00");
    let records = vec![record(0, 28.6), record(1, 8.2), record(2, 3.18)];
    store.save_run(&m, &records).unwrap();

    assert!(store.has_run("run_123"));
    assert_eq!(store.load_manifest("run_123").unwrap(), m);
    let loaded = store.load_history("run_123").unwrap();
    assert_eq!(loaded, records);
    assert_eq!(loaded[2].variable("obj.f"), Some(&[3.18][..]));
    assert_eq!(loaded[1].frozen, vec!["ivc.x".to_string()]);
}

#[test]
fn list_runs_by_problem() {
    let temp_dir = std::env::temp_dir().join("mdo_results_test_list");
    let _ = std::fs::remove_dir_all(&temp_dir);
    let store = RunStore::new(temp_dir).unwrap();

    store
        .save_run(&manifest("b", "sellar", "2026-02-25T12:00:02+00:00"), &[])
        .unwrap();
    store
        .save_run(&manifest("a", "sellar", "2026-02-25T12:00:01+00:00"), &[])
        .unwrap();
    store
        .save_run(&manifest("c", "tower", "2026-02-25T12:00:03+00:00"), &[])
        .unwrap();

    let runs = store.list_runs("sellar").unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);

    store.delete_run("a").unwrap();
    assert!(!store.has_run("a"));
    assert!(matches!(
        store.load_manifest("a"),
        Err(ResultsError::RunNotFound { .. })
    ));
}

#[test]
fn project_store_lives_next_to_the_project() {
    let dir = std::env::temp_dir().join("mdo_results_project");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let store = RunStore::for_project(&dir.join("turbine.yaml")).unwrap();
    assert_eq!(store.root(), dir.join(".windmdo").join("runs"));
    assert!(store.root().is_dir());
}

#[test]
fn timestamps_are_rfc3339() {
    let ts = timestamp_now();
    assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "{ts}");
}
