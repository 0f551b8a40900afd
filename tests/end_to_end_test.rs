//! End-to-end tests: real Python sources on disk, full build, edit, change
//! detection and test selection.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::fixtures::{DERP_PY, DERP_PY_EDITED, DERP_PY_WITHOUT_FOO, FULL_TEST_PY, write_tree};
use test_impact::adapters::fs::FileSourceReader;
use test_impact::adapters::parser::PythonOutlineParser;
use test_impact::adapters::store::{
    HISTORY_FILE, MemoryHistoryStore, MemorySnapshotStore, SNAPSHOTS_FILE, state_dir,
};
use test_impact::app::Workspace;
use test_impact::app::dto::{AffectedRequest, SelectRequest};
use test_impact::config::ImpactConfig;
use test_impact::domain::history::{ExecutionResult, TestStatus};
use test_impact::domain::selector::SelectionReason;

const FOO: &str = "derp.py:Derp.foo";
const FOO_TEST: &str = "derp.py:Derp.foo#0";
const CALLER_TEST: &str = "fullTest.py:check_derp#0";
const FIB_TEST: &str = "fullTest.py:fibonacci#0";

fn in_memory_workspace(root: &Path) -> Workspace {
    Workspace::new(
        root.to_path_buf(),
        ImpactConfig::default(),
        Arc::new(FileSourceReader::new()),
        Arc::new(PythonOutlineParser::new()),
        Box::new(MemorySnapshotStore::new()),
        Box::new(MemoryHistoryStore::new()),
    )
}

fn config_with_cache(cache: &Path) -> ImpactConfig {
    let mut config = ImpactConfig::default();
    config.workspace.cache_dir = cache.to_path_buf();
    config
}

fn derp_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[("derp.py", DERP_PY), ("fullTest.py", FULL_TEST_PY)],
    );
    dir
}

fn select_request(changed: &[&str], budget: Option<u64>) -> SelectRequest {
    SelectRequest {
        changed: changed.iter().map(|s| s.to_string()).collect(),
        time_budget_ms: budget,
        confidence_threshold: None,
    }
}

#[test]
fn test_build_finds_elements_calls_and_doctests() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    let built = ws.build_graph().unwrap();

    assert_eq!(built.stats.files, 2);
    assert!(built.parse_failures.is_empty());
    assert_eq!(built.stats.tests, 3);

    let graph = ws.graph();
    let foo = graph.element(FOO).unwrap();
    assert_eq!(foo.parent_id.as_deref(), Some("derp.py:Derp"));
    assert_eq!(foo.parameters, vec!["self", "x"]);
    assert_eq!(foo.attached_test_ids, vec![FOO_TEST]);

    let callers = graph.dependents(FOO).unwrap();
    assert!(callers.contains("fullTest.py:check_derp"));
    assert!(
        graph
            .dependencies("fullTest.py:fibonacci")
            .unwrap()
            .contains("fullTest.py:fibonacci")
    );
}

#[test]
fn test_edit_selects_direct_and_caller_tests_but_not_unrelated() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    ws.build_graph().unwrap();

    write_tree(dir.path(), &[("derp.py", DERP_PY_EDITED)]);
    let changes = ws.detect_changes("derp.py").unwrap();
    assert_eq!(changes.modified, vec![FOO]);
    assert!(changes.added.is_empty());
    assert!(changes.deleted.is_empty());

    let changed = changes.changed();
    let changed: Vec<&str> = changed.iter().map(String::as_str).collect();
    let selection = ws.select(&select_request(&changed, Some(100)));

    let direct = selection.get(FOO_TEST).unwrap();
    assert!(direct.score >= 2.0);
    assert_eq!(direct.reason, SelectionReason::DirectChange);
    assert_eq!(direct.distance, Some(0));

    let caller = selection.get(CALLER_TEST).unwrap();
    assert!(caller.score >= 1.0);
    assert_eq!(caller.distance, Some(1));

    assert!(!selection.contains(FIB_TEST));
    assert_eq!(selection.total_count, 3);
    assert_eq!(selection.entries[0].test_id, FOO_TEST);
    assert!(selection.threshold_met);
}

#[test]
fn test_high_impact_tests_survive_a_zero_budget() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    ws.build_graph().unwrap();

    let selection = ws.select(&SelectRequest {
        changed: vec![FOO.to_string()],
        time_budget_ms: Some(0),
        confidence_threshold: Some(0.0),
    });
    assert_eq!(selection.selected_count, 1);
    assert!(selection.contains(FOO_TEST));
    assert!(selection.estimated_duration_ms > 0);
    assert_eq!(selection.skipped_count, 2);
}

#[test]
fn test_higher_threshold_never_lowers_confidence() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    ws.build_graph().unwrap();

    let mut previous = 0.0;
    for threshold in [0.0, 0.5, 0.8, 0.9, 1.0] {
        let selection = ws.select(&SelectRequest {
            changed: vec![FOO.to_string()],
            time_budget_ms: Some(0),
            confidence_threshold: Some(threshold),
        });
        assert!(selection.confidence >= previous);
        assert!(selection.confidence >= threshold || !selection.threshold_met);
        previous = selection.confidence;
    }
    assert_eq!(previous, 1.0);
}

#[test]
fn test_recent_failure_promotes_an_unrelated_test() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    ws.build_graph().unwrap();
    ws.record_results(&[ExecutionResult {
        test_id: FIB_TEST.to_string(),
        status: TestStatus::Fail,
        duration_ms: 40,
        timestamp: Utc::now() - Duration::hours(1),
    }])
    .unwrap();

    let selection = ws.select(&select_request(&[FOO], Some(0)));
    let fib = selection.get(FIB_TEST).unwrap();
    assert_eq!(fib.reason, SelectionReason::RecentFailure);
    assert_eq!(fib.score, 1.5);
    assert_eq!(fib.estimated_duration_ms, 40);
}

#[test]
fn test_affected_scans_the_whole_workspace() {
    let dir = derp_workspace();
    let mut ws = in_memory_workspace(dir.path());
    ws.build_graph().unwrap();

    write_tree(dir.path(), &[("derp.py", DERP_PY_EDITED)]);
    let res = ws.affected(&AffectedRequest::default()).unwrap();
    assert_eq!(res.changes.len(), 1);
    assert_eq!(res.changes[0].path, "derp.py");
    assert!(res.selection.contains(FOO_TEST));

    // A second pass finds nothing new; only confidence backfill remains
    let again = ws.affected(&AffectedRequest::default()).unwrap();
    assert!(again.changes.is_empty());
    assert!(
        again
            .selection
            .entries
            .iter()
            .all(|e| e.reason == SelectionReason::ConfidenceBackfill)
    );
}

#[test]
fn test_state_survives_reopening_the_workspace() {
    let dir = derp_workspace();
    let cache = tempfile::tempdir().unwrap();
    let config = config_with_cache(cache.path());

    {
        let mut ws = Workspace::open(dir.path(), config.clone()).unwrap();
        ws.build_graph().unwrap();
        ws.record_results(&[ExecutionResult {
            test_id: CALLER_TEST.to_string(),
            status: TestStatus::Pass,
            duration_ms: 12,
            timestamp: Utc::now(),
        }])
        .unwrap();
        ws.close().unwrap();
    }

    let state: PathBuf = state_dir(cache.path(), &dir.path().canonicalize().unwrap());
    assert!(state.join(SNAPSHOTS_FILE).exists());
    assert!(state.join(HISTORY_FILE).exists());

    write_tree(dir.path(), &[("derp.py", DERP_PY_EDITED)]);
    let mut ws = Workspace::open(dir.path(), config).unwrap();
    ws.load_graph().unwrap();
    assert_eq!(ws.health().tracked_test_count, 1);

    let changes = ws.detect_changes("derp.py").unwrap();
    assert!(changes.had_prior_state);
    assert_eq!(changes.modified, vec![FOO]);
    assert!(ws.detect_changes("fullTest.py").unwrap().skipped);
}

#[test]
fn test_corrupt_snapshots_fall_back_to_empty_state() {
    let dir = derp_workspace();
    let cache = tempfile::tempdir().unwrap();
    let config = config_with_cache(cache.path());

    let mut ws = Workspace::open(dir.path(), config.clone()).unwrap();
    ws.build_graph().unwrap();
    ws.close().unwrap();

    let state = state_dir(cache.path(), &dir.path().canonicalize().unwrap());
    std::fs::write(state.join(SNAPSHOTS_FILE), "{ not json").unwrap();

    let mut ws = Workspace::open(dir.path(), config).unwrap();
    ws.load_graph().unwrap();
    let changes = ws.detect_changes("derp.py").unwrap();
    assert!(!changes.had_prior_state);
    assert!(changes.added.iter().any(|id| id == FOO));
    assert!(changes.deleted.is_empty());
}

#[test]
fn test_deleted_callee_on_warm_start_seeds_its_callers() {
    let dir = derp_workspace();
    let cache = tempfile::tempdir().unwrap();
    let config = config_with_cache(cache.path());

    let mut ws = Workspace::open(dir.path(), config.clone()).unwrap();
    ws.build_graph().unwrap();
    ws.close().unwrap();

    write_tree(dir.path(), &[("derp.py", DERP_PY_WITHOUT_FOO)]);

    let mut ws = Workspace::open(dir.path(), config).unwrap();
    ws.load_graph().unwrap();
    let changes = ws.detect_changes("derp.py").unwrap();
    assert_eq!(changes.deleted, vec![FOO]);
    assert!(
        changes.former_dependents[FOO].contains("fullTest.py:check_derp"),
        "{changes:?}"
    );

    let selection = ws.select(&select_request(&[FOO], Some(0)));
    assert_eq!(selection.get(CALLER_TEST).unwrap().distance, Some(1));
}
