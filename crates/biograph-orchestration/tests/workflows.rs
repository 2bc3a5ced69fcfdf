mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use biograph_common::{ErrorClass, Paper};
use biograph_db::{EntityType, GraphEntity, VectorRecord};
use biograph_orchestration::{ConfigCheck, RunStatus, TaskStatus, WorkflowParams, WorkflowRun};
use common::{harness, harness_with, Failure, MockGenes, MockPapers};

fn fifteen_papers() -> MockPapers {
    MockPapers::new(vec![
        vec!["1", "2", "3", "4", "5"],
        vec!["6", "7", "8", "9", "10"],
        vec!["11", "12", "13", "14", "15"],
    ])
}

fn genes() -> MockGenes {
    MockGenes::new(&[("3845", "KRAS", &["1", "2"][..]), ("7157", "TP53", &["3"][..])])
}

fn status_of(run: &WorkflowRun, task: &str) -> TaskStatus {
    run.task(task).map(|t| t.status).unwrap()
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_incremental_recovers_from_transient_page() {
    let h = harness(fifteen_papers().fail_page(2, Failure::Transient), genes());

    let run = h.orchestrator.run("incremental", WorkflowParams::default()).await.unwrap();

    assert_eq!(run.status, RunStatus::Success, "{}", run.summary());
    let collect = run.task("collect-new-papers").unwrap();
    assert_eq!(collect.metrics.counters["papers_collected"], 15);
    assert_eq!(collect.metrics.calls.retries, 1);
    assert_eq!(collect.metrics.calls.attempts, 4);
    assert_eq!(collect.metrics.telemetry.len(), 1);
    assert_eq!(collect.metrics.telemetry[0].api, "literature");

    let stats = h.db.stats().await.unwrap();
    assert_eq!(stats.snapshot_papers, 15);
    assert_eq!(stats.snapshot_genes, 2);
    assert_eq!(stats.graph_papers, 15);
    assert_eq!(stats.graph_genes, 2);
    assert_eq!(stats.vectors, 15);

    let report = run.consistency.as_ref().unwrap();
    assert!(report.is_consistent(), "{}", report.summary());
    assert_eq!(run.telemetry.len(), 4);
    assert!(run.summary().contains("| collect-new-papers | success |"));
}

#[tokio::test(start_paused = true)]
async fn test_incremental_twice_is_idempotent() {
    let h = harness(fifteen_papers(), genes());

    let first = h.orchestrator.run("incremental", WorkflowParams::default()).await.unwrap();
    let after_first = h.db.stats().await.unwrap();
    let second = h.orchestrator.run("incremental", WorkflowParams::default()).await.unwrap();
    let after_second = h.db.stats().await.unwrap();

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(after_first, after_second);

    let counters = |run: &WorkflowRun, task: &str, key: &str| run.task(task).unwrap().metrics.counters[key];
    assert_eq!(counters(&second, "collect-new-papers", "snapshot_inserted"), 0);
    assert_eq!(counters(&second, "collect-new-papers", "snapshot_unchanged"), 15);
    assert_eq!(counters(&second, "merge-into-graph", "entities_inserted"), 0);
    assert_eq!(counters(&second, "merge-into-graph", "relationships_written"), 0);
    assert_eq!(counters(&second, "merge-into-vector-store", "vectors_inserted"), 0);
    assert_eq!(counters(&second, "merge-into-vector-store", "vectors_unchanged"), 15);
}

#[tokio::test(start_paused = true)]
async fn test_failed_dependency_skips_dependents_only() {
    let h = harness(fifteen_papers(), MockGenes::failing(Failure::Permanent));

    let run = h.orchestrator.run("incremental", WorkflowParams::default()).await.unwrap();

    assert_eq!(run.status, RunStatus::PartialFailure);
    assert_eq!(status_of(&run, "collect-new-papers"), TaskStatus::Success);
    let genes = run.task("collect-new-genes").unwrap();
    assert_eq!(genes.status, TaskStatus::Failed);
    assert_eq!(genes.error.as_ref().unwrap().class, ErrorClass::Permanent);
    assert_eq!(genes.metrics.calls.attempts, 1);

    let graph = run.task("merge-into-graph").unwrap();
    assert_eq!(graph.status, TaskStatus::Skipped);
    assert!(graph.reason.as_deref().unwrap().contains("collect-new-genes"));
    assert!(graph.started_at.is_none());

    assert_eq!(status_of(&run, "merge-into-vector-store"), TaskStatus::Success);
    assert_eq!(status_of(&run, "validate-consistency"), TaskStatus::Success);
    let report = run.consistency.unwrap();
    assert_eq!(report.papers.missing_in_graph.len(), 15);
    assert!(report.papers.missing_in_vectors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_skip_is_transitive_in_full_rebuild() {
    let h = harness(fifteen_papers().fail_page(0, Failure::Permanent), genes());

    let run = h.orchestrator.run("full-rebuild", WorkflowParams::default()).await.unwrap();

    assert_eq!(status_of(&run, "validate-configuration"), TaskStatus::Success);
    assert_eq!(status_of(&run, "collect-full-dataset"), TaskStatus::Failed);
    assert_eq!(status_of(&run, "rebuild-graph"), TaskStatus::Skipped);
    assert_eq!(status_of(&run, "recreate-vector-collection"), TaskStatus::Skipped);
    let reingest = run.task("reingest-all-vectors").unwrap();
    assert_eq!(reingest.status, TaskStatus::Skipped);
    assert!(reingest.reason.as_deref().unwrap().contains("recreate-vector-collection"));
    assert_eq!(status_of(&run, "validate-consistency"), TaskStatus::Success);
    assert_eq!(run.status, RunStatus::PartialFailure);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_configuration_fails_the_run() {
    let checks = vec![
        ConfigCheck::pass("data_dir", "writable"),
        ConfigCheck::fail("pubmed.email", "not set"),
    ];
    let h = harness_with(fifteen_papers(), genes(), checks);

    let run = h.orchestrator.run("full-rebuild", WorkflowParams::default()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let validate = run.task("validate-configuration").unwrap();
    assert_eq!(validate.error.as_ref().unwrap().class, ErrorClass::Config);
    assert!(validate.error.as_ref().unwrap().message.contains("pubmed.email"));
    assert_eq!(status_of(&run, "collect-full-dataset"), TaskStatus::Skipped);
    assert_eq!(h.papers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_rebuild_replaces_stale_records() {
    let h = harness(fifteen_papers(), genes());
    h.db.graph()
        .upsert_entities(vec![GraphEntity::new(EntityType::Paper, "999")])
        .await
        .unwrap();
    h.db.vectors()
        .upsert_vectors(vec![VectorRecord::new("999", vec![0.0, 0.0, 0.0, 1.0])])
        .await
        .unwrap();
    h.db.snapshot().merge_papers(vec![Paper::new("999", "stale")]).await.unwrap();

    let run = h.orchestrator.run("full-rebuild", WorkflowParams::default()).await.unwrap();

    assert_eq!(run.status, RunStatus::Success, "{}", run.summary());
    let stats = h.db.stats().await.unwrap();
    assert_eq!(stats.snapshot_papers, 15);
    assert_eq!(stats.graph_papers, 15);
    assert_eq!(stats.vectors, 15);
    assert_eq!(run.task("recreate-vector-collection").unwrap().metrics.counters["vectors_dropped"], 1);
    assert!(run.consistency.unwrap().is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_consistency_check_reports_only_missing_graph_record() {
    let h = harness(fifteen_papers(), genes());
    h.db.snapshot()
        .merge_papers(vec![Paper::new("1", "a"), Paper::new("2", "b"), Paper::new("3", "c")])
        .await
        .unwrap();
    h.db.graph()
        .upsert_entities(vec![GraphEntity::new(EntityType::Paper, "1"), GraphEntity::new(EntityType::Paper, "2")])
        .await
        .unwrap();
    h.db.vectors()
        .upsert_vectors(
            ["1", "2", "3"].iter().map(|id| VectorRecord::new(*id, vec![1.0, 0.0, 0.0, 0.0])).collect(),
        )
        .await
        .unwrap();

    let run = h.orchestrator.run("consistency-check", WorkflowParams::default()).await.unwrap();

    assert_eq!(run.status, RunStatus::Success);
    let report = run.consistency.unwrap();
    assert_eq!(report.papers.missing_in_graph, ids(&["3"]));
    assert!(report.papers.missing_in_vectors.is_empty());
    assert!(report.papers.orphaned().is_empty());
    assert!(report.genes.is_consistent());
    assert_eq!(report.mismatch_count(), 1);
    assert_eq!(h.papers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_full_rebuild_excludes_other_runs() {
    let h = harness(fifteen_papers(), genes());

    let rebuild = h.orchestrator.submit("full-rebuild", WorkflowParams::default()).await.unwrap();
    let err = h.orchestrator.submit("incremental", WorkflowParams::default()).await.err().unwrap();
    assert!(err.to_string().contains("conflicts with running full-rebuild"), "{err}");
    assert!(h.orchestrator.submit("full-rebuild", WorkflowParams::default()).await.is_err());

    assert_eq!(rebuild.wait().await.unwrap().status, RunStatus::Success);
    let run = h.orchestrator.run("incremental", WorkflowParams::default()).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_shared_runs_overlap_but_block_rebuild() {
    let h = harness(fifteen_papers(), genes());

    let incremental = h.orchestrator.submit("incremental", WorkflowParams::default()).await.unwrap();
    let check = h.orchestrator.submit("consistency-check", WorkflowParams::default()).await.unwrap();
    let err = h.orchestrator.submit("full-rebuild", WorkflowParams::default()).await.err().unwrap();
    assert!(err.to_string().contains("conflicts with running"));

    assert_eq!(incremental.wait().await.unwrap().status, RunStatus::Success);
    assert!(check.wait().await.unwrap().status.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_cancels_every_task() {
    let h = harness(fifteen_papers(), genes());

    let handle = h.orchestrator.submit("incremental", WorkflowParams::default()).await.unwrap();
    handle.cancel();
    let run = handle.wait().await.unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    assert_eq!(h.papers.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_is_live_then_final() {
    let h = harness(fifteen_papers(), genes());

    let handle = h.orchestrator.submit("incremental", WorkflowParams::with_terms(["kras"])).await.unwrap();
    let run_id = handle.run_id();
    let live = h.orchestrator.status(run_id).await.unwrap();
    assert_eq!(live.status, RunStatus::Running);
    assert_eq!(live.params.search_terms, vec!["kras".to_string()]);
    assert!(live.tasks.iter().all(|t| t.status == TaskStatus::Pending));

    handle.wait().await.unwrap();
    let done = h.orchestrator.status(run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Success);
    assert!(done.finished_at.is_some());
    assert!(h.orchestrator.status(uuid::Uuid::new_v4()).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_max_results_caps_each_term() {
    let h = harness(fifteen_papers(), genes());
    let params = WorkflowParams { max_results_per_term: Some(7), ..WorkflowParams::default() };

    let run = h.orchestrator.run("incremental", params).await.unwrap();

    assert_eq!(run.params.max_results_per_term, Some(7));
    assert_eq!(run.task("collect-new-papers").unwrap().metrics.counters["papers_collected"], 7);
    assert_eq!(h.db.stats().await.unwrap().vectors, 7);
}

#[tokio::test]
async fn test_unknown_workflow_is_rejected() {
    let h = harness(fifteen_papers(), genes());
    assert!(h.orchestrator.submit("nightly", WorkflowParams::default()).await.is_err());
    assert_eq!(h.orchestrator.workflows().unwrap().len(), 3);
}
