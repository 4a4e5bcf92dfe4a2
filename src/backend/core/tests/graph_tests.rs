//! Integration tests for dependency closure resolution.
//!
//! Tests cover:
//! - Transitive dependencies and minimum depths
//! - Cycle termination without self edges
//! - Partial results when the artifact source fails
//! - Reuse of already-resolved artifacts, and re-fetching after publication
//! - The closure size bound
//! - Forward and reverse graph views

mod common;

use common::*;

use cascade_core::graph::StaticArtifactSource;
use cascade_core::types::ArtifactId;

fn depths(entries: &[cascade_core::db::ClosureEntry]) -> Vec<(u64, u32)> {
    entries.iter().map(|e| (e.artifact.local_id, e.depth)).collect()
}

// ============================================================================
// Closure Shape
// ============================================================================

#[tokio::test]
async fn test_no_dependencies_gives_empty_closure() {
    let h = harness().await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert!(report.dependencies.is_empty());
    assert!(report.is_complete());
    assert_eq!(report.visited, 1);
}

#[tokio::test]
async fn test_chain_includes_transitive_dependency() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), Some("0xa"), vec![artifact(2)])
        .with_artifact(artifact(2), Some("0xb"), vec![artifact(3)])
        .with_artifact(artifact(3), Some("0xc"), vec![]);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert_eq!(depths(&report.dependencies), vec![(2, 1), (3, 2)]);
    assert_eq!(report.visited, 3);
    assert_eq!(report.fetched, 3);
    assert!(!report.cyclic);
}

#[tokio::test]
async fn test_diamond_keeps_shortest_depth() {
    // R -> B, R -> C, B -> C
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2), artifact(3)])
        .with_artifact(artifact(2), None, vec![artifact(3)]);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert_eq!(depths(&report.dependencies), vec![(2, 1), (3, 1)]);
}

#[tokio::test]
async fn test_long_path_discovered_first_is_reminimized() {
    // R -> 11 -> 12 -> 13 -> 14, and R -> 14 directly.
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(10), None, vec![artifact(11), artifact(14)])
        .with_artifact(artifact(11), None, vec![artifact(12)])
        .with_artifact(artifact(12), None, vec![artifact(13)])
        .with_artifact(artifact(13), None, vec![artifact(14)]);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(10)).await.unwrap();

    assert_eq!(
        depths(&report.dependencies),
        vec![(11, 1), (14, 1), (12, 2), (13, 3)]
    );
}

#[tokio::test]
async fn test_cycle_terminates_without_self_edges() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2)])
        .with_artifact(artifact(2), None, vec![artifact(1)]);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();
    assert!(report.cyclic);
    assert_eq!(depths(&report.dependencies), vec![(2, 1)]);

    let reverse = h.resolver.resolve_dependencies(&artifact(2)).await.unwrap();
    assert_eq!(depths(&reverse.dependencies), vec![(1, 1)]);
}

#[tokio::test]
async fn test_self_dependency_is_ignored() {
    let source =
        StaticArtifactSource::new().with_artifact(artifact(1), None, vec![artifact(1), artifact(2)]);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert_eq!(depths(&report.dependencies), vec![(2, 1)]);
}

// ============================================================================
// Upstream Failures
// ============================================================================

#[tokio::test]
async fn test_failing_branch_keeps_siblings() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2), artifact(3)])
        .with_artifact(artifact(2), None, vec![artifact(4)])
        .with_artifact(artifact(3), None, vec![artifact(5)]);
    source.set_failing(artifact(3), true);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert_eq!(report.upstream_failures, vec![artifact(3)]);
    assert!(!report.is_complete());
    assert_eq!(depths(&report.dependencies), vec![(2, 1), (3, 1), (4, 2)]);

    h.source.set_failing(artifact(3), false);
    let recovered = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert!(recovered.is_complete());
    assert_eq!(
        depths(&recovered.dependencies),
        vec![(2, 1), (3, 1), (4, 2), (5, 2)]
    );
}

#[tokio::test]
async fn test_failing_root_gives_empty_partial_closure() {
    let source = StaticArtifactSource::new().with_artifact(artifact(1), None, vec![artifact(2)]);
    source.set_failing(artifact(1), true);
    let h = harness_with(source, 4096).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert!(report.dependencies.is_empty());
    assert_eq!(report.upstream_failures, vec![artifact(1)]);
    assert!(!h.db.is_resolved(&artifact(1)).await.unwrap());
}

// ============================================================================
// Reuse & Bounds
// ============================================================================

#[tokio::test]
async fn test_resolved_artifacts_are_not_refetched() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2)])
        .with_artifact(artifact(2), None, vec![]);
    let h = harness_with(source, 4096).await;

    h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();
    let lookups = h.source.lookups();
    assert_eq!(lookups, 2);

    let again = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();
    assert_eq!(h.source.lookups(), lookups);
    assert_eq!(again.fetched, 0);
    assert_eq!(depths(&again.dependencies), vec![(2, 1)]);
}

#[tokio::test]
async fn test_publication_reopens_artifact_the_source_did_not_know() {
    let source = StaticArtifactSource::new().with_artifact(artifact(1), None, vec![artifact(2)]);
    let h = harness_with(source, 4096).await;

    let first = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();
    assert_eq!(depths(&first.dependencies), vec![(2, 1)]);
    assert!(h.db.is_resolved(&artifact(2)).await.unwrap());

    h.source.insert(artifact(2), Some("0xb"), vec![artifact(3)]);
    h.processor.process(&published(2, "0xb", "0xp2")).await.unwrap();
    h.processor.process(&published(1, "0xa", "0xp1")).await.unwrap();
    assert!(!h.db.is_resolved(&artifact(2)).await.unwrap());
    assert!(h.db.is_resolved(&artifact(1)).await.unwrap());

    let lookups = h.source.lookups();
    let second = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert_eq!(depths(&second.dependencies), vec![(2, 1), (3, 2)]);
    assert_eq!(second.fetched, 2);
    assert_eq!(h.source.lookups(), lookups + 2);
}

#[tokio::test]
async fn test_closure_size_bound_truncates() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2)])
        .with_artifact(artifact(2), None, vec![artifact(3)])
        .with_artifact(artifact(3), None, vec![artifact(4)]);
    let h = harness_with(source, 2).await;

    let report = h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();

    assert!(report.truncated);
    assert!(!report.is_complete());
    assert_eq!(report.visited, 2);
    assert_eq!(depths(&report.dependencies), vec![(2, 1), (3, 2)]);
}

// ============================================================================
// Views
// ============================================================================

#[tokio::test]
async fn test_graph_view_lists_dependents_and_authors() {
    let source = StaticArtifactSource::new()
        .with_artifact(artifact(1), None, vec![artifact(2)])
        .with_artifact(artifact(2), None, vec![artifact(3)]);
    let h = harness_with(source, 4096).await;
    h.processor.process(&published(3, "0xc", "0xp3")).await.unwrap();

    h.resolver.resolve_dependencies(&artifact(1)).await.unwrap();
    let view = h.resolver.graph_view(&artifact(3)).await.unwrap();

    assert_eq!(view.root, artifact(3));
    assert!(view.dependencies.is_empty());
    assert_eq!(depths(&view.dependents), vec![(2, 1), (1, 2)]);

    let closure = h.resolver.closure(&artifact(1)).await.unwrap();
    let c = closure.iter().find(|e| e.artifact == ArtifactId::new(ORIGIN, 3)).unwrap();
    assert_eq!(c.author.as_deref(), Some("0xc"));
}
