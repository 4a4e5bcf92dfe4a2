//! Dependency graph builder.
//!
//! Computes the transitive closure of an artifact with the minimum depth per
//! dependency. Edges are stored relative to their `from` artifact, so the
//! closure of `A` is every stored edge `A → X`.
//!
//! The traversal is an iterative post-order DFS. A per-call arena
//! (`petgraph::DiGraph` plus an index map) is the visited set: an artifact is
//! expanded at most once per call, which bounds the work by the number of
//! distinct reachable artifacts and makes cycles harmless. When a child
//! finishes (or is skipped because it was already visited), its stored closure
//! is projected onto the parent at `1 + depth`, keeping the minimum.

pub mod retry;
pub mod source;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::{GraphConfig, UpstreamConfig};
use crate::db::{ClosureEntry, Database, SettlementState};
use crate::error::Result;
use crate::telemetry::SettlementMetrics;
use crate::types::ArtifactId;

pub use retry::{BackoffStrategy, RetryPolicy};
pub use source::{ArtifactRecord, ArtifactSource, HttpArtifactSource, StaticArtifactSource};

// ═══════════════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ClosureReport {
    pub root: ArtifactId,
    /// Stored closure after the traversal, ascending depth.
    pub dependencies: Vec<ClosureEntry>,
    /// Distinct artifacts expanded by this call, root included.
    pub visited: usize,
    /// Artifacts whose immediate edges were fetched from the source.
    pub fetched: usize,
    /// Artifacts the source could not answer for.
    pub upstream_failures: Vec<ArtifactId>,
    /// The closure size bound stopped expansion.
    pub truncated: bool,
    /// The traversal ran into a cycle.
    pub cyclic: bool,
}

impl ClosureReport {
    /// Whether every reachable artifact was expanded.
    pub fn is_complete(&self) -> bool {
        self.upstream_failures.is_empty() && !self.truncated
    }

    /// Whether asking the source again could complete the closure. A closure
    /// cut by the size bound stays cut.
    pub fn awaits_upstream(&self) -> bool {
        !self.upstream_failures.is_empty()
    }

    pub fn settlement_state(&self) -> SettlementState {
        SettlementState {
            closure_complete: self.is_complete(),
            awaiting_upstream: self.awaits_upstream(),
        }
    }
}

/// Forward and reverse neighbourhood of an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub root: ArtifactId,
    pub dependencies: Vec<ClosureEntry>,
    pub dependents: Vec<ClosureEntry>,
}

struct Frame {
    artifact: ArtifactId,
    node: NodeIndex,
    children: Vec<ArtifactId>,
    next: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves and persists dependency closures.
#[derive(Clone)]
pub struct DependencyResolver {
    db: Database,
    source: Arc<dyn ArtifactSource>,
    retry: RetryPolicy,
    max_closure_size: usize,
}

impl DependencyResolver {
    pub fn new(
        db: Database,
        source: Arc<dyn ArtifactSource>,
        retry: RetryPolicy,
        max_closure_size: usize,
    ) -> Self {
        Self {
            db,
            source,
            retry,
            max_closure_size: max_closure_size.max(1),
        }
    }

    pub fn from_config(
        db: Database,
        source: Arc<dyn ArtifactSource>,
        graph: &GraphConfig,
        upstream: &UpstreamConfig,
    ) -> Self {
        Self::new(
            db,
            source,
            RetryPolicy::from_config(upstream),
            graph.max_closure_size,
        )
    }

    pub fn source(&self) -> &Arc<dyn ArtifactSource> {
        &self.source
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolve the closure of `root`, fetching unknown edges from the source.
    ///
    /// Source failures are contained per artifact: the branch is skipped and
    /// the report lists it. Storage failures abort the call.
    #[instrument(skip(self), fields(artifact = %root))]
    pub async fn resolve_dependencies(&self, root: &ArtifactId) -> Result<ClosureReport> {
        let mut arena: DiGraph<ArtifactId, ()> = DiGraph::new();
        let mut index: HashMap<ArtifactId, NodeIndex> = HashMap::new();
        let mut report = ClosureReport {
            root: root.clone(),
            dependencies: Vec::new(),
            visited: 0,
            fetched: 0,
            upstream_failures: Vec::new(),
            truncated: false,
            cyclic: false,
        };

        let root_node = arena.add_node(root.clone());
        index.insert(root.clone(), root_node);
        let children = self.immediate(root, &mut report).await?;
        let mut stack = vec![Frame {
            artifact: root.clone(),
            node: root_node,
            children,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.children.len() {
                let done = stack.pop();
                if let (Some(done), Some(parent)) = (done, stack.last()) {
                    self.db.project_closure(&parent.artifact, &done.artifact, 1).await?;
                }
                continue;
            }

            let child = frame.children[frame.next].clone();
            frame.next += 1;
            let parent = frame.artifact.clone();
            let parent_node = frame.node;

            if let Some(&child_node) = index.get(&child) {
                arena.update_edge(parent_node, child_node, ());
                self.db.project_closure(&parent, &child, 1).await?;
                continue;
            }

            if arena.node_count() >= self.max_closure_size {
                report.truncated = true;
                self.db.project_closure(&parent, &child, 1).await?;
                continue;
            }

            let child_node = arena.add_node(child.clone());
            index.insert(child.clone(), child_node);
            arena.add_edge(parent_node, child_node, ());

            let grandchildren = self.immediate(&child, &mut report).await?;
            stack.push(Frame {
                artifact: child,
                node: child_node,
                children: grandchildren,
                next: 0,
            });
        }

        report.visited = arena.node_count();
        report.cyclic = is_cyclic_directed(&arena);
        if report.cyclic {
            warn!(artifact = %root, "Dependency cycle detected; re-entry was skipped");
        }
        if report.truncated {
            warn!(
                artifact = %root,
                max_closure_size = self.max_closure_size,
                "Closure size bound reached; expansion stopped"
            );
        }

        report.dependencies = self.db.closure(root).await?;
        debug!(
            artifact = %root,
            dependencies = report.dependencies.len(),
            visited = report.visited,
            fetched = report.fetched,
            failures = report.upstream_failures.len(),
            "Dependency closure resolved"
        );
        Ok(report)
    }

    /// Immediate dependencies of `artifact`, with the depth-1 edges stored.
    ///
    /// Known artifacts are read from the store; others are fetched and then
    /// marked resolved once their edges are written.
    async fn immediate(
        &self,
        artifact: &ArtifactId,
        report: &mut ClosureReport,
    ) -> Result<Vec<ArtifactId>> {
        if self.db.is_resolved(artifact).await? {
            return self.db.direct_dependencies(artifact).await;
        }

        let source = self.source.clone();
        let fetched = self
            .retry
            .run("immediate_dependencies", || {
                let source = source.clone();
                let artifact = artifact.clone();
                async move { source.immediate_dependencies(&artifact).await }
            })
            .await;

        let mut deps = match fetched {
            Ok(deps) => deps,
            Err(err) => {
                warn!(
                    artifact = %artifact,
                    error_code = %err.code(),
                    error = %err,
                    "Artifact source unavailable; skipping branch"
                );
                SettlementMetrics::record_upstream_failure();
                report.upstream_failures.push(artifact.clone());
                return Ok(Vec::new());
            }
        };

        deps.retain(|dep| {
            if dep == artifact {
                warn!(artifact = %artifact, "Artifact declares itself as a dependency; ignored");
                false
            } else {
                true
            }
        });
        deps.sort();
        deps.dedup();

        for dep in &deps {
            self.db.upsert_edge(artifact, dep, 1).await?;
        }
        self.db.mark_resolved(artifact).await?;
        report.fetched += 1;

        Ok(deps)
    }

    /// Stored closure, ascending depth. Never triggers resolution.
    pub async fn closure(&self, artifact: &ArtifactId) -> Result<Vec<ClosureEntry>> {
        self.db.closure(artifact).await
    }

    /// Stored forward and reverse edges. Never triggers resolution.
    pub async fn graph_view(&self, artifact: &ArtifactId) -> Result<GraphView> {
        Ok(GraphView {
            root: artifact.clone(),
            dependencies: self.db.closure(artifact).await?,
            dependents: self.db.dependents(artifact).await?,
        })
    }
}
