use tracing::{debug, trace};

use crate::graph::{DataflowGraph, GraphError};
use crate::pattern::Pattern;
use crate::rewriter::{GraphRewriter, RewriteStats};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Run the full invariant check after every successful rewrite.
    pub verify_each_rewrite: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    pub anchors_visited: usize,
    pub applied: usize,
    pub rewrite: RewriteStats,
}

/// Offers every live anchor operator to `pattern` once, in insertion order.
///
/// The operator list is snapshotted up front; operators consumed by an
/// earlier rewrite in the same scan are skipped. Operators created by a
/// rewrite are not revisited.
pub fn apply_pattern_once<P>(
    graph: &mut DataflowGraph,
    pattern: &P,
    cfg: &DriverConfig,
) -> Result<DriverStats, GraphError>
where
    P: Pattern + ?Sized,
{
    let anchor = pattern.anchor();
    let worklist = graph.live_operators();
    let mut rewriter = GraphRewriter::new(graph);
    let mut stats = DriverStats::default();

    for op in worklist {
        if !rewriter.contains(op) {
            trace!(op = %op, "skipping operator removed by an earlier rewrite");
            continue;
        }
        if rewriter.operator(op).map(|o| o.kind()) != Some(anchor) {
            continue;
        }
        stats.anchors_visited += 1;
        if pattern.match_and_rewrite(op, &mut rewriter)? {
            stats.applied += 1;
            if cfg.verify_each_rewrite {
                rewriter.verify()?;
            }
        }
    }

    stats.rewrite = rewriter.stats();
    debug!(
        pattern = pattern.name(),
        anchors = stats.anchors_visited,
        applied = stats.applied,
        erased_ops = stats.rewrite.erased_ops,
        "pattern scan finished"
    );
    Ok(stats)
}
