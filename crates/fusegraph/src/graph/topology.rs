use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::{DataflowGraph, OpId};

/// Raised when the live operators cannot be ordered because of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyError {
    /// Operators left unscheduled, in insertion order.
    pub unscheduled: Vec<OpId>,
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} operators form a cycle, starting at {}",
            self.unscheduled.len(),
            self.unscheduled
                .first()
                .map(ToString::to_string)
                .unwrap_or_default()
        )
    }
}

impl std::error::Error for TopologyError {}

/// Kahn's algorithm over the producer index; ties break on insertion order.
pub(crate) fn topological_order(graph: &DataflowGraph) -> Result<Vec<OpId>, TopologyError> {
    let mut pending: HashMap<OpId, usize> = HashMap::new();
    let mut ready = BTreeSet::new();
    for (id, op) in graph.operators() {
        let mut deps = op
            .inputs()
            .iter()
            .filter_map(|tensor| graph.producer_of(*tensor))
            .collect::<Vec<_>>();
        deps.sort_unstable();
        deps.dedup();
        if deps.is_empty() {
            ready.insert(id);
        } else {
            pending.insert(id, deps.len());
        }
    }

    let mut order = Vec::with_capacity(graph.operator_count());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        let Some(op) = graph.operator(id) else {
            continue;
        };
        let mut successors = op
            .outputs()
            .iter()
            .flat_map(|tensor| graph.consumers_of(*tensor).iter().copied())
            .collect::<Vec<_>>();
        successors.sort_unstable();
        successors.dedup();
        for next in successors {
            if let Some(count) = pending.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    pending.remove(&next);
                    ready.insert(next);
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        let mut unscheduled = pending.into_keys().collect::<Vec<_>>();
        unscheduled.sort_unstable();
        Err(TopologyError { unscheduled })
    }
}
