use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::common::types::TxnId;

/// Directed waits-for graph over transactions: an edge `t1 -> t2` means
/// `t1` is blocked on a queue where `t2` holds a blocking granted request.
/// Waiters maintain their own out-edges under their queue's latch, so the
/// graph tracks actual blocking.
#[derive(Default)]
pub(crate) struct WaitsForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitsForGraph {
    /// Replace the full out-edge set of `txn`.
    pub fn set_out_edges(&mut self, txn: TxnId, blockers: BTreeSet<TxnId>) {
        if blockers.is_empty() {
            self.edges.remove(&txn);
        } else {
            self.edges.insert(txn, blockers);
        }
    }

    pub fn clear(&mut self, txn: TxnId) {
        self.edges.remove(&txn);
    }

    pub fn is_waiting(&self, txn: TxnId) -> bool {
        self.edges.contains_key(&txn)
    }

    /// Tarjan's strongly-connected components, visiting nodes in ascending
    /// txn-id order for determinism. For each non-trivial SCC the youngest
    /// member (highest id) is returned as the victim.
    pub fn find_victims(&self) -> Vec<TxnId> {
        let mut nodes: BTreeSet<TxnId> = self.edges.keys().copied().collect();
        for targets in self.edges.values() {
            nodes.extend(targets.iter().copied());
        }

        let mut tarjan = Tarjan {
            graph: &self.edges,
            index: 0,
            indices: HashMap::new(),
            lowlinks: HashMap::new(),
            on_stack: HashMap::new(),
            stack: Vec::new(),
            victims: Vec::new(),
        };
        for &node in &nodes {
            if !tarjan.indices.contains_key(&node) {
                tarjan.visit(node);
            }
        }
        tarjan.victims
    }
}

struct Tarjan<'a> {
    graph: &'a BTreeMap<TxnId, BTreeSet<TxnId>>,
    index: usize,
    indices: HashMap<TxnId, usize>,
    lowlinks: HashMap<TxnId, usize>,
    on_stack: HashMap<TxnId, bool>,
    stack: Vec<TxnId>,
    victims: Vec<TxnId>,
}

impl Tarjan<'_> {
    fn visit(&mut self, node: TxnId) {
        self.indices.insert(node, self.index);
        self.lowlinks.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node, true);

        if let Some(targets) = self.graph.get(&node) {
            for &next in targets {
                if !self.indices.contains_key(&next) {
                    self.visit(next);
                    let low = self.lowlinks[&next].min(self.lowlinks[&node]);
                    self.lowlinks.insert(node, low);
                } else if self.on_stack.get(&next).copied().unwrap_or(false) {
                    let low = self.indices[&next].min(self.lowlinks[&node]);
                    self.lowlinks.insert(node, low);
                }
            }
        }

        if self.lowlinks[&node] == self.indices[&node] {
            let mut component = Vec::new();
            loop {
                let member = self.stack.pop().expect("tarjan stack underflow");
                self.on_stack.insert(member, false);
                component.push(member);
                if member == node {
                    break;
                }
            }
            if component.len() > 1 {
                let youngest = *component.iter().max().expect("non-empty component");
                self.victims.push(youngest);
            }
        }
    }
}

/// Shared deadlock-detection state: the waits-for graph plus the single
/// terminate slot the detector publishes victims through.
pub(crate) struct WaitsFor {
    state: Mutex<DetectorState>,
}

struct DetectorState {
    graph: WaitsForGraph,
    victim: Option<TxnId>,
}

impl WaitsFor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DetectorState {
                graph: WaitsForGraph::default(),
                victim: None,
            }),
        }
    }

    /// Record what `txn` is currently blocked on.
    pub fn set_waits(&self, txn: TxnId, blockers: BTreeSet<TxnId>) {
        self.state.lock().graph.set_out_edges(txn, blockers);
    }

    /// `txn` stopped waiting (granted or gone).
    pub fn clear_waits(&self, txn: TxnId) {
        self.state.lock().graph.clear(txn);
    }

    /// Consume the terminate slot if it names `txn`.
    pub fn take_victim_if(&self, txn: TxnId) -> bool {
        let mut state = self.state.lock();
        if state.victim == Some(txn) {
            state.victim = None;
            state.graph.clear(txn);
            true
        } else {
            false
        }
    }

    /// One detection pass. Returns the newly published victim, if any.
    ///
    /// A previously published victim that is no longer waiting was granted
    /// before it saw the slot; the stale entry is dropped rather than left
    /// to block future detections.
    pub fn detect(&self) -> Option<TxnId> {
        let mut state = self.state.lock();
        if let Some(pending) = state.victim {
            if state.graph.is_waiting(pending) {
                return None;
            }
            state.victim = None;
        }
        let victim = state.graph.find_victims().into_iter().next()?;
        state.victim = Some(victim);
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(TxnId, TxnId)]) -> WaitsForGraph {
        let mut graph = WaitsForGraph::default();
        let mut by_source: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for &(a, b) in pairs {
            by_source.entry(a).or_default().insert(b);
        }
        for (source, targets) in by_source {
            graph.set_out_edges(source, targets);
        }
        graph
    }

    #[test]
    fn test_no_cycle_no_victim() {
        let graph = edges(&[(1, 2), (2, 3), (1, 3)]);
        assert!(graph.find_victims().is_empty());
    }

    #[test]
    fn test_two_cycle_picks_youngest() {
        let graph = edges(&[(1, 2), (2, 1)]);
        assert_eq!(graph.find_victims(), vec![2]);
    }

    #[test]
    fn test_larger_cycle_picks_youngest() {
        let graph = edges(&[(1, 2), (2, 3), (3, 1), (4, 1)]);
        assert_eq!(graph.find_victims(), vec![3]);
    }

    #[test]
    fn test_disjoint_cycles_yield_one_victim_each() {
        let graph = edges(&[(1, 2), (2, 1), (5, 6), (6, 5)]);
        let victims = graph.find_victims();
        assert_eq!(victims.len(), 2);
        assert!(victims.contains(&2));
        assert!(victims.contains(&6));
    }

    #[test]
    fn test_stale_victim_is_dropped() {
        let waits_for = WaitsFor::new();
        waits_for.set_waits(1, BTreeSet::from([2]));
        waits_for.set_waits(2, BTreeSet::from([1]));
        assert_eq!(waits_for.detect(), Some(2));

        // Victim got granted instead of observing the slot.
        waits_for.clear_waits(2);
        waits_for.clear_waits(1);
        assert_eq!(waits_for.detect(), None);
        // The slot is free again for a later cycle.
        waits_for.set_waits(3, BTreeSet::from([4]));
        waits_for.set_waits(4, BTreeSet::from([3]));
        assert_eq!(waits_for.detect(), Some(4));
    }

    #[test]
    fn test_take_victim_consumes_slot() {
        let waits_for = WaitsFor::new();
        waits_for.set_waits(1, BTreeSet::from([2]));
        waits_for.set_waits(2, BTreeSet::from([1]));
        waits_for.detect();

        assert!(!waits_for.take_victim_if(1));
        assert!(waits_for.take_victim_if(2));
        assert!(!waits_for.take_victim_if(2));
    }
}
