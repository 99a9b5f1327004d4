//! Wire pool for compiler temporaries. Sets of wires are bucketed by
//! length; within a bucket the in-use and free sets are keyed by the set's
//! leading wire number. Permanent and constant variables never go through
//! the pool.

use indexmap::IndexMap;

use crate::types::Num;
use crate::wires::{WireArena, WireId, WireState};

#[derive(Debug, Default)]
struct PoolNode {
    free: IndexMap<Num, Vec<WireId>>,
    used: IndexMap<Num, Vec<WireId>>,
}

#[derive(Debug)]
pub struct WirePool {
    /// Next dense wire number to hand out when no free set fits.
    pub next_number: Num,
    nodes: IndexMap<Num, PoolNode>,
}

impl WirePool {
    pub fn new(next_number: Num) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(1, PoolNode::default());
        WirePool { next_number, nodes }
    }

    /// Returns a currently unused set of `length` wires, reusing a free set
    /// of that length if one exists, else allocating a fresh dense block.
    pub fn get_wires(&mut self, arena: &mut WireArena, length: Num) -> Vec<WireId> {
        let node = self.nodes.entry(length).or_default();
        if let Some((n, ws)) = node.free.shift_remove_index(0) {
            node.used.insert(n, ws.clone());
            return ws;
        }
        let mut ws = Vec::with_capacity(length as usize);
        let base = self.next_number;
        for _ in 0..length {
            ws.push(arena.alloc(self.next_number));
            self.next_number += 1;
        }
        node.used.insert(base, ws.clone());
        ws
    }

    pub fn get_wire(&mut self, arena: &mut WireArena) -> WireId {
        self.get_wires(arena, 1)[0]
    }

    /// Releases a single pooled wire if nothing depends on it.
    pub fn free_wire(&mut self, arena: &mut WireArena, w: WireId) {
        if arena.refs(w) > 0 || arena[w].locked {
            return;
        }
        let n = arena[w].number;
        let node = self.nodes.get_mut(&1).expect("singleton bucket");
        if let Some(ws) = node.used.shift_remove(&n) {
            arena.free_refs(w);
            arena[w].state = WireState::Zero;
            node.free.insert(n, ws);
        }
    }

    /// Releases a whole set if every wire in it is unlocked and unreferenced.
    /// Released wires reset to zero and drop their alias edges; a dropped
    /// alias may in turn free the singleton it pointed at.
    pub fn free_set(&mut self, arena: &mut WireArena, set: &[WireId]) {
        if set.is_empty() || !arena.ready_to_free(set) {
            return;
        }
        let length = set.len() as Num;
        let Some(node) = self.nodes.get_mut(&length) else {
            return;
        };
        let n = arena[set[0]].number;
        let Some(ws) = node.used.shift_remove(&n) else {
            return;
        };
        node.free.insert(n, ws.clone());
        self.release_wires(arena, &ws);
    }

    /// Sweeps every in-use set and moves the eligible ones to the free side.
    pub fn free_if_no_refs(&mut self, arena: &mut WireArena) {
        let lengths: Vec<Num> = self.nodes.keys().copied().collect();
        for length in lengths {
            let node = &mut self.nodes[&length];
            let eligible: Vec<Num> = node
                .used
                .iter()
                .filter(|(_, ws)| arena.ready_to_free(ws))
                .map(|(&n, _)| n)
                .collect();
            for n in eligible {
                let node = &mut self.nodes[&length];
                let ws = node.used.shift_remove(&n).expect("swept set present");
                node.free.insert(n, ws.clone());
                self.release_wires(arena, &ws);
            }
        }
    }

    /// Like [`free_if_no_refs`](Self::free_if_no_refs) but only sweeps the
    /// singleton bucket.
    pub fn free_singles_if_no_refs(&mut self, arena: &mut WireArena) {
        let Some(node) = self.nodes.get_mut(&1) else {
            return;
        };
        let eligible: Vec<Num> = node
            .used
            .iter()
            .filter(|(_, ws)| arena.refs(ws[0]) == 0 && !arena[ws[0]].locked)
            .map(|(&n, _)| n)
            .collect();
        for n in eligible {
            let node = self.nodes.get_mut(&1).expect("singleton bucket");
            let ws = node.used.shift_remove(&n).expect("swept set present");
            node.free.insert(n, ws.clone());
            self.release_wires(arena, &ws);
        }
    }

    fn release_wires(&mut self, arena: &mut WireArena, ws: &[WireId]) {
        for &w in ws {
            arena[w].state = WireState::Zero;
            if let Some(t) = arena[w].other {
                arena.remove_ref(t, w);
                self.free_wire(arena, t);
            }
        }
    }

    /// Number of sets still marked in-use, for leak diagnostics at the end
    /// of a function body.
    pub fn used_sets(&self) -> usize {
        self.nodes.values().map(|n| n.used.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_allocates_dense_numbers() {
        let mut arena = WireArena::new();
        let mut pool = WirePool::new(2);

        let a = pool.get_wires(&mut arena, 3);
        assert_eq!(
            a.iter().map(|&w| arena[w].number).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(pool.next_number, 5);
    }

    #[test]
    fn freed_sets_are_reused() {
        let mut arena = WireArena::new();
        let mut pool = WirePool::new(0);

        let a = pool.get_wires(&mut arena, 4);
        arena[a[1]].state = WireState::One;
        pool.free_set(&mut arena, &a);

        // Reuse hands back the same wires, reset to zero.
        let b = pool.get_wires(&mut arena, 4);
        assert_eq!(a, b);
        assert_eq!(arena[b[1]].state, WireState::Zero);

        // A different length allocates fresh.
        let c = pool.get_wires(&mut arena, 2);
        assert_eq!(arena[c[0]].number, 4);
    }

    #[test]
    fn locked_sets_stay_in_use() {
        let mut arena = WireArena::new();
        let mut pool = WirePool::new(0);

        let a = pool.get_wires(&mut arena, 2);
        arena[a[0]].locked = true;
        pool.free_set(&mut arena, &a);
        pool.free_if_no_refs(&mut arena);
        assert_eq!(pool.used_sets(), 1);

        arena[a[0]].locked = false;
        pool.free_if_no_refs(&mut arena);
        assert_eq!(pool.used_sets(), 0);
    }

    #[test]
    fn releasing_drops_alias_edges() {
        let mut arena = WireArena::new();
        let mut pool = WirePool::new(0);

        let target = pool.get_wire(&mut arena);
        let a = pool.get_wires(&mut arena, 2);
        arena[a[0]].state = WireState::UnknownAlias;
        arena.add_ref(target, a[0]);

        // The target is referenced, so the singleton sweep keeps it.
        pool.free_singles_if_no_refs(&mut arena);
        assert_eq!(pool.used_sets(), 2);

        // Freeing the aliasing set drops the edge and cascades to the target.
        pool.free_set(&mut arena, &a);
        assert_eq!(arena.refs(target), 0);
        assert_eq!(pool.used_sets(), 0);
    }
}
