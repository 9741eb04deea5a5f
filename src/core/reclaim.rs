//! Purpose: Reclaim sections kept alive only by reference cycles.
//! Exports: `collect`.
//! Role: Trial deletion over `Rc` strong counts, driven by `Section::visit_sections`.
//! Invariants: A section referenced from outside the candidate graph is never released.
//! Notes: Buffers own no references and are not part of the graph.

use crate::core::section::Section;
use std::collections::HashMap;

/// Release every section in the graph reachable from `candidates` that has no
/// holder outside that graph. Returns the number of sections released.
pub fn collect(candidates: Vec<Section>) -> usize {
    let mut nodes: Vec<Section> = Vec::new();
    let mut index: HashMap<usize, usize> = HashMap::new();
    for candidate in candidates {
        if !index.contains_key(&candidate.id()) {
            index.insert(candidate.id(), nodes.len());
            nodes.push(candidate);
        }
    }

    let mut cursor = 0;
    while cursor < nodes.len() {
        let mut found = Vec::new();
        nodes[cursor].visit_sections(|child| {
            if !index.contains_key(&child.id()) {
                index.insert(child.id(), nodes.len() + found.len());
                found.push(child.clone());
            }
        });
        nodes.extend(found);
        cursor += 1;
    }

    // Our own clone accounts for one strong reference per node.
    let mut outside: Vec<usize> = nodes
        .iter()
        .map(|node| node.strong_count().saturating_sub(1))
        .collect();
    for node in &nodes {
        node.visit_sections(|child| {
            if let Some(&slot) = index.get(&child.id()) {
                outside[slot] = outside[slot].saturating_sub(1);
            }
        });
    }

    let mut reachable = vec![false; nodes.len()];
    let mut pending: Vec<usize> = (0..nodes.len()).filter(|&i| outside[i] > 0).collect();
    while let Some(slot) = pending.pop() {
        if reachable[slot] {
            continue;
        }
        reachable[slot] = true;
        nodes[slot].visit_sections(|child| {
            if let Some(&next) = index.get(&child.id()) {
                if !reachable[next] {
                    pending.push(next);
                }
            }
        });
    }

    let mut released = 0;
    for (slot, node) in nodes.iter().enumerate() {
        if !reachable[slot] {
            node.release();
            released += 1;
        }
    }
    if released > 0 {
        tracing::debug!(released, "released cyclic sections");
    }
    released
}
