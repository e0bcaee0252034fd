//! Output id assignment with hole reuse.
//!
//! Ids reserved by the embedder (`used_module_ids` / `used_chunk_ids`, e.g.
//! revived from records) and ids already carried by modules or chunks stay
//! untouched; gaps below the highest used id are handed out first, smallest
//! first, before fresh ids continue past the maximum.

use rustc_hash::FxHashSet as HashSet;

use super::Compilation;

/// Free ids below `max + 1`, in descending order so `pop` yields the
/// smallest hole first.
fn collect_holes(used: &HashSet<u32>) -> (u32, Vec<u32>) {
    if used.is_empty() {
        return (0, Vec::new());
    }
    let max = used.iter().copied().max().unwrap_or(0);
    let next_free = max + 1;
    let mut holes = Vec::new();
    let mut candidate = next_free;
    while candidate > 0 {
        candidate -= 1;
        if !used.contains(&candidate) {
            holes.push(candidate);
        }
    }
    (next_free, holes)
}

impl Compilation {
    pub(crate) fn apply_module_ids(&mut self) {
        let mut used: HashSet<u32> = self.used_module_ids.clone();
        for node in self.store.nodes() {
            if let Some(id) = node.module_id {
                used.insert(id);
            }
        }
        let (mut next_free, mut holes) = collect_holes(&used);
        for id in self.store.order().to_vec() {
            let node = self.module_mut(id);
            if node.module_id.is_none() {
                node.module_id = Some(holes.pop().unwrap_or_else(|| {
                    let fresh = next_free;
                    next_free += 1;
                    fresh
                }));
            }
        }
    }

    pub(crate) fn apply_chunk_ids(&mut self) {
        let mut used: HashSet<u32> = self.used_chunk_ids.clone();
        for &chunk in &self.chunks {
            if let Some(id) = self.chunk(chunk).chunk_id {
                used.insert(id);
            }
        }
        let (mut next_free, mut holes) = collect_holes(&used);
        for chunk in self.chunks.clone() {
            let chunk = self.chunk_mut(chunk);
            if chunk.chunk_id.is_none() {
                chunk.chunk_id = Some(holes.pop().unwrap_or_else(|| {
                    let fresh = next_free;
                    next_free += 1;
                    fresh
                }));
            }
        }
        // Every chunk carries an ids list, defaulting to its own id.
        for chunk in self.chunks.clone() {
            let chunk = self.chunk_mut(chunk);
            if chunk.ids.is_none() {
                chunk.ids = chunk.chunk_id.map(|id| vec![id]);
            }
        }
    }
}
