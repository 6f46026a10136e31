//! Drag-reorder arithmetic.
//!
//! A move gesture takes the entity at index `from` and reinserts it at index
//! `to`; everything between them shifts by one slot. The entity's new
//! position is simply its index in the recomputed sequence, which keeps the
//! owner's positions contiguous at `0..n-1`.

/// Recompute a sequence after moving one element, splice-style. Returns
/// `None` when the gesture is meaningless: identical indices, or either
/// index out of bounds.
pub fn splice_move<T: Clone>(items: &[T], from: usize, to: usize) -> Option<Vec<T>> {
    if from == to || from >= items.len() || to >= items.len() {
        return None;
    }
    let mut next = items.to_vec();
    let moved = next.remove(from);
    next.insert(to, moved);
    Some(next)
}
