//! Control-flow graph cleanup
//!
//! Splicing leaves behind chains of blocks joined by unconditional branches.
//! `merge_basic_blocks` folds every block into its predecessor when that
//! predecessor is its only one and jumps straight to it.

use super::block::{BasicBlockId, Terminator};
use super::error::IrResult;
use super::function::FunctionBody;
use rustc_hash::FxHashMap;

/// Merge blocks into unique predecessors. Returns the number of merges.
///
/// Runs in a single walk over the layout: each block keeps absorbing its
/// successor for as long as the successor has no other predecessor.
/// Merging moves the successor's out-edges to the block, so the predecessor
/// counts stay valid throughout.
pub fn merge_basic_blocks(body: &mut FunctionBody) -> IrResult<usize> {
    let Some(entry) = body.entry_block() else {
        return Ok(0);
    };
    let mut preds = body.predecessor_counts();
    let mut merged = 0;

    let mut cursor = Some(entry);
    while let Some(block) = cursor {
        while let Some(succ) = mergeable_successor(body, &preds, entry, block) {
            body.merge_into_predecessor(block, succ)?;
            preds.remove(&succ);
            merged += 1;
        }
        cursor = body.next_block(block);
    }
    Ok(merged)
}

fn mergeable_successor(
    body: &FunctionBody,
    preds: &FxHashMap<BasicBlockId, usize>,
    entry: BasicBlockId,
    block: BasicBlockId,
) -> Option<BasicBlockId> {
    match body.terminator(block)? {
        Terminator::Branch { target, .. }
            if *target != entry
                && *target != block
                && preds.get(target).copied() == Some(1) =>
        {
            Some(*target)
        }
        _ => None,
    }
}
