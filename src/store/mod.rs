//! Block-structured file storage: immutable blocks, per-file metadata, the
//! durable per-node store, and the read-my-writes client tracker.

mod block;
mod blockstore;
mod metadata;
mod tracker;

pub use block::FileBlock;
pub use blockstore::BlockStore;
pub use metadata::FileMetadata;
pub use tracker::ClientTracker;

/// Deterministic merge order: timestamp ascending, then client, then
/// sequence number. Input blocks are deduplicated by block id first; every
/// replica applying this to the same multiset gets the identical ordering.
pub fn order_blocks(blocks: Vec<FileBlock>) -> Vec<FileBlock> {
    let mut by_id = std::collections::HashMap::new();
    for block in blocks {
        by_id.entry(block.block_id).or_insert(block);
    }
    let mut ordered: Vec<FileBlock> = by_id.into_values().collect();
    ordered.sort_by(|a, b| {
        (a.timestamp_ms, &a.client_id, a.sequence_num).cmp(&(
            b.timestamp_ms,
            &b.client_id,
            b.sequence_num,
        ))
    });
    ordered
}

#[cfg(test)]
mod order_tests {
    use super::*;

    fn block(client: &str, ts: u64, seq: u32) -> FileBlock {
        FileBlock::build(client, seq, ts, format!("{client}-{seq}").into_bytes())
    }

    #[test]
    fn order_is_deterministic_across_shuffles() {
        let blocks = vec![
            block("b", 200, 0),
            block("a", 100, 1),
            block("a", 100, 0),
            block("c", 100, 0),
            block("a", 300, 2),
        ];
        let mut shuffled = blocks.clone();
        shuffled.reverse();
        shuffled.swap(0, 2);

        let a: Vec<u64> = order_blocks(blocks).iter().map(|b| b.block_id).collect();
        let b: Vec<u64> = order_blocks(shuffled).iter().map(|b| b.block_id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn order_keys_apply_in_sequence() {
        let ordered = order_blocks(vec![
            block("b", 200, 0),
            block("a", 200, 1),
            block("a", 200, 0),
            block("z", 100, 9),
        ]);
        let keys: Vec<(u64, String, u32)> = ordered
            .iter()
            .map(|b| (b.timestamp_ms, b.client_id.clone(), b.sequence_num))
            .collect();
        assert_eq!(
            keys,
            vec![
                (100, "z".into(), 9),
                (200, "a".into(), 0),
                (200, "a".into(), 1),
                (200, "b".into(), 0),
            ]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let b0 = block("a", 100, 0);
        let ordered = order_blocks(vec![b0.clone(), b0.clone(), b0.clone()]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].block_id, b0.block_id);
    }
}
