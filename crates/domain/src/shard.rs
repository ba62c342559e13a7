//! Partitioning of the order identifier space for reconciliation scans.

use common::OrderId;
use serde::{Deserialize, Serialize};

/// A contiguous, inclusive identifier range scanned as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardParam {
    pub start_id: OrderId,
    pub end_id: OrderId,
    pub shard_id: usize,
}

impl ShardParam {
    /// Returns true if `id` falls inside this shard.
    pub fn contains(&self, id: OrderId) -> bool {
        self.start_id <= id && id <= self.end_id
    }

    /// Number of identifiers covered by this shard.
    pub fn len(&self) -> u64 {
        (i128::from(self.end_id.as_i64()) - i128::from(self.start_id.as_i64()) + 1) as u64
    }

    /// Always false; a shard covers at least one identifier.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Splits `[min_id, max_id]` into at most `shard_count` contiguous shards.
///
/// Shards are sized by integer division with the remainder folded into the
/// last shard, whose end is always `max_id`. When the range holds fewer ids
/// than requested shards, each shard covers a single id. Returns an empty
/// list when `min_id > max_id` or `shard_count` is zero.
pub fn plan_shards(min_id: OrderId, max_id: OrderId, shard_count: usize) -> Vec<ShardParam> {
    if min_id > max_id || shard_count == 0 {
        return Vec::new();
    }

    let min = i128::from(min_id.as_i64());
    let max = i128::from(max_id.as_i64());
    let total = max - min + 1;
    let count = total.min(shard_count as i128);
    let size = total / count;

    (0..count)
        .map(|i| {
            let start = min + i * size;
            let end = if i == count - 1 {
                max
            } else {
                start + size - 1
            };
            ShardParam {
                start_id: OrderId::new(start as i64),
                end_id: OrderId::new(end as i64),
                shard_id: i as usize,
            }
        })
        .collect()
}
