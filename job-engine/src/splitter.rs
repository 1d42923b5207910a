use common::storage::types::peer_shard::ShardRange;

/// One peer's share of a job's index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub peer_id: String,
    pub range: ShardRange,
}

impl Assignment {
    pub fn assigned(&self) -> u32 {
        self.range.len()
    }
}

/// Partition `[0, total)` into contiguous ranges, one per peer in list order.
///
/// Sizes differ by at most one; the remainder goes to the earliest peers.
/// Returns nothing for an empty peer list.
pub fn split_assignments(total: u32, peers: &[String]) -> Vec<Assignment> {
    let Ok(peer_count) = u32::try_from(peers.len()) else {
        return Vec::new();
    };
    if peer_count == 0 {
        return Vec::new();
    }

    let base = total / peer_count;
    let remainder = total % peer_count;
    let mut start = 0_u32;

    peers
        .iter()
        .zip(0_u32..)
        .map(|(peer_id, position)| {
            let size = if position < remainder { base + 1 } else { base };
            let range = ShardRange {
                start,
                end: start + size,
            };
            start = range.end;
            Assignment {
                peer_id: peer_id.clone(),
                range,
            }
        })
        .collect()
}
