use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CompactionPolicy {
    #[default]
    Disabled,
    RetainMinSegments(usize), // Keep the newest N segments, counting the active one
    RetainTotalSize(u64),     // Keep total log size under X bytes (approx)
    RetainDuration(Duration), // Keep segments modified within X
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionOptions {
    pub policy: CompactionPolicy,
}

/// What compaction needs to know about a finalized segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentStat {
    pub base_offset: u64,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl CompactionPolicy {
    /// How many of the oldest finalized segments to drop. `finalized` is
    /// ordered oldest first; the active segment is never a candidate but
    /// counts towards size and segment limits.
    pub fn removable(&self, finalized: &[SegmentStat], active_bytes: u64, now: SystemTime) -> usize {
        match *self {
            CompactionPolicy::Disabled => 0,
            CompactionPolicy::RetainMinSegments(keep) => {
                let total = finalized.len() + 1;
                total.saturating_sub(keep.max(1)).min(finalized.len())
            }
            CompactionPolicy::RetainTotalSize(max_bytes) => {
                let mut total: u64 =
                    active_bytes + finalized.iter().map(|s| s.size_bytes).sum::<u64>();
                let mut count = 0;
                for stat in finalized {
                    if total <= max_bytes {
                        break;
                    }
                    total -= stat.size_bytes;
                    count += 1;
                }
                count
            }
            CompactionPolicy::RetainDuration(max_age) => {
                let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
                // stop at the first young segment so surviving offsets stay contiguous
                finalized
                    .iter()
                    .take_while(|s| s.modified < cutoff)
                    .count()
            }
        }
    }
}
