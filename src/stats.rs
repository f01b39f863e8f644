use std::time::Duration;

/// Per-buffer counters, cheap enough to keep on in release builds.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RingStats {
    pub locks: u64,
    pub appends: u64,
    pub discards: u64,
    pub wraps: u64,
    pub failed_locks: u64,
    pub staged_locks: u64,
    pub late_creations: u64,
    pub stalls: u64,
    pub stall_time: Duration,
    pub early_sub_pass_ends: u64,
    pub unfenced_reclaims: u64,
    pub ledger_coalesces: u64,
}

impl RingStats {
    pub fn merge(&mut self, other: &RingStats) {
        self.locks += other.locks;
        self.appends += other.appends;
        self.discards += other.discards;
        self.wraps += other.wraps;
        self.failed_locks += other.failed_locks;
        self.staged_locks += other.staged_locks;
        self.late_creations += other.late_creations;
        self.stalls += other.stalls;
        self.stall_time += other.stall_time;
        self.early_sub_pass_ends += other.early_sub_pass_ends;
        self.unfenced_reclaims += other.unfenced_reclaims;
        self.ledger_coalesces += other.ledger_coalesces;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_fields() {
        let mut total = RingStats {
            locks: 2,
            stall_time: Duration::from_millis(3),
            ..Default::default()
        };
        total.merge(&RingStats {
            locks: 1,
            stalls: 1,
            stall_time: Duration::from_millis(4),
            ..Default::default()
        });
        assert_eq!(total.locks, 3);
        assert_eq!(total.stalls, 1);
        assert_eq!(total.stall_time, Duration::from_millis(7));
    }
}
