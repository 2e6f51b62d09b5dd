pub mod pbs;
pub mod pmg;
pub mod pve;

/// Outcome of a single poll cycle for one upstream instance, handed to the
/// orchestrator to apply to the `StateStore` (spec.md §4.5's "only writer
/// for a given (instance, kind) is that instance's poller" is satisfied by
/// the orchestrator applying exactly one poller's outcome per instance per
/// cycle — the same collect-then-release-lock-then-spawn shape as the
/// teacher's `AgentPool::health_check_all`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCadenceDecision {
    Run,
    Skip,
}

/// spec.md §4.4 `shouldRunBackupPoll`: if a fixed interval is configured
/// and not enough time has passed, skip; else gate on a cycle counter.
pub fn should_run_backup_poll(
    fixed_interval_secs: Option<u64>,
    now_unix: i64,
    last_run_unix: Option<i64>,
    cycle_count: u64,
    cycles: u32,
) -> PollCadenceDecision {
    if let Some(interval) = fixed_interval_secs {
        let elapsed = last_run_unix.map(|last| now_unix - last).unwrap_or(i64::MAX);
        return if elapsed < interval as i64 { PollCadenceDecision::Skip } else { PollCadenceDecision::Run };
    }
    if cycles == 0 {
        return PollCadenceDecision::Skip;
    }
    if cycle_count % cycles as u64 == 0 {
        PollCadenceDecision::Run
    } else {
        PollCadenceDecision::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_skips_until_elapsed() {
        let d = should_run_backup_poll(Some(300), 1000, Some(900), 0, 0);
        assert_eq!(d, PollCadenceDecision::Skip);
        let d = should_run_backup_poll(Some(300), 1300, Some(900), 0, 0);
        assert_eq!(d, PollCadenceDecision::Run);
    }

    #[test]
    fn zero_cycles_means_disabled() {
        let d = should_run_backup_poll(None, 1000, None, 6, 0);
        assert_eq!(d, PollCadenceDecision::Skip);
    }

    #[test]
    fn cycle_gated_runs_every_n() {
        assert_eq!(should_run_backup_poll(None, 0, None, 6, 6), PollCadenceDecision::Run);
        assert_eq!(should_run_backup_poll(None, 0, None, 5, 6), PollCadenceDecision::Skip);
    }
}
