//! Per-origin failure counting and bans

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use termgate_config::AuthConfig;
use termgate_util::MonotonicInstant;

/// Failure history of one origin address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRecord {
    pub failure_count: u32,
    pub banned_until: Option<MonotonicInstant>,
    pub last_activity: MonotonicInstant,
}

impl SecurityRecord {
    fn new(now: MonotonicInstant) -> Self {
        Self {
            failure_count: 0,
            banned_until: None,
            last_activity: now,
        }
    }

    fn is_banned_at(&self, now: MonotonicInstant) -> bool {
        matches!(self.banned_until, Some(until) if now < until)
    }

    /// Clear an expired ban together with the count that led to it
    fn reset_if_expired(&mut self, now: MonotonicInstant) {
        if let Some(until) = self.banned_until
            && now >= until
        {
            self.failure_count = 0;
            self.banned_until = None;
        }
    }
}

/// Threshold and ban length applied on each failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanPolicy {
    pub max_failures: u32,
    pub ban_duration: Duration,
}

impl From<&AuthConfig> for BanPolicy {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            max_failures: auth.max_failures,
            ban_duration: auth.ban_duration,
        }
    }
}

/// Result of registering one failed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Below the threshold; the origin may reconnect
    Retry { failures: u32 },

    /// The origin is banned. `newly_banned` is true only for the failure
    /// that crossed the threshold.
    Banned {
        failures: u32,
        until: MonotonicInstant,
        newly_banned: bool,
    },
}

/// Shared map from origin address to failure count and ban expiry.
///
/// Every operation runs under one mutex, so concurrent failures from the
/// same origin are counted exactly and produce a single ban.
#[derive(Debug, Default)]
pub struct SecurityLedger {
    records: Mutex<HashMap<IpAddr, SecurityRecord>>,
}

impl SecurityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, SecurityRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_record(
        records: &mut HashMap<IpAddr, SecurityRecord>,
        addr: IpAddr,
        now: MonotonicInstant,
    ) -> &mut SecurityRecord {
        let record = records
            .entry(addr)
            .or_insert_with(|| SecurityRecord::new(now));
        record.reset_if_expired(now);
        record.last_activity = now;
        record
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.is_banned_at(addr, MonotonicInstant::now())
    }

    /// True iff an unexpired ban is recorded. Never creates a record.
    pub fn is_banned_at(&self, addr: IpAddr, now: MonotonicInstant) -> bool {
        let mut records = self.lock();
        match records.get_mut(&addr) {
            Some(record) => {
                record.reset_if_expired(now);
                record.is_banned_at(now)
            }
            None => false,
        }
    }

    pub fn record_failure(&self, addr: IpAddr) -> u32 {
        self.record_failure_at(addr, MonotonicInstant::now())
    }

    /// Increment and return the failure count for `addr`
    pub fn record_failure_at(&self, addr: IpAddr, now: MonotonicInstant) -> u32 {
        let mut records = self.lock();
        let record = Self::live_record(&mut records, addr, now);
        record.failure_count = record.failure_count.saturating_add(1);
        record.failure_count
    }

    pub fn ban(&self, addr: IpAddr, duration: Duration) {
        self.ban_at(addr, duration, MonotonicInstant::now())
    }

    /// Ban `addr` until `now + duration`. The failure count is kept.
    pub fn ban_at(&self, addr: IpAddr, duration: Duration, now: MonotonicInstant) {
        let mut records = self.lock();
        let record = Self::live_record(&mut records, addr, now);
        record.banned_until = Some(now + duration);
    }

    /// Count a failure and apply the ban policy in one critical section
    pub fn register_failure(
        &self,
        addr: IpAddr,
        policy: &BanPolicy,
        now: MonotonicInstant,
    ) -> FailureVerdict {
        let mut records = self.lock();
        let record = Self::live_record(&mut records, addr, now);
        record.failure_count = record.failure_count.saturating_add(1);
        let failures = record.failure_count;

        if let Some(until) = record.banned_until
            && now < until
        {
            return FailureVerdict::Banned {
                failures,
                until,
                newly_banned: false,
            };
        }

        if failures >= policy.max_failures {
            let until = now + policy.ban_duration;
            record.banned_until = Some(until);
            FailureVerdict::Banned {
                failures,
                until,
                newly_banned: true,
            }
        } else {
            FailureVerdict::Retry { failures }
        }
    }

    /// Current failure count, zero for unknown or expired origins
    pub fn failure_count(&self, addr: IpAddr, now: MonotonicInstant) -> u32 {
        let mut records = self.lock();
        match records.get_mut(&addr) {
            Some(record) => {
                record.reset_if_expired(now);
                record.failure_count
            }
            None => 0,
        }
    }

    /// Drop records that are not banned and have been idle for `idle_for`.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, idle_for: Duration, now: MonotonicInstant) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| {
            record.is_banned_at(now) || now.duration_since(record.last_activity) < idle_for
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    fn policy() -> BanPolicy {
        BanPolicy {
            max_failures: 5,
            ban_duration: Duration::from_secs(300),
        }
    }

    #[test]
    fn unknown_origin_is_not_banned_and_not_recorded() {
        let ledger = SecurityLedger::new();
        assert!(!ledger.is_banned(ADDR));
        assert!(ledger.is_empty());
    }

    #[test]
    fn record_failure_counts_up() {
        let ledger = SecurityLedger::new();
        assert_eq!(ledger.record_failure(ADDR), 1);
        assert_eq!(ledger.record_failure(ADDR), 2);
        assert_eq!(ledger.record_failure(OTHER), 1);
    }

    #[test]
    fn ban_expires_and_resets_count() {
        let ledger = SecurityLedger::new();
        let t0 = MonotonicInstant::now();
        let ban = Duration::from_secs(300);

        for _ in 0..3 {
            ledger.record_failure_at(ADDR, t0);
        }
        ledger.ban_at(ADDR, ban, t0);

        assert!(ledger.is_banned_at(ADDR, t0));
        assert!(ledger.is_banned_at(ADDR, t0 + (ban - Duration::from_millis(1))));
        assert_eq!(ledger.failure_count(ADDR, t0), 3);

        assert!(!ledger.is_banned_at(ADDR, t0 + ban));
        assert_eq!(ledger.failure_count(ADDR, t0 + ban), 0);
        assert_eq!(ledger.record_failure_at(ADDR, t0 + ban), 1);
    }

    #[test]
    fn ban_keeps_count() {
        let ledger = SecurityLedger::new();
        let t0 = MonotonicInstant::now();
        ledger.record_failure_at(ADDR, t0);
        ledger.record_failure_at(ADDR, t0);
        ledger.ban_at(ADDR, Duration::from_secs(10), t0);
        assert_eq!(ledger.failure_count(ADDR, t0), 2);
    }

    #[test]
    fn register_failure_bans_at_threshold() {
        let ledger = SecurityLedger::new();
        let now = MonotonicInstant::now();
        let policy = policy();

        for expected in 1..5 {
            assert_eq!(
                ledger.register_failure(ADDR, &policy, now),
                FailureVerdict::Retry { failures: expected }
            );
        }

        match ledger.register_failure(ADDR, &policy, now) {
            FailureVerdict::Banned {
                failures,
                until,
                newly_banned,
            } => {
                assert_eq!(failures, 5);
                assert_eq!(until, now + policy.ban_duration);
                assert!(newly_banned);
            }
            other => panic!("expected ban, got {:?}", other),
        }
        assert!(ledger.is_banned_at(ADDR, now));

        // Further failures while banned do not extend or repeat the ban
        match ledger.register_failure(ADDR, &policy, now + Duration::from_secs(1)) {
            FailureVerdict::Banned {
                until, newly_banned, ..
            } => {
                assert_eq!(until, now + policy.ban_duration);
                assert!(!newly_banned);
            }
            other => panic!("expected ban, got {:?}", other),
        }
    }

    #[test]
    fn concurrent_failures_ban_exactly_once() {
        let ledger = Arc::new(SecurityLedger::new());
        let policy = policy();
        let threads = policy.max_failures as usize;
        let barrier = Arc::new(Barrier::new(threads));
        let now = MonotonicInstant::now();

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ledger.register_failure(ADDR, &policy, now)
                })
            })
            .collect();

        let verdicts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let new_bans = verdicts
            .iter()
            .filter(|v| matches!(v, FailureVerdict::Banned { newly_banned: true, .. }))
            .count();

        assert_eq!(new_bans, 1);
        assert_eq!(ledger.failure_count(ADDR, now), policy.max_failures);
        assert!(ledger.is_banned_at(ADDR, now));
    }

    #[test]
    fn sweep_removes_idle_unbanned_records() {
        let ledger = SecurityLedger::new();
        let t0 = MonotonicInstant::now();
        let idle = Duration::from_secs(3600);

        ledger.record_failure_at(ADDR, t0);
        ledger.record_failure_at(OTHER, t0);
        ledger.ban_at(OTHER, Duration::from_secs(7200), t0);

        assert_eq!(ledger.sweep(idle, t0 + Duration::from_secs(10)), 0);
        assert_eq!(ledger.sweep(idle, t0 + idle), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_banned_at(OTHER, t0 + idle));

        // Once the ban lapses the record is idle and goes too
        assert_eq!(ledger.sweep(idle, t0 + Duration::from_secs(7200)), 1);
        assert!(ledger.is_empty());
    }
}
