use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Traffic allowance shared by every measurement of a process.
pub trait TrafficBudget: Send + Sync {
    /// Bytes that can still be spent.
    fn remaining(&self) -> u64;

    /// Charge `bytes`. Returns false if they did not fit into an active budget.
    fn add_used(&self, bytes: u64) -> bool;

    /// An inactive budget keeps counting but never refuses a run.
    fn is_active(&self) -> bool;

    fn is_exhausted(&self) -> bool { self.is_active() && self.remaining() == 0 }
}

/// No limit at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl TrafficBudget for Unlimited {
    fn remaining(&self) -> u64 { u64::MAX }

    fn add_used(&self, _bytes: u64) -> bool { true }

    fn is_active(&self) -> bool { false }
}

/// In-memory budget of `available` bytes.
#[derive(Debug, Default)]
pub struct TrafficBudgetManager {
    available: AtomicU64,
    used:      AtomicU64,
    active:    AtomicBool,
}

impl TrafficBudgetManager {
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
            used:      AtomicU64::new(0),
            active:    AtomicBool::new(true),
        }
    }

    /// Start from a previously recorded usage.
    #[must_use]
    pub fn with_used(self, used: u64) -> Self {
        self.used.store(used, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn with_active(self, active: bool) -> Self {
        self.active.store(active, Ordering::Relaxed);
        self
    }

    pub fn available(&self) -> u64 { self.available.load(Ordering::Relaxed) }

    pub fn used(&self) -> u64 { self.used.load(Ordering::Relaxed) }

    /// Forget all recorded usage, e.g. at the start of a new billing period.
    pub fn reset(&self) { self.used.store(0, Ordering::Relaxed); }
}

impl TrafficBudget for TrafficBudgetManager {
    fn remaining(&self) -> u64 { self.available().saturating_sub(self.used()) }

    fn add_used(&self, bytes: u64) -> bool {
        let available = self.available();
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            if available.saturating_sub(used) < bytes {
                return !self.is_active();
            }
            match self
                .used
                .compare_exchange_weak(used, used + bytes, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => used = actual,
            }
        }
    }

    fn is_active(&self) -> bool { self.active.load(Ordering::Relaxed) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_charges_until_exhausted() {
        let budget = TrafficBudgetManager::new(1000);
        assert!(budget.add_used(600));
        assert_eq!(budget.remaining(), 400);
        assert!(!budget.add_used(500));
        assert_eq!(budget.used(), 600);
        assert!(budget.add_used(400));
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_inactive_budget_never_refuses() {
        let budget = TrafficBudgetManager::new(10).with_active(false);
        assert!(budget.add_used(100));
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_reset_and_prior_usage() {
        let budget = TrafficBudgetManager::new(100).with_used(100);
        assert!(budget.is_exhausted());
        budget.reset();
        assert_eq!(budget.remaining(), 100);
    }

    #[test]
    fn test_unlimited() {
        assert!(Unlimited.add_used(u64::MAX));
        assert!(!Unlimited.is_exhausted());
    }

    #[test]
    fn test_concurrent_charges_never_overshoot() {
        let budget = Arc::new(TrafficBudgetManager::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || (0..100).filter(|_| budget.add_used(20)).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 500);
        assert_eq!(budget.used(), 10_000);
    }
}
