use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-node retry budgets for the teardown/reset path.
///
/// These belong to the state machine, not the store: they live in process
/// memory keyed by machine id and are cleared when the teardown relationship
/// ends. A controller restart redoes at most one extra attempt, which is
/// safe.
#[derive(Clone, Default)]
pub struct TeardownCounters {
    inner: Arc<Mutex<HashMap<String, Counters>>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    reset_attempts: u32,
    etcd_leave_attempts: u32,
    maintenance_checks: u32,
}

impl TeardownCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_attempts(&self, id: &str) -> u32 {
        self.inner.lock().unwrap().get(id).map(|c| c.reset_attempts).unwrap_or(0)
    }

    pub fn etcd_leave_attempts(&self, id: &str) -> u32 {
        self.inner.lock().unwrap().get(id).map(|c| c.etcd_leave_attempts).unwrap_or(0)
    }

    /// Count a reset being issued; returns the new total.
    pub fn bump_reset_attempts(&self, id: &str) -> u32 {
        let mut guard = self.inner.lock().unwrap();
        let counters = guard.entry(id.to_string()).or_default();
        counters.reset_attempts += 1;
        counters.reset_attempts
    }

    /// Claim an etcd-leave attempt if the budget allows; increments on claim.
    pub fn try_etcd_leave(&self, id: &str, budget: u32) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let counters = guard.entry(id.to_string()).or_default();
        if counters.etcd_leave_attempts >= budget {
            return false;
        }
        counters.etcd_leave_attempts += 1;
        true
    }

    /// Count a maintenance version probe; returns the new total.
    pub fn bump_maintenance_checks(&self, id: &str) -> u32 {
        let mut guard = self.inner.lock().unwrap();
        let counters = guard.entry(id.to_string()).or_default();
        counters.maintenance_checks += 1;
        counters.maintenance_checks
    }

    /// Forget a machine once its teardown completes.
    pub fn clear(&self, id: &str) {
        self.inner.lock().unwrap().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etcd_leave_budget_is_enforced() {
        let counters = TeardownCounters::new();
        assert!(counters.try_etcd_leave("m1", 2));
        assert!(counters.try_etcd_leave("m1", 2));
        assert!(!counters.try_etcd_leave("m1", 2));
        // Other machines are unaffected.
        assert!(counters.try_etcd_leave("m2", 2));
    }

    #[test]
    fn clear_resets_all_budgets() {
        let counters = TeardownCounters::new();
        counters.bump_reset_attempts("m1");
        counters.bump_maintenance_checks("m1");
        counters.clear("m1");
        assert_eq!(counters.reset_attempts("m1"), 0);
        assert!(counters.try_etcd_leave("m1", 1));
    }
}
