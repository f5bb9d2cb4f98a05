//! Budget Accountant.
//!
//! Tracks `{spent, limit}` per `(instance, day)`. Debits are monotonic and
//! idempotent on `(correlation_id, step_id)` — replaying the same step
//! never double-charges. The ledger itself never mutates instance state;
//! gating an instance based on utilisation is the caller's job.

use agentgov_core::ids::{CorrelationId, InstanceId, StepId};
use agentgov_core::{GovernanceError, Result};
use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetGate {
    Ok,
    Warn,
    Suspend,
}

#[derive(Debug, Clone, Default)]
struct DayLedger {
    spent_usd: f64,
    limit_usd: f64,
    seen_debits: std::collections::HashSet<(CorrelationId, StepId)>,
}

type Key = (InstanceId, NaiveDate);

pub struct BudgetLedger {
    days: DashMap<Key, Mutex<DayLedger>>,
    warn_ratio: f64,
    approval_ratio: f64,
}

impl BudgetLedger {
    pub fn new(warn_ratio: f64, approval_ratio: f64) -> Self {
        Self { days: DashMap::new(), warn_ratio, approval_ratio }
    }

    fn entry(&self, instance_id: &InstanceId, day: NaiveDate, limit_usd: f64) -> dashmap::mapref::one::RefMut<'_, Key, Mutex<DayLedger>> {
        self.days
            .entry((instance_id.clone(), day))
            .or_insert_with(|| Mutex::new(DayLedger { spent_usd: 0.0, limit_usd, ..Default::default() }))
    }

    /// Debit `cost_usd` against `(instance, day)`. Returns the gate the
    /// caller must act on. A replay of the same `(correlation_id,
    /// step_id)` is a no-op that returns the gate as it already stood.
    pub fn debit(
        &self,
        instance_id: &InstanceId,
        day: NaiveDate,
        limit_usd: f64,
        correlation_id: CorrelationId,
        step_id: StepId,
        cost_usd: f64,
    ) -> Result<BudgetGate> {
        if cost_usd < 0.0 {
            return Err(GovernanceError::Validation("debit amount must be non-negative".to_string()));
        }

        let entry = self.entry(instance_id, day, limit_usd);
        let mut ledger = entry.lock().unwrap();

        let dedupe_key = (correlation_id, step_id);
        if ledger.seen_debits.contains(&dedupe_key) {
            return Ok(Self::gate_for(ledger.spent_usd, ledger.limit_usd, self.warn_ratio, self.approval_ratio));
        }

        let utilisation_before = if ledger.limit_usd > 0.0 { ledger.spent_usd / ledger.limit_usd } else { 1.0 };
        if utilisation_before >= 1.0 && cost_usd > 0.0 {
            return Err(GovernanceError::Budget(format!(
                "instance {instance_id} already at or over budget for {day}"
            )));
        }

        ledger.spent_usd += cost_usd;
        ledger.seen_debits.insert(dedupe_key);

        Ok(Self::gate_for(ledger.spent_usd, ledger.limit_usd, self.warn_ratio, self.approval_ratio))
    }

    /// A one-time raise applied to a specific `(instance, day)`, tied to an
    /// approved `emergency_budget` Approval Request by the caller.
    pub fn grant_emergency(&self, instance_id: &InstanceId, day: NaiveDate, limit_usd: f64, additional_usd: f64) {
        let entry = self.entry(instance_id, day, limit_usd);
        let mut ledger = entry.lock().unwrap();
        ledger.limit_usd += additional_usd;
    }

    pub fn utilisation(&self, instance_id: &InstanceId, day: NaiveDate) -> Option<(f64, f64)> {
        self.days.get(&(instance_id.clone(), day)).map(|e| {
            let l = e.lock().unwrap();
            (l.spent_usd, l.limit_usd)
        })
    }

    fn gate_for(spent: f64, limit: f64, warn_ratio: f64, approval_ratio: f64) -> BudgetGate {
        if limit <= 0.0 {
            return BudgetGate::Suspend;
        }
        let utilisation = spent / limit;
        if utilisation >= 1.0 {
            BudgetGate::Suspend
        } else if utilisation >= approval_ratio || utilisation >= warn_ratio {
            BudgetGate::Warn
        } else {
            BudgetGate::Ok
        }
    }
}

/// Tracks which `(instance, day)` keys have already emitted a `BUDGET_WARN`
/// audit event, so the caller emits it exactly once per threshold crossing.
pub struct WarnEmissionTracker {
    warned: DashSet<Key>,
}

impl Default for WarnEmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WarnEmissionTracker {
    pub fn new() -> Self {
        Self { warned: DashSet::new() }
    }

    /// Returns `true` the first time this key crosses into warn territory;
    /// `false` on every subsequent call for the same key.
    pub fn should_emit(&self, instance_id: &InstanceId, day: NaiveDate) -> bool {
        self.warned.insert((instance_id.clone(), day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[test]
    fn debits_accumulate_and_gate_by_utilisation() {
        let ledger = BudgetLedger::new(0.8, 0.95);
        let instance = InstanceId::generate();

        let gate = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 50.0)
            .unwrap();
        assert_eq!(gate, BudgetGate::Ok);

        let gate = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 35.0)
            .unwrap();
        assert_eq!(gate, BudgetGate::Warn);
    }

    #[test]
    fn debit_at_full_utilisation_refuses_further_spend() {
        let ledger = BudgetLedger::new(0.8, 0.95);
        let instance = InstanceId::generate();

        ledger.debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 100.0).unwrap();

        let err = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 1.0)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Budget(_)));
    }

    #[test]
    fn zero_cost_debit_at_full_utilisation_still_succeeds() {
        let ledger = BudgetLedger::new(0.8, 0.95);
        let instance = InstanceId::generate();

        ledger.debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 100.0).unwrap();

        let gate = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 0.0)
            .unwrap();
        assert_eq!(gate, BudgetGate::Suspend);

        let err = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 1.0)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Budget(_)));
    }

    #[test]
    fn replaying_the_same_step_is_idempotent() {
        let ledger = BudgetLedger::new(0.8, 0.95);
        let instance = InstanceId::generate();
        let correlation_id = CorrelationId::generate();
        let step_id = StepId::generate();

        ledger.debit(&instance, day(), 100.0, correlation_id.clone(), step_id.clone(), 40.0).unwrap();
        ledger.debit(&instance, day(), 100.0, correlation_id, step_id, 40.0).unwrap();

        let (spent, _) = ledger.utilisation(&instance, day()).unwrap();
        assert_eq!(spent, 40.0);
    }

    #[test]
    fn emergency_grant_raises_the_limit_for_that_day() {
        let ledger = BudgetLedger::new(0.8, 0.95);
        let instance = InstanceId::generate();
        ledger.debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 100.0).unwrap();

        ledger.grant_emergency(&instance, day(), 100.0, 50.0);
        let gate = ledger
            .debit(&instance, day(), 100.0, CorrelationId::generate(), StepId::generate(), 10.0)
            .unwrap();
        assert_eq!(gate, BudgetGate::Warn);
    }

    #[test]
    fn warn_emission_tracker_fires_once_per_key() {
        let tracker = WarnEmissionTracker::new();
        let instance = InstanceId::generate();
        assert!(tracker.should_emit(&instance, day()));
        assert!(!tracker.should_emit(&instance, day()));
    }
}
