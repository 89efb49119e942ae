//! In-memory [`BudgetLedger`] used by tests, demos and single-process setups.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use dpgraph_core::budget::BudgetLedger;
use dpgraph_core::error::{Error, Result};
use dpgraph_core::id::DataSubject;

/// Slack for floating-point round-off when a charge equals the remainder.
const EPS_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Total epsilon granted to a subject with no override.
    pub default_epsilon: f64,
    /// Per-subject totals.
    pub overrides: BTreeMap<DataSubject, f64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_epsilon: 1.0,
            overrides: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    pub fn allowance(&self, subject: &DataSubject) -> f64 {
        self.overrides
            .get(subject)
            .copied()
            .unwrap_or(self.default_epsilon)
    }
}

/// One successful charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub subject: DataSubject,
    pub epsilon: f64,
    pub remaining: f64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    spent: HashMap<DataSubject, f64>,
    history: Vec<Deduction>,
}

/// Cumulative per-subject spend behind one mutex, so check-and-subtract is
/// atomic with respect to concurrent publishes.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    config: LedgerConfig,
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Every subject gets `epsilon`.
    pub fn with_default(epsilon: f64) -> Self {
        Self::new(LedgerConfig {
            default_epsilon: epsilon,
            overrides: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Ledger("ledger mutex poisoned".into()))
    }

    pub fn spent(&self, subject: &DataSubject) -> Result<f64> {
        Ok(self.lock()?.spent.get(subject).copied().unwrap_or(0.0))
    }

    /// All successful charges, oldest first.
    pub fn history(&self) -> Result<Vec<Deduction>> {
        Ok(self.lock()?.history.clone())
    }
}

impl BudgetLedger for InMemoryLedger {
    fn get_budget(&self, subject: &DataSubject) -> Result<f64> {
        let spent = self.spent(subject)?;
        Ok((self.config.allowance(subject) - spent).max(0.0))
    }

    fn deduct(&self, subject: &DataSubject, epsilon: f64) -> Result<f64> {
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(Error::Ledger(format!("invalid epsilon charge {epsilon}")));
        }
        let mut inner = self.lock()?;
        let spent = inner.spent.get(subject).copied().unwrap_or(0.0);
        let remaining = self.config.allowance(subject) - spent;
        if epsilon > remaining + EPS_TOLERANCE {
            return Err(Error::BudgetExhausted {
                subject: subject.clone(),
                requested: epsilon,
                remaining: remaining.max(0.0),
            });
        }
        let left = (remaining - epsilon).max(0.0);
        inner.spent.insert(subject.clone(), spent + epsilon);
        inner.history.push(Deduction {
            subject: subject.clone(),
            epsilon,
            remaining: left,
        });
        Ok(left)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn deduct_until_exhausted() {
        let ledger = InMemoryLedger::with_default(1.0);
        let alice = DataSubject::from("alice");
        assert_eq!(ledger.get_budget(&alice).unwrap(), 1.0);
        assert!((ledger.deduct(&alice, 0.6).unwrap() - 0.4).abs() < 1e-12);
        let err = ledger.deduct(&alice, 0.5).unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted { .. }));
        // a failed charge leaves the balance alone
        assert!((ledger.get_budget(&alice).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(ledger.history().unwrap().len(), 1);
    }

    #[test]
    fn overrides_apply_per_subject() {
        let mut config = LedgerConfig::default();
        config.overrides.insert(DataSubject::from("bob"), 0.1);
        let ledger = InMemoryLedger::new(config);
        assert_eq!(ledger.get_budget(&DataSubject::from("bob")).unwrap(), 0.1);
        assert_eq!(ledger.get_budget(&DataSubject::from("carol")).unwrap(), 1.0);
    }

    #[test]
    fn concurrent_deducts_never_overspend() {
        let ledger = Arc::new(InMemoryLedger::with_default(1.0));
        let subject = DataSubject::from("shared");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let subject = subject.clone();
                thread::spawn(move || ledger.deduct(&subject, 0.3).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 3);
        assert!(ledger.spent(&subject).unwrap() <= 1.0);
    }
}
