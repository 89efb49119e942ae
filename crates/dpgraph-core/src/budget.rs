//! Abstract privacy-budget ledger interface.
//!
//! The in-memory implementation lives in `dpgraph-dp`. Only the trait lives
//! here so any crate (and any external accountant) can plug in without pulling
//! the publish machinery.

use std::sync::Arc;

use crate::error::Result;
use crate::id::DataSubject;

/// Per-subject cumulative epsilon accounting.
///
/// `deduct` must check and subtract atomically for a subject: two concurrent
/// publishes may not both pass the check on the last slice of budget. A failed
/// deduct leaves the subject's balance untouched and returns
/// [`crate::Error::BudgetExhausted`] (or [`crate::Error::Ledger`] for
/// backend failures).
pub trait BudgetLedger: Send + Sync {
    /// Remaining epsilon for `subject`.
    fn get_budget(&self, subject: &DataSubject) -> Result<f64>;

    /// Charge `epsilon` to `subject`; returns the remaining balance.
    fn deduct(&self, subject: &DataSubject, epsilon: f64) -> Result<f64>;
}

impl<L: BudgetLedger + ?Sized> BudgetLedger for Arc<L> {
    fn get_budget(&self, subject: &DataSubject) -> Result<f64> {
        (**self).get_budget(subject)
    }

    fn deduct(&self, subject: &DataSubject, epsilon: f64) -> Result<f64> {
        (**self).deduct(subject, epsilon)
    }
}

impl<L: BudgetLedger + ?Sized> BudgetLedger for &L {
    fn get_budget(&self, subject: &DataSubject) -> Result<f64> {
        (**self).get_budget(subject)
    }

    fn deduct(&self, subject: &DataSubject, epsilon: f64) -> Result<f64> {
        (**self).deduct(subject, epsilon)
    }
}
