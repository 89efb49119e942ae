//! Differentially private publishing against instrumented ledgers.

mod fixtures;

use std::collections::HashMap;
use std::sync::Mutex;

use dpgraph_core::budget::BudgetLedger;
use dpgraph_core::config::PrivacyConfig;
use dpgraph_core::id::DataSubject;
use dpgraph_core::{Error, Result};
use dpgraph_dp::{
    InMemoryLedger, PublishEngine, PublishError, PublishRequest, SensitivityEstimator,
};
use fixtures::leaf;

/// Wraps a ledger, counting every deduct call per subject. Subjects listed in
/// `fail_deduct` always look funded but lose the race at deduct time.
struct RecordingLedger {
    inner: InMemoryLedger,
    fail_deduct: Vec<DataSubject>,
    calls: Mutex<HashMap<DataSubject, usize>>,
}

impl RecordingLedger {
    fn new(epsilon: f64, fail_deduct: &[&str]) -> Self {
        Self {
            inner: InMemoryLedger::with_default(epsilon),
            fail_deduct: fail_deduct.iter().map(|s| DataSubject::from(*s)).collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, subject: &str) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.get(&DataSubject::from(subject)).copied().unwrap_or(0)
    }
}

impl BudgetLedger for RecordingLedger {
    fn get_budget(&self, subject: &DataSubject) -> Result<f64> {
        self.inner.get_budget(subject)
    }

    fn deduct(&self, subject: &DataSubject, epsilon: f64) -> Result<f64> {
        *self.calls.lock().unwrap().entry(subject.clone()).or_default() += 1;
        if self.fail_deduct.contains(subject) {
            return Err(Error::BudgetExhausted {
                subject: subject.clone(),
                requested: epsilon,
                remaining: 0.0,
            });
        }
        self.inner.deduct(subject, epsilon)
    }
}

fn engine() -> PublishEngine {
    PublishEngine::new(PrivacyConfig::default().with_seed(17)).expect("valid config")
}

#[test]
fn test_linear_sensitivity_is_one_and_square_is_steeper() {
    let estimator = SensitivityEstimator::new(&PrivacyConfig::default().with_seed(1));
    let x = leaf(&[0.4, 0.6], 0.0, 1.0, "alice");
    let total = x.sum(None, false).unwrap();
    assert_eq!(estimator.estimate(&total).unwrap(), 1.0);

    let squared = x.pow_scalar(2.0).unwrap();
    assert!(estimator.estimate(&squared).unwrap() > 1.0);
}

#[test]
fn test_lost_deduct_race_drops_subject_without_double_charging() {
    let a = leaf(&[0.5], 0.0, 1.0, "alice");
    let b = leaf(&[0.5], 0.0, 1.0, "bob");
    let y = a.add(&b).unwrap();
    let ledger = RecordingLedger::new(f64::INFINITY, &["bob"]);

    let (_, receipt) = engine()
        .publish_with_receipt(&y, &ledger, PublishRequest::for_node(&y, 1.0))
        .expect("alice alone can still be released");
    assert_eq!(ledger.calls("alice"), 1);
    assert_eq!(ledger.calls("bob"), 1);
    assert_eq!(receipt.dropped_sources, vec![b.id()]);
    assert_eq!(receipt.charged.len(), 1);
    assert_eq!(receipt.retries, 1);
}

#[test]
fn test_no_value_when_every_deduct_fails() {
    let a = leaf(&[0.5], 0.0, 1.0, "alice");
    let y = a.mul(3.0).unwrap();
    let ledger = RecordingLedger::new(f64::INFINITY, &["alice"]);
    let err = engine()
        .publish(&y, &ledger, PublishRequest::for_node(&y, 1.0))
        .unwrap_err();
    assert!(matches!(err, PublishError::BudgetExhausted { .. }));
    assert_eq!(ledger.calls("alice"), 1);
}

#[test]
fn test_repeated_publishes_drain_budget() {
    let a = leaf(&[0.5, 0.5], 0.0, 1.0, "alice");
    let y = a.sum(None, false).unwrap();
    let engine = engine();
    let request = PublishRequest::for_node(&y, 4.0);
    let cost = engine
        .subject_costs(y.sources(), request.sigma)
        .expect("finite bounds")[&DataSubject::from("alice")];
    let ledger = InMemoryLedger::with_default(2.5 * cost);

    engine.publish(&y, &ledger, request).expect("first release");
    engine.publish(&y, &ledger, request).expect("second release");
    let err = engine.publish(&y, &ledger, request).unwrap_err();
    assert!(matches!(err, PublishError::BudgetExhausted { .. }));
    assert_eq!(ledger.history().unwrap().len(), 2);
}

#[test]
fn test_receipt_serializes_for_audit() {
    let a = leaf(&[0.1, 0.9], 0.0, 1.0, "alice");
    let y = a.mean(None, false).unwrap();
    let ledger = InMemoryLedger::with_default(f64::INFINITY);
    let (value, receipt) = engine()
        .publish_with_receipt(&y, &ledger, PublishRequest::for_node(&y, 2.0))
        .unwrap();
    assert!(value.is_finite());
    let json = serde_json::to_value(&receipt).unwrap();
    assert_eq!(json["sensitivity"], 1.0);
    assert_eq!(json["noise_scale"], 2.0);
    assert!(json["charged"]["alice"].as_f64().unwrap() > 0.0);
    assert!(receipt.output_digest.is_some());
}
