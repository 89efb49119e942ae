//! Differentially private release of a [`LazyNode`].
//!
//! A publish charges every contributing subject
//! `sqrt(2 ln(1.25/δ)) · Δ_s / σ`, where `Δ_s` is the L2 norm of the bound
//! widths of the subject's sources. Subjects that cannot afford the charge
//! have their sources replaced by zero stand-ins and the node is replayed
//! without them. The remaining subjects are charged before any noise is
//! drawn, so a released value is always paid for.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use dpgraph_core::budget::BudgetLedger;
use dpgraph_core::config::PrivacyConfig;
use dpgraph_core::error::Error as CoreError;
use dpgraph_core::hash::{hash_serde, hash_tensor};
use dpgraph_core::id::{DataSubject, NodeId};
use dpgraph_core::receipt::{now_ms, PublishReceipt};
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::{LazyNode, SourceState};

use crate::error::{PublishError, Result};
use crate::noise::{gaussian_epsilon, GaussianNoise};
use crate::sensitivity::SensitivityEstimator;

/// Parameters of one release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishRequest {
    /// Noise multiplier; the added noise has standard deviation `sigma * sensitivity`.
    pub sigma: f64,
    /// Skip the sensitivity search and use 1.
    pub is_linear: bool,
    /// `false` releases the exact value without touching the ledger.
    pub private: bool,
}

impl PublishRequest {
    /// Private release of `node` with its own linearity flag.
    pub fn for_node(node: &LazyNode, sigma: f64) -> Self {
        Self {
            sigma,
            is_linear: node.is_linear(),
            private: true,
        }
    }
}

pub struct PublishEngine {
    config: PrivacyConfig,
    estimator: SensitivityEstimator,
    noise: Mutex<GaussianNoise>,
}

impl PublishEngine {
    pub fn new(config: PrivacyConfig) -> Result<Self> {
        if !(config.delta > 0.0 && config.delta < 1.0) {
            return Err(PublishError::InvalidDelta(config.delta));
        }
        config.validate()?;
        Ok(Self {
            estimator: SensitivityEstimator::new(&config),
            noise: Mutex::new(GaussianNoise::new(config.seed)),
            config,
        })
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    pub fn publish<L: BudgetLedger + ?Sized>(
        &self,
        node: &LazyNode,
        ledger: &L,
        request: PublishRequest,
    ) -> Result<Tensor> {
        self.publish_with_receipt(node, ledger, request)
            .map(|(value, _)| value)
    }

    pub fn publish_with_receipt<L: BudgetLedger + ?Sized>(
        &self,
        node: &LazyNode,
        ledger: &L,
        request: PublishRequest,
    ) -> Result<(Tensor, PublishReceipt)> {
        let sigma = request.sigma;
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(PublishError::InvalidSigma(sigma));
        }
        let mut receipt = PublishReceipt::new(
            hash_serde(node.expr().as_ref())?,
            sigma,
            self.config.delta,
            now_ms(),
        );

        if !request.private {
            let value = node.reconstruct(node.sources())?;
            let digest = hash_tensor(&value);
            return Ok((value, receipt.finish(now_ms(), Some(digest))));
        }

        let mut state = node.sources_as_state();
        let all_subjects = state.subjects();
        let mut dropped: BTreeSet<NodeId> = BTreeSet::new();
        let mut charged: BTreeMap<DataSubject, f64> = BTreeMap::new();
        let mut retries = 0;

        let (reduced, sensitivity) = loop {
            if retries > self.config.max_publish_retries {
                return Err(PublishError::RetryLimit(retries));
            }
            let costs = self.subject_costs(&state, sigma)?;

            // Drop every uncharged subject who cannot afford their share.
            let mut broke = Vec::new();
            for (subject, eps) in &costs {
                if charged.contains_key(subject) {
                    continue;
                }
                let affordable = match ledger.get_budget(subject) {
                    Ok(budget) => budget >= *eps,
                    Err(CoreError::BudgetExhausted { .. }) => false,
                    Err(e) => return Err(PublishError::Ledger(e.to_string())),
                };
                if !affordable {
                    broke.push(subject.clone());
                }
            }
            if !broke.is_empty() {
                self.redact_subjects(&mut state, &broke, &mut dropped, &all_subjects)?;
                retries += 1;
                continue;
            }

            // Calibrate on the reduced node before any charge lands.
            let reduced = if dropped.is_empty() {
                node.clone()
            } else {
                node.swap_state(state.clone())?
            };
            let sensitivity = if request.is_linear {
                1.0
            } else {
                self.estimator.lipschitz_bound(reduced.expr(), reduced.sources())?
            };

            let mut lost = Vec::new();
            for (subject, eps) in &costs {
                if charged.contains_key(subject) {
                    continue;
                }
                match ledger.deduct(subject, *eps) {
                    Ok(_) => {
                        charged.insert(subject.clone(), *eps);
                    }
                    Err(CoreError::BudgetExhausted { .. }) => lost.push(subject.clone()),
                    Err(e) => return Err(PublishError::Ledger(e.to_string())),
                }
            }
            if lost.is_empty() {
                break (reduced, sensitivity);
            }
            self.redact_subjects(&mut state, &lost, &mut dropped, &all_subjects)?;
            retries += 1;
        };

        let noise_scale = sigma * sensitivity;
        let value = reduced.value();
        let noised = self
            .noise
            .lock()
            .map_err(|_| PublishError::Ledger("noise generator mutex poisoned".into()))?
            .add_to(value, noise_scale)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            node = %node.id(),
            sensitivity,
            noise_scale,
            subjects = charged.len(),
            dropped = dropped.len(),
            retries,
            "published node"
        );

        receipt.sensitivity = sensitivity;
        receipt.noise_scale = noise_scale;
        receipt.charged = charged;
        receipt.dropped_sources = dropped.into_iter().collect();
        receipt.retries = retries;
        let digest = hash_tensor(&noised);
        Ok((noised, receipt.finish(now_ms(), Some(digest))))
    }

    /// Epsilon each subject of `state` would be charged at this `sigma`.
    pub fn subject_costs(&self, state: &SourceState, sigma: f64) -> Result<BTreeMap<DataSubject, f64>> {
        let mut out = BTreeMap::new();
        for subject in state.subjects() {
            let mut sq = 0.0;
            for id in state.sources_of(&subject) {
                let source = state.get(id).ok_or(CoreError::MissingSource(id))?;
                if !source.bounds().is_finite() {
                    return Err(PublishError::UnboundedSource(id));
                }
                sq += source.bounds().widths()?.data().iter().map(|w| w * w).sum::<f64>();
            }
            out.insert(subject, gaussian_epsilon(self.config.delta, sq.sqrt(), sigma));
        }
        Ok(out)
    }

    fn redact_subjects(
        &self,
        state: &mut SourceState,
        subjects: &[DataSubject],
        dropped: &mut BTreeSet<NodeId>,
        all_subjects: &BTreeSet<DataSubject>,
    ) -> Result<()> {
        for subject in subjects {
            for id in state.sources_of(subject) {
                state.redact(id)?;
                dropped.insert(id);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(subject = %subject, "dropping subject from publish");
        }
        if !state.is_empty() && dropped.len() == state.len() {
            return Err(PublishError::BudgetExhausted {
                subjects: all_subjects.iter().cloned().collect(),
            });
        }
        Ok(())
    }
}
