#![forbid(unsafe_code)]
//! dpgraph-dp: privacy budget ledger, Lipschitz sensitivity search and the
//! redacting Gaussian publish engine.

pub mod error;
pub mod ledger;
pub mod noise;
pub mod publish;
pub mod sensitivity;

pub use error::{PublishError, Result};
pub use ledger::{Deduction, InMemoryLedger, LedgerConfig};
pub use noise::{gaussian_epsilon, GaussianNoise};
pub use publish::{PublishEngine, PublishRequest};
pub use sensitivity::SensitivityEstimator;
