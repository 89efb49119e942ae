//! Convenient re-exports for downstream crates.

pub use crate::bounds::{Bounds, BoundsData, ValueBounds};
pub use crate::budget::BudgetLedger;
pub use crate::config::PrivacyConfig;
pub use crate::dtype::DType;
pub use crate::error::{Error, Result};
pub use crate::id::{DataSubject, NodeId, ObjectId, PartyId};
pub use crate::receipt::{PublishReceipt, ReceiptId};
pub use crate::shape::Shape;
pub use crate::tensor::{ReduceKind, Tensor};
