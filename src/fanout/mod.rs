//! Recipient resolution, batched push dispatch, token reconciliation and
//! per-recipient record fan-out.

pub mod dispatcher;
pub mod reconcile;
pub mod records;
pub mod resolver;

pub use dispatcher::{BatchDispatcher, DispatchSettings, DispatchSummary, FailureRecord};
pub use reconcile::{reconcile, ReconcileSummary};
pub use records::fan_out;
pub use resolver::{resolve, Audience, Recipient, Resolution};
