pub mod ledger;
pub mod tracker;

pub use ledger::StepLedger;
pub use tracker::{CounterDeltaTracker, DeltaResult};
