//! Consultant analysts: three independent critics fanned out over one
//! article in DEEP mode. Each is continue-on-error from the
//! orchestrator's point of view — a failed analyst yields a neutral
//! default report, never blocks extraction.

pub mod detective;
pub mod economist;
pub mod skeptic;

pub use detective::Detective;
pub use economist::Economist;
pub use skeptic::Skeptic;
