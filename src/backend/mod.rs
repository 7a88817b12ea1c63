pub mod client;
pub mod schemas;

pub use client::{CommandBackend, HttpBackend};
pub use schemas::{ActionResult, CommandSummary, RunOutcome};
