pub mod archive;
pub mod assembler;
pub mod dedup;
pub mod dispatch;
pub mod events;
pub mod ingest;
pub mod schedule;
pub mod scoring;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::Archiver;
pub use assembler::{rank_candidates, Assembler, AssemblyReport};
pub use dedup::group_candidates;
pub use dispatch::{DispatchExecutor, DispatchOutcome};
pub use events::populate_events;
pub use ingest::{Gatekeeper, IngestReport};
pub use schedule::{Decision, DispatchController, SkipReason, Stage, StageRun};
pub use scoring::{ScoringEngine, ScoringReport};
pub use workflow::CampaignWorkflow;
