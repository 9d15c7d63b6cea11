mod archive;
mod campaigns;
mod events;
mod repository;
mod schema;

pub use campaigns::{Checkpoint, CheckpointOutcome, StageClaim};
pub use repository::{Repository, ScoredItem};
