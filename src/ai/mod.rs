mod capabilities;
mod claude;
mod client;
mod structured;

pub use capabilities::{
    DedupReply, DedupReplyGroup, Deduplicator, EvaluationReply, Evaluator, FactCheckReply,
    FactChecker, GeneratedArticle, Generator,
};
pub use client::ClaudeClient;
pub use structured::decode;
