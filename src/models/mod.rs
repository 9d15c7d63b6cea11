mod archive;
mod article;
mod campaign;
mod content_item;
mod event;
mod rating;

pub use archive::{ArchiveReason, ArchiveSummary, ArchivedArticle};
pub use article::{Article, FactCheckRecord, NewArticle};
pub use campaign::{Campaign, CampaignStatus};
pub use content_item::{canonical_link, ContentItem, NewContentItem};
pub use event::{Event, NewEvent};
pub use rating::{weighted_total, Criterion, CriterionScore, Rating};
