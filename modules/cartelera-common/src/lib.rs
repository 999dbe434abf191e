pub mod agents;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod quality;
pub mod sources;
pub mod text;
pub mod vocab;

pub use agents::{ChatModel, TextEmbedder};
pub use config::Config;
pub use error::IngestError;
pub use events::{
    Accessibility, ContactInfo, Enrichment, EventDraft, LocationType, OnlineDetails, Organizer,
    Registration, SourceContribution,
};
pub use sources::{
    BronzeSource, FeedKind, GoldSource, Pagination, SilverSource, SourceConfig, SourceMeta,
    SourceTier,
};
pub use vocab::{Category, ModelSlot, CATEGORIES, FALLBACK_CATEGORY, VOCAB_VERSION};
