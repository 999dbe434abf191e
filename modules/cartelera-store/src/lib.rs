pub mod memory;
pub mod postgres;
pub mod repo;

pub use memory::MemoryEventRepository;
pub use postgres::PgEventRepository;
pub use repo::{CandidateEvent, EventRepository, SaveOutcome};
