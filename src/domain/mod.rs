//! Domain types for content changes and their invalidation outcomes.

pub mod error;
pub mod event;
pub mod outcome;
pub mod target;

pub use error::ResolutionError;
pub use event::{ChangeEvent, ChangeKind, ChangeNotice};
pub use outcome::{AbandonedPair, InvalidationOutcome, InvalidationResult, InvalidationStatus};
pub use target::InvalidationTarget;
