//! Domain model (ids, work items, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod item;
pub mod outcome;

pub use errors::{RemoteError, SpoolError};
pub use ids::RecordId;
pub use item::{ImageAttachment, WorkItem, WorkPayload};
pub use outcome::{AnalysisOutcome, AnalysisResponse, ResponseMeta};
