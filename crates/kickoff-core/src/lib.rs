//! Domain types shared by the feed and the server: filter criteria, the
//! match document model, the inbound control protocol and connection ids.

pub mod control;
pub mod criteria;
pub mod document;
pub mod errors;
pub mod ids;

pub use control::{ControlCommand, ControlMessage, UPDATE_FILTERS_ACTION};
pub use criteria::FilterCriteria;
pub use document::{Document, FilteredDocument, MatchRecord};
pub use errors::{ControlError, PayloadError};
pub use ids::ConnectionId;
