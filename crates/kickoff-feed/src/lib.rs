//! Upstream side of the pipeline: when to fetch, what to fetch, and the
//! single-slot handoff that carries each fetched document to the broadcaster.

pub mod cadence;
pub mod client;
pub mod error;
pub mod producer;
pub mod range;
pub mod slot;

pub use cadence::{Cadence, Ticker, MAX_PERIOD};
pub use client::{FeedConfig, FetchClient, FootballDataClient, DEFAULT_BASE_URL};
pub use error::{CadenceError, FetchError};
pub use producer::Producer;
pub use range::DateRange;
pub use slot::{Publish, Publisher, Receiver};
