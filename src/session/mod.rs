//! Per-conversation state for the offer/publish flow.
//!
//! Each conversation has at most one pending offer (the item shown to the
//! operator, waiting to be published) and a busy flag that keeps two long
//! publish jobs from running in the same conversation at once.
//!
//! # Architecture
//!
//! * [`data`]: the pending offer and its token.
//! * [`registry`]: the shared, thread-safe registry of conversation state.

pub mod data;
pub mod registry;

pub use data::{offer_token, PendingOffer};
pub use registry::{BusyGuard, ConversationId, OfferError, SessionRegistry};
