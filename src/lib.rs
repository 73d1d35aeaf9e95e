//! uniqpost - content fingerprinting and image uniqueness for feed reposting
//!
//! Decides whether a feed item has already been offered or posted, using
//! durable dedup keys derived from its id, canonical link and content, and
//! makes reposted images perceptually distinct from their source through
//! randomized structural edits checked against aHash, dHash and pHash.

pub mod app;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod session;
pub mod store;

pub use app::run_app;
