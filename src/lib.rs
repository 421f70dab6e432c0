//! feed-publisher - static site publishing to content-addressed storage
//!
//! A run fetches the newest build artifact from CI, uploads it as a
//! collection, waits until the network reports it replicated, and then
//! appends a signed entry to a sequence feed so a stable address resolves
//! to the new content.
//!
//! ## Components
//!
//! - **Selector**: picks the first usable prepaid storage allocation
//! - **Gateway**: storage node client (HTTP) and an in-memory network
//! - **Monitor**: stall-based replication polling
//! - **Pointer**: feed entry signing and publication
//! - **Orchestrator**: sequences one publish run

pub mod artifact;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keystore;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod pointer;
pub mod selector;
pub mod types;

pub use config::{Args, Cli};
pub use error::{PublishError, Result};
pub use orchestrator::{Orchestrator, PublishReport, PublishSettings};
