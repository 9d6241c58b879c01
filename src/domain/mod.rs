//! Loopback messaging substrate.
//!
//! The subscriber core only talks to the substrate through the entities;
//! this module supplies an in-process implementation of it:
//! - [`Domain`]: endpoint matching, QoS checks and sample routing
//! - [`PeerWriter`]: a remote writer to match against
//! - reader caches with history, resource limits and instance tracking
//! - [`LoanedSamples`]: batches taken from a reader on loan
//!
//! Samples cross the domain as checksummed MessagePack frames. Content
//! filters are applied while routing, before a sample reaches a reader's
//! buffer.

mod bus;
mod loan;
mod reader_cache;
mod wire;

pub use bus::{Domain, PeerWriter};
pub(crate) use bus::DomainHealth;
pub use loan::LoanedSamples;
pub(crate) use reader_cache::{ReaderCache, ReaderEndpoint};
