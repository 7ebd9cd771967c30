//! Producer side of a fetch: answers `dyad.fetch` requests by shipping the
//! requested file over the configured transport.

pub mod fetch;

pub use fetch::FetchService;
