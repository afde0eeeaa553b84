//! Dockhand: ordered container lifecycle and backup recipes.
//!
//! A recipe stops, starts, and dumps containers one step at a time.
//! Postgres dumps stream straight from a Docker exec into a gzip archive.

pub mod cli;
pub mod core;
pub mod events;
pub mod runtime;
