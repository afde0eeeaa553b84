//! Core recipe logic: types, loading, dispatch, and the step handlers.

pub mod archive;
pub mod backup;
pub mod container;
pub mod error;
pub mod executor;
pub mod parser;
pub mod types;
