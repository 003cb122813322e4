//! Typed wrappers around device RPC methods.

pub mod coaxial;
pub mod global;
pub mod media_file_find;
