//! Request handlers for the record collections.

mod resources;

pub use resources::*;
