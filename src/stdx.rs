//! Extensions to the standard library or other needed libraries.

pub mod fs;
pub mod http;
