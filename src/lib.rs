//! Gantry library
//!
//! Makes IPFS content-addressed storage usable as an image transport: images
//! are pushed from a local store into IPFS and pulled back by root content
//! identifier or by IPNS name.

pub mod blob;
pub mod cas;
pub mod cli;
pub mod config;
pub mod context;
pub mod copy;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod manifest;
pub mod store;
pub mod transport;

pub use error::{GantryError, Result};
pub use logging::Logger;
