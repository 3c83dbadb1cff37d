#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod data_processor;
pub mod error;
pub mod prompt;
pub mod splitter;
pub mod traits;
pub mod types;

pub use error::{Error, Result};

/// Table holding index descriptors and active-generation pointers.
pub const META_TABLE: &str = "meta";
