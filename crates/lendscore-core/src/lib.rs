//! # lendscore-core
//! Foundation types, errors and traits for the Lendscore scoring pipeline.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
