//! End-to-end test suite for Lendscore.
//!
//! The integration tests under `tests/` drive the whole pipeline, from raw
//! ledger entries to committed artifacts and final scores, against a
//! temporary artifact store.

pub mod helpers;
