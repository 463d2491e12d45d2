//! Attestation manifest builder & ledger gate (C6).

pub mod ledger;
pub mod manifest;
pub mod manifest_store;

pub use ledger::{spawn as spawn_ledger, LedgerError, LedgerWriter};
pub use manifest::{AttemptRecord, ManifestBuilder};
pub use manifest_store::{ManifestStore, ManifestStoreError};
