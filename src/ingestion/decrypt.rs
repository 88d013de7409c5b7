//! In-memory decryption of password-protected Office documents.
//!
//! The decrypted bytes never touch the disk; readers consume them from memory.

use std::path::Path;

use crate::error::{IngestionError, IngestionResult};

/// Decrypt `path` with `password` and return the plain document bytes.
#[cfg(feature = "encrypted")]
pub fn decrypt_to_bytes(path: &Path, password: &str) -> IngestionResult<Vec<u8>> {
    office_crypto::decrypt_from_file(path, password).map_err(|e| IngestionError::Decryption {
        path: path.to_path_buf(),
        message: format!("{e:?}"),
    })
}

/// Without the `encrypted` feature every protected file fails to open.
#[cfg(not(feature = "encrypted"))]
pub fn decrypt_to_bytes(path: &Path, _password: &str) -> IngestionResult<Vec<u8>> {
    Err(IngestionError::Decryption {
        path: path.to_path_buf(),
        message: "decryption not enabled (enable cargo feature 'encrypted')".to_string(),
    })
}
