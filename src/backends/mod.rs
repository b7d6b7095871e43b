//! Destinations packaged dumps can be shipped to.
//!
//! Currently the following backends are implemented:
//!
//! - [S3Uploader]: `PUT` into an S3 (compatible) bucket, signed with SigV4.

pub mod s3;

pub use s3::{S3Error, S3Target, S3Uploader};

/// Generic upload backend.
pub trait Upload {
    /// Error that may happen on upload.
    type Error: std::error::Error;

    /// Stores `body` under `key`.
    fn upload(&self, key: &str, body: Vec<u8>) -> Result<(), Self::Error>;
}

/// Object key of the archive named `name`: `<prefix>/<name>.zip`.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{name}.zip")
    } else {
        format!("{prefix}/{name}.zip")
    }
}
