//! The backup routine run on every tick: dump, then optionally package and
//! upload, then thin out old dumps.
//!
//! Failures are logged where they happen and end the run. They never reach
//! the caller as an error.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::backends::{object_key, Upload};
use crate::mongodb::{DumpError, DumpOutcome, MongoConnection, MongoDump};
use crate::util::archive::zip_artifact;
use crate::util::retention::{self, RetentionConfig};

/// Shipping of the packaged dump.
#[derive(Debug, Clone)]
pub struct UploadStep<U> {
    pub uploader: U,
    /// Key prefix inside the bucket.
    pub prefix: String,
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Dump written, nothing to upload.
    Dumped { path: PathBuf },
    /// Dump written, packaged and uploaded.
    Uploaded { path: PathBuf, key: String },
    DumpFailed,
    PackagingFailed { path: PathBuf },
    UploadFailed { path: PathBuf, key: String },
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Dumped { .. } | Self::Uploaded { .. })
    }
}

/// A configured backup, ready to be run on every tick.
#[derive(Debug)]
pub struct BackupJob<U> {
    pub connection: MongoConnection,
    pub dump: MongoDump,
    pub upload: Option<UploadStep<U>>,
    pub retention: Option<RetentionConfig>,
    pub dry_run: bool,
}

impl<U: Upload> BackupJob<U> {
    pub fn new(connection: MongoConnection, dump: MongoDump) -> Self {
        Self {
            connection,
            dump,
            upload: None,
            retention: None,
            dry_run: false,
        }
    }

    pub fn with_upload(mut self, uploader: U, prefix: impl Into<String>) -> Self {
        self.upload = Some(UploadStep {
            uploader,
            prefix: prefix.into(),
        });
        self
    }

    pub fn with_retention(mut self, retention: Option<RetentionConfig>) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Backup named after today's local date.
    pub fn run(&self) -> RunReport {
        self.run_at(Local::now().date_naive())
    }

    /// Backup named after `date`.
    pub fn run_at(&self, date: NaiveDate) -> RunReport {
        let artifact = match self.dump.dump(&self.connection, date, self.dry_run) {
            Ok(artifact) => artifact,
            Err(DumpError::Failed(DumpOutcome::Exited(code))) => {
                log::error!(target: "job", "mongodump exited with code {code}");
                return RunReport::DumpFailed;
            }
            Err(DumpError::Failed(DumpOutcome::Signaled(signal))) => {
                log::error!(target: "job", "mongodump was killed by signal {signal}");
                return RunReport::DumpFailed;
            }
            Err(e) => {
                log::error!(target: "job", "Backup of '{}' failed: {e}", self.connection.database);
                return RunReport::DumpFailed;
            }
        };
        log::info!(target: "job", "Backup {} is successful", artifact.name);

        let report = self.ship(&artifact.path, &artifact.name);

        if let Some(config) = self.retention {
            let pruned = retention::prune(
                &self.dump.backup_root,
                self.dump.mode,
                config,
                &artifact.path,
                self.dry_run,
            );
            if let Err(e) = pruned {
                log::warn!(target: "job", "Removing old dumps failed: {e}");
            }
        }

        report
    }

    /// Packages and uploads the dump at `path`, if an upload is configured.
    fn ship(&self, path: &Path, name: &str) -> RunReport {
        let path = path.to_path_buf();
        let Some(step) = &self.upload else {
            return RunReport::Dumped { path };
        };

        let key = object_key(&step.prefix, name);
        if self.dry_run {
            log::info!(target: "job", "Skipping upload to {key} on dry-run");
            return RunReport::Dumped { path };
        }

        let body = match zip_artifact(&path) {
            Ok(body) => body,
            Err(e) => {
                log::error!(target: "job", "Packaging {} failed, skipping upload: {e}", path.display());
                return RunReport::PackagingFailed { path };
            }
        };

        match step.uploader.upload(&key, body) {
            Ok(()) => {
                log::info!(target: "job", "Uploaded backup to {key}");
                RunReport::Uploaded { path, key }
            }
            Err(e) => {
                log::error!(target: "job", "Upload to {key} failed: {e}");
                RunReport::UploadFailed { path, key }
            }
        }
    }
}
