//! Invocation of the external `mongodump` tool.

use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use chrono::{Datelike, NaiveDate};
use derive_more::{Display, Error};

use super::{mask_uri, MongoConnection};

/// Layout of the dump written by `mongodump`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpMode {
    /// A single gzip compressed archive file (`--archive --gzip`).
    #[default]
    Archive,
    /// A directory with one BSON file per collection (`--out`).
    Directory,
}

/// How the `mongodump` process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DumpOutcome {
    #[display("success")]
    Success,
    #[display("exit code {_0}")]
    Exited(i32),
    #[display("signal {_0}")]
    Signaled(i32),
}

impl From<ExitStatus> for DumpOutcome {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }

        Self::Exited(-1)
    }
}

#[derive(Debug, Display, Error)]
/// Errors on dumping the database.
pub enum DumpError {
    /// The backup root folder can't be created.
    #[display("Unable to create backup root {}: {source}", path.display())]
    BackupRoot { path: PathBuf, source: io::Error },
    /// The dump tool couldn't be started.
    #[display("Starting {} failed: {source}", binary.display())]
    Spawn { binary: PathBuf, source: io::Error },
    /// Waiting for the dump tool failed.
    #[display("Waiting for the dump process failed: {_0}")]
    Wait(io::Error),
    /// The dump tool didn't finish successfully.
    #[display("Dump process ended with {_0}")]
    Failed(#[error(ignore)] DumpOutcome),
}

/// Result of a successful dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpArtifact {
    /// File (archive mode) or folder (directory mode) holding the dump.
    pub path: PathBuf,
    pub mode: DumpMode,
    /// `<day>-<month>-<year>` name the artifact is stored under.
    pub name: String,
}

/// Runs `mongodump` against a [MongoConnection].
#[derive(Debug, Clone)]
pub struct MongoDump {
    pub binary: PathBuf,
    pub mode: DumpMode,
    pub force_table_scan: bool,
    pub backup_root: PathBuf,
    /// Passed to `mongodump` after the generated arguments.
    pub extra_args: Vec<String>,
}

/// Name of the artifact created on `date`, e.g. `6-3-2024`.
pub fn artifact_name(date: NaiveDate) -> String {
    format!("{}-{}-{}", date.day(), date.month(), date.year())
}

impl MongoDump {
    pub fn new(binary: impl Into<PathBuf>, mode: DumpMode, backup_root: impl Into<PathBuf>) -> Self {
        let backup_root = backup_root.into();
        if backup_root.is_relative() {
            log::warn!(target: "mongodump", "backup_root is relative: {}", backup_root.display());
        }

        Self {
            binary: binary.into(),
            mode,
            force_table_scan: true,
            backup_root,
            extra_args: Vec::new(),
        }
    }

    /// Location of the dump created on `date`.
    pub fn artifact_path(&self, date: NaiveDate) -> PathBuf {
        let name = artifact_name(date);
        match self.mode {
            DumpMode::Archive => self.backup_root.join(format!("{name}.gz")),
            DumpMode::Directory => self.backup_root.join(name),
        }
    }

    /// Argument list for dumping `uri` into `artifact`.
    pub fn args(&self, uri: &str, artifact: &Path) -> Vec<OsString> {
        let mut args = Vec::new();
        if self.force_table_scan {
            args.push(OsString::from("--forceTableScan"));
        }
        args.push(format!("--uri={uri}").into());

        match self.mode {
            DumpMode::Archive => {
                let mut archive = OsString::from("--archive=");
                archive.push(artifact);
                args.push(archive);
                args.push("--gzip".into());
            }
            DumpMode::Directory => {
                let mut out = OsString::from("--out=");
                out.push(artifact);
                args.push(out);
            }
        }

        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Dumps the database behind `conn` into the artifact for `date`.
    ///
    /// # Dry Run
    ///
    /// On a dry run the command line is only logged.
    pub fn dump(
        &self,
        conn: &MongoConnection,
        date: NaiveDate,
        dry_run: bool,
    ) -> Result<DumpArtifact, DumpError> {
        let artifact = DumpArtifact {
            path: self.artifact_path(date),
            mode: self.mode,
            name: artifact_name(date),
        };
        log::info!(target: "mongodump", "Create dump of database '{}'", conn.database);
        log::debug!(target: "mongodump", "Save dump at: {}", artifact.path.display());

        let args = self.args(&conn.uri(), &artifact.path);
        let command_line = std::iter::once(self.binary.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        log::trace!(target: "mongodump", "Running: {}", mask_uri(&command_line));

        if dry_run {
            log::info!(target: "mongodump", "Skipping dump on dry-run");
            return Ok(artifact);
        }

        fs::create_dir_all(&self.backup_root).map_err(|source| DumpError::BackupRoot {
            path: self.backup_root.clone(),
            source,
        })?;

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DumpError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        log::trace!(target: "mongodump", "Started mongodump process {}", child.id());

        let relays = [
            child.stdout.take().map(|out| relay("mongodump::stdout", out)),
            child.stderr.take().map(|err| relay("mongodump::stderr", err)),
        ];

        let status = child.wait().map_err(DumpError::Wait)?;
        for relay in relays.into_iter().flatten() {
            if relay.join().is_err() {
                log::warn!(target: "mongodump", "Output relay of mongodump panicked");
            }
        }

        match DumpOutcome::from(status) {
            DumpOutcome::Success => {
                log::info!(target: "mongodump", "Finished dump: {}", artifact.path.display());
                Ok(artifact)
            }
            outcome => Err(DumpError::Failed(outcome)),
        }
    }
}

/// Forwards every line of `stream` to the log.
fn relay<R: Read + Send + 'static>(target: &'static str, stream: R) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.split(b'\n') {
            match line {
                Ok(line) => {
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        log::info!(target: target, "{}", mask_uri(line));
                    }
                }
                Err(e) => {
                    log::warn!(target: target, "Reading output failed: {e}");
                    break;
                }
            }
        }
    })
}
