//! Configuration file of the backup and its merge with the environment.
//!
//! Secrets are never part of the file. They are handed in as [Credentials].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::backends::s3::{
    DEFAULT_REGION, DEFAULT_SERVER_SIDE_ENCRYPTION, DEFAULT_STORAGE_CLASS,
};
use crate::backends::{S3Error, S3Target, S3Uploader};
use crate::job::BackupJob;
use crate::mongodb::{DumpMode, MongoConnection, MongoDump, DEFAULT_SCHEME};
use crate::schedule::{CronParseError, CronSchedule};
use crate::util::retention::RetentionConfig;

pub const DEFAULT_CONFIG_PATH: &str = "mongo-backup.toml";
pub const DEFAULT_SCHEDULE: &str = "0 0 * * *";
pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Display, Error, From)]
/// Errors on loading the configuration.
pub enum ConfigError {
    /// The config file can't be read.
    #[display("Reading {} failed: {source}", path.display())]
    #[from(ignore)]
    Read { path: PathBuf, source: io::Error },
    /// The config file isn't valid.
    #[display("Invalid config file: {_0}")]
    Parse(toml::de::Error),
    /// The schedule isn't a valid cron expression.
    #[display("Invalid schedule: {_0}")]
    Schedule(CronParseError),
    /// A required value is neither configured nor set in the environment.
    #[display("Missing {_0}")]
    #[from(ignore)]
    Missing(#[error(ignore)] &'static str),
    /// The S3 client can't be set up.
    #[display("Setting up S3 upload failed: {_0}")]
    S3(S3Error),
}

/// Content of the config file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Cron expression (5 fields, or 6 with leading seconds).
    pub schedule: String,

    pub connection: ConnectionConfig,

    pub dump: DumpConfig,

    /// Upload to S3. Local only if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadConfig>,

    /// Thinning out of local dumps. Dumps are kept forever if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionConfig>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_string(),
            connection: ConnectionConfig::default(),
            dump: DumpConfig::default(),
            upload: None,
            retention: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `mongodb+srv` for DNS seed lists, `mongodb` for plain hosts.
    pub scheme: String,
    /// Host (with optional port) of the cluster.
    pub host: String,
    /// Database to dump. Every database if empty.
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: String::new(),
            database: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// The `mongodump` executable.
    pub binary: PathBuf,
    pub mode: DumpMode,
    /// Folder the dumps are written to.
    pub backup_root: PathBuf,
    pub force_table_scan: bool,
    /// Additional arguments for `mongodump`.
    pub extra_args: Vec<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mongodump"),
            mode: DumpMode::default(),
            backup_root: PathBuf::from("backups"),
            force_table_scan: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub bucket: String,
    /// Objects are stored as `<prefix>/<date>.zip`.
    pub prefix: String,
    pub storage_class: String,
    pub server_side_encryption: String,
    pub region: String,
    /// Custom S3 compatible endpoint, e.g. `http://localhost:9000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            server_side_encryption: DEFAULT_SERVER_SIDE_ENCRYPTION.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
        }
    }
}

/// Values taken from the command line or environment, preferred over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub schedule: Option<String>,
    pub host: Option<String>,
    pub database: Option<String>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub storage_class: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Secrets never stored in the config file.
#[derive(Clone, Default)]
pub struct Credentials {
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl BackupConfig {
    /// Reads the config at `path`.
    ///
    /// If there is no file yet, the default config is written to `path`
    /// and returned.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(config_str) => Ok(toml::from_str(&config_str)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    target: "config",
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(config_str) => {
                        if let Err(e) = fs::write(path, config_str) {
                            log::warn!(target: "config", "Writing default config to {} failed: {e}", path.display());
                        }
                    }
                    Err(e) => log::warn!(target: "config", "Serializing default config failed: {e}"),
                }

                Ok(default_config)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Applies the values of `overrides` that are set.
    ///
    /// A bucket enables the upload even if the file has no `[upload]` section.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            schedule,
            host,
            database,
            bucket,
            prefix,
            storage_class,
            region,
            endpoint,
        } = overrides;

        if let Some(schedule) = schedule {
            self.schedule = schedule;
        }
        if let Some(host) = host {
            self.connection.host = host;
        }
        if let Some(database) = database {
            self.connection.database = database;
        }

        if let Some(bucket) = bucket {
            self.upload.get_or_insert_with(UploadConfig::default).bucket = bucket;
        }
        if let Some(upload) = &mut self.upload {
            if let Some(prefix) = prefix {
                upload.prefix = prefix;
            }
            if let Some(storage_class) = storage_class {
                upload.storage_class = storage_class;
            }
            if let Some(region) = region {
                upload.region = region;
            }
            if endpoint.is_some() {
                upload.endpoint = endpoint;
            }
        }
    }

    pub fn cron(&self) -> Result<CronSchedule, ConfigError> {
        Ok(CronSchedule::parse(&self.schedule)?)
    }

    pub fn mongo_connection(&self, credentials: &Credentials) -> Result<MongoConnection, ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Missing("database host (MONGO_DB_HOST)"));
        }

        Ok(MongoConnection {
            scheme: self.connection.scheme.clone(),
            user: credentials.db_user.clone().unwrap_or_default(),
            password: credentials.db_password.clone().unwrap_or_default(),
            host: self.connection.host.clone(),
            database: self.connection.database.clone(),
        })
    }

    pub fn mongo_dump(&self) -> MongoDump {
        let DumpConfig {
            binary,
            mode,
            backup_root,
            force_table_scan,
            extra_args,
        } = self.dump.clone();

        let mut dump = MongoDump::new(binary, mode, backup_root);
        dump.force_table_scan = force_table_scan;
        dump.extra_args = extra_args;
        dump
    }

    /// S3 destination, if an upload is configured.
    pub fn s3_target(&self) -> Result<Option<S3Target>, ConfigError> {
        let Some(upload) = &self.upload else {
            return Ok(None);
        };
        if upload.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("bucket name (S3_BUCKET_NAME)"));
        }

        Ok(Some(S3Target {
            bucket: upload.bucket.clone(),
            region: upload.region.clone(),
            endpoint: upload.endpoint.clone(),
            storage_class: upload.storage_class.clone(),
            server_side_encryption: upload.server_side_encryption.clone(),
        }))
    }

    /// Assembles the backup routine described by this config.
    pub fn backup_job(
        &self,
        credentials: &Credentials,
        dry_run: bool,
    ) -> Result<BackupJob<S3Uploader>, ConfigError> {
        let job = BackupJob::new(self.mongo_connection(credentials)?, self.mongo_dump())
            .with_retention(self.retention)
            .with_dry_run(dry_run);

        let Some(target) = self.s3_target()? else {
            log::info!(target: "config", "No bucket configured, keeping dumps local only");
            return Ok(job);
        };

        let access_key_id = credentials
            .access_key_id
            .clone()
            .ok_or(ConfigError::Missing("access key (AWS_ACCESS_KEY_ID)"))?;
        let secret_access_key = credentials
            .secret_access_key
            .clone()
            .ok_or(ConfigError::Missing("secret key (AWS_SECRET_ACCESS_KEY)"))?;
        let prefix = self
            .upload
            .as_ref()
            .map(|upload| upload.prefix.clone())
            .unwrap_or_default();

        let uploader = S3Uploader::new(target, access_key_id, secret_access_key)?;
        Ok(job.with_upload(uploader, prefix))
    }
}

/// Loads the variables of the dotenv file at `path` into the process
/// environment, so they serve as fallbacks for the command line.
///
/// Variables already set in the environment win. Returns if a file was found.
pub fn load_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
