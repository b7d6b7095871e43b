use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::config::{ConfigOverrides, Credentials, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Config file. A default one is written if it doesn't exist.
    #[arg(long, short = 'c', env = "MONGO_BACKUP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Simulative backup run.
    #[arg(long)]
    pub dry_run: bool,

    /// Cron expression replacing the configured schedule.
    #[arg(long, env = "BACKUP_SCHEDULE")]
    pub schedule: Option<String>,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub s3: S3Args,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Args)]
pub struct MongoArgs {
    /// User to authenticate as.
    #[arg(long = "db-user", env = "MONGO_DB_USER")]
    pub user: Option<String>,

    /// Password of the database user.
    #[arg(long = "db-password", env = "MONGO_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Host of the database cluster.
    #[arg(long = "db-host", env = "MONGO_DB_HOST")]
    pub host: Option<String>,

    /// Database to dump.
    #[arg(long = "db-name", env = "MONGO_DB_DATABASE")]
    pub database: Option<String>,
}

#[derive(Args)]
pub struct S3Args {
    /// Bucket to upload the zipped dumps to. Enables the upload.
    #[arg(long = "s3-bucket", env = "S3_BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Prefix of the object keys.
    #[arg(long = "s3-prefix", env = "S3_KEY_PREFIX")]
    pub prefix: Option<String>,

    /// Storage class of uploaded dumps, e.g. STANDARD_IA.
    #[arg(long = "s3-storage-class", env = "S3_STORAGE_CLASS")]
    pub storage_class: Option<String>,

    #[arg(long = "s3-region", env = "AWS_REGION")]
    pub region: Option<String>,

    /// S3 compatible endpoint, uses path-style requests.
    #[arg(long = "s3-endpoint", env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long = "s3-access-key", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long = "s3-secret-key", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run backups on the configured schedule. (Default)
    #[default]
    Schedule,
    /// Run a single backup now and exit.
    Once,
}

impl Cli {
    /// Values overriding the config file.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            schedule: self.schedule.clone(),
            host: self.mongo.host.clone(),
            database: self.mongo.database.clone(),
            bucket: self.s3.bucket.clone(),
            prefix: self.s3.prefix.clone(),
            storage_class: self.s3.storage_class.clone(),
            region: self.s3.region.clone(),
            endpoint: self.s3.endpoint.clone(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            db_user: self.mongo.user.clone(),
            db_password: self.mongo.password.clone(),
            access_key_id: self.s3.access_key_id.clone(),
            secret_access_key: self.s3.secret_access_key.clone(),
        }
    }
}
