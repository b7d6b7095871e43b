use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use mongo_backup_lib::cli::{Action, Cli};
use mongo_backup_lib::config::{load_env_file, BackupConfig, DEFAULT_ENV_FILE};
use mongo_backup_lib::schedule::Scheduler;

fn main() {
    // before parsing, so the file serves the env fallbacks of the arguments
    let env_file = load_env_file(Path::new(DEFAULT_ENV_FILE));
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    match env_file {
        Ok(true) => log::debug!(target: "config", "Loaded environment from {DEFAULT_ENV_FILE}"),
        Ok(false) => {}
        Err(e) => log::debug!(target: "config", "Loading {DEFAULT_ENV_FILE} failed: {e}"),
    }

    let mut config = match BackupConfig::load_or_create(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Reading the config file failed: {e}");
            return;
        }
    };
    config.apply(cli.overrides());

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let schedule = match config.cron() {
        Ok(schedule) => schedule,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };

    let job = match config.backup_job(&cli.credentials(), dry_run) {
        Ok(job) => job,
        Err(e) => {
            log::error!("Setting up the backup failed: {e}");
            return;
        }
    };

    match cli.action.unwrap_or_default() {
        Action::Once => {
            job.run();
        }
        Action::Schedule => {
            let job = Arc::new(job);
            Scheduler::new(schedule).run(move || {
                job.run();
            })
        }
    }
}
