use clap::Parser;
use paper_backup::backup::db::Database;
use paper_backup::backup::directory::SqliteUserDirectory;
use paper_backup::backup::papers::SqlitePaperStore;
use paper_backup::backup::result_error::error::Error;
use paper_backup::backup::result_error::WithMsg;
use paper_backup::backup::service::BackupService;
use paper_backup::backup::service_config::ServiceConfig;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::error;
use validator::Validate;

/// Backup orchestration and retention service for a paper archive
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, ServiceConfig>(f)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })
        .and_then(|config| {
            config
                .validate()
                .map_err(Error::from)
                .map(|_| config)
                .with_msg(format!("Config validation failed: {:?}", &args.config))
        })
        .and_then(|config| {
            let db = Database::open(&config.database)?;
            let papers = Arc::new(SqlitePaperStore::new(db.clone()));
            let directory = Arc::new(SqliteUserDirectory::new(db.clone()));
            let service = BackupService::new(&config, db, papers, directory)?;
            service.run_loop()
        });

    match res {
        Ok(_) => error!("Loop should never break without error"),
        Err(e) => error!("{e}"),
    }

    exit(1);
}
