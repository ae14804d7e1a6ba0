pub mod compress;
pub mod db;
pub mod directory;
pub mod executor;
pub mod file_ext;
pub mod finish;
pub mod ledger;
pub mod notifications;
pub mod papers;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod service_config;
pub mod settings;
pub mod storage;
pub mod validate;
