use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delete::DeleteOptions;
use crate::retry::RetryPolicy;
use crate::scan::orchestrator::DEFAULT_SPLIT_ALPHABET;
use crate::scan::ScanOptions;
use crate::store::{S3Provider, MAX_DELETE_BATCH};

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(name = "trench", author, version, about = "Disk usage analyzer for S3-compatible buckets")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Only scan keys under this prefix
    #[arg(long, global = true, default_value = "")]
    pub prefix: String,

    /// Config file (default: <config_dir>/trench/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file for the interactive browser (default: <cache_dir>/trench/trench.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Listing workers (overrides scan.concurrency)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Delete batches in flight (overrides delete.concurrency)
    #[arg(long, global = true)]
    pub delete_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(long, global = true, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, global = true, env = "S3_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Endpoint URL for S3-compatible stores (implies --provider custom)
    #[arg(long, global = true, env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// aws, digitalocean, hetzner, minio, r2, wasabi or custom
    #[arg(long, global = true, default_value = "aws")]
    pub provider: String,

    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Browse the bucket interactively (default)
    Browse,
    /// Scan once and print the largest entries
    Report {
        /// Number of entries to print
        #[arg(long, default_value_t = 20)]
        top: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub split_threshold: usize,
    pub split_alphabet: String,
    pub page_size: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            split_threshold: 2,
            split_alphabet: DEFAULT_SPLIT_ALPHABET.to_string(),
            page_size: 1000,
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
        }
    }
}

impl ScanConfig {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency.max(1),
            split_threshold: self.split_threshold,
            split_alphabet: self.split_alphabet.clone(),
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: MAX_DELETE_BATCH,
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
        }
    }
}

impl DeleteConfig {
    pub fn options(&self) -> DeleteOptions {
        DeleteOptions {
            concurrency: self.concurrency.max(1),
            batch_size: self.batch_size.clamp(1, MAX_DELETE_BATCH),
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            ),
        }
    }
}

/// Optional TOML file with scan and delete tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scan: ScanConfig,
    pub delete: DeleteConfig,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trench").join("config.toml"))
    }

    /// Load `path`, or the default location if it exists. An explicitly
    /// given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Everything the binary needs, merged from flags, environment and file.
#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: String,
    pub region: String,
    pub provider: S3Provider,
    pub credentials: Option<(String, String)>,
    pub prefix: String,
    pub log_file: Option<PathBuf>,
    pub page_size: usize,
    pub scan: ScanOptions,
    pub delete: DeleteOptions,
    pub command: Command,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let file = FileConfig::load(cli.config.as_deref())?;
        Self::merge(cli, file)
    }

    pub fn merge(cli: Cli, mut file: FileConfig) -> Result<Self> {
        let conn = cli.connection;
        let Some(bucket) = conn.bucket.filter(|b| !b.is_empty()) else {
            bail!("no bucket given (use --bucket or S3_BUCKET)");
        };

        let provider_name = match (&conn.endpoint, conn.provider.as_str()) {
            (Some(_), "aws") => "custom",
            (_, name) => name,
        };
        let provider = S3Provider::parse(provider_name, conn.endpoint.as_deref())
            .with_context(|| format!("unknown provider {:?} or missing --endpoint", conn.provider))?;

        let credentials = match (conn.access_key, conn.secret_key) {
            (Some(access), Some(secret)) => Some((access, secret)),
            (None, None) => None,
            _ => bail!("--access-key and --secret-key must be given together"),
        };

        if let Some(concurrency) = cli.concurrency {
            file.scan.concurrency = concurrency;
        }
        if let Some(concurrency) = cli.delete_concurrency {
            file.delete.concurrency = concurrency;
        }

        Ok(Self {
            bucket,
            region: conn.region,
            provider,
            credentials,
            prefix: cli.prefix,
            log_file: cli.log_file,
            page_size: file.scan.page_size.max(1),
            scan: file.scan.options(),
            delete: file.delete.options(),
            command: cli.command.unwrap_or(Command::Browse),
        })
    }
}
