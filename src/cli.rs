use std::path::PathBuf;
use std::time::Duration;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use esx::core::config::{IndexConfig, ThrottleConfig};
use esx::core::error::Error;
use esx::core::types::WriteMode;
use esx::export::scroll::ScrollOptions;

#[derive(Parser, Debug)]
#[command(name = "esx", version, about = "Bulk loads and exports JSON documents for Elasticsearch")]
pub struct Cli {
    /// Elasticsearch host:port
    #[arg(short = 'H', long, env = "ES_HOST", default_value = "localhost:9200")]
    pub es_host: String,

    /// Elasticsearch index to use
    #[arg(short = 'I', long, env = "ES_INDEX")]
    pub es_index: String,

    /// Elasticsearch doc type to use
    #[arg(short = 'D', long, env = "ES_TYPE", default_value = "_doc")]
    pub es_type: String,

    /// Elasticsearch operation timeout
    #[arg(short = 'T', long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub es_timeout: Duration,

    /// Debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Silences all log output
    #[arg(short, long, conflicts_with = "debug")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrolls an Elasticsearch index to stdout
    Scroll(ScrollArgs),
    /// Indexes JSON documents from stdin into an Elasticsearch index
    Index(IndexArgs),
}

#[derive(Args, Debug)]
pub struct ScrollArgs {
    /// Elasticsearch scroll size
    #[arg(short = 's', long, default_value_t = 100)]
    pub scroll_size: usize,

    /// Elasticsearch scroll timeout
    #[arg(short = 't', long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub scroll_timeout: Duration,

    /// Query JSON file
    #[arg(short = 'f', long, conflicts_with = "query")]
    pub query_file: Option<PathBuf>,

    /// Query string
    #[arg(short = 'Q', long)]
    pub query: Option<String>,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Index action type ("index" or "update")
    #[arg(short = 'a', long, default_value = "index", value_parser = parse_write_mode)]
    pub index_action: WriteMode,

    /// JSON field to use as document ID
    #[arg(short = 'i', long, default_value = "_id")]
    pub doc_id_field: String,

    /// Number of index workers (0 = two per CPU)
    #[arg(short = 'w', long, default_value_t = 0)]
    pub index_workers: usize,

    /// Number of documents to batch index
    #[arg(short = 'b', long, default_value_t = 100)]
    pub batch_size: usize,

    /// Number of times to retry a failed batch
    #[arg(short = 'r', long, default_value_t = 3)]
    pub num_retries: usize,

    /// ADVANCED: Percentage of the timeout at which predicted latency triggers full backoff
    #[arg(short = 'M', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub throttle_high_water_mark: Option<u8>,

    /// ADVANCED: Number of runtime samples to use for estimating index timing
    #[arg(short = 'W', long, default_value_t = 50)]
    pub throttle_window_size: usize,

    /// ADVANCED: Scale factor applied to the computed throttle delay
    #[arg(short = 'F', long, default_value_t = 1.0)]
    pub throttle_backoff_factor: f64,

    /// ADVANCED: How long to wait for the work queue to free up
    #[arg(short = 'u', long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub queue_full_wait_time: Duration,
}

impl IndexArgs {
    pub fn to_config(&self, timeout: Duration) -> IndexConfig {
        let mut throttle = ThrottleConfig::new(timeout, self.throttle_window_size, self.throttle_backoff_factor);
        if let Some(percent) = self.throttle_high_water_mark {
            throttle = throttle.with_high_water_mark(f64::from(percent) / 100.0);
        }
        IndexConfig {
            batch_size: self.batch_size,
            workers: self.index_workers,
            max_retries: self.num_retries,
            request_timeout: timeout,
            queue_full_wait: self.queue_full_wait_time,
            id_field: self.doc_id_field.clone(),
            write_mode: self.index_action,
            throttle,
        }
    }
}

impl ScrollArgs {
    pub fn to_options(&self, timeout: Duration) -> ScrollOptions {
        ScrollOptions {
            size: self.scroll_size,
            keep_alive: self.scroll_timeout,
            count_timeout: timeout,
        }
    }
}

fn parse_write_mode(s: &str) -> Result<WriteMode, Error> {
    s.parse()
}

/// Log to stderr; `RUST_LOG` overrides the level picked by the flags.
pub fn init_logging(debug: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn index_defaults() {
        let cli = Cli::try_parse_from(["esx", "-I", "docs", "index"]).unwrap();
        let Command::Index(args) = cli.command else {
            panic!("expected index command");
        };
        let config = args.to_config(cli.es_timeout);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.throttle.limit, Duration::from_secs(60));
        assert_eq!(config.throttle.window_size, 50);
        assert_eq!(config.throttle.high_water_mark, None);
        assert_eq!(config.write_mode, WriteMode::Index);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn index_overrides() {
        let cli = Cli::try_parse_from([
            "esx", "-I", "docs", "-T", "5s", "index", "-a", "update", "-i", "uid", "-w", "4", "-b", "10",
            "-M", "75", "-W", "8", "-F", "0.5", "-u", "250ms",
        ])
        .unwrap();
        let Command::Index(args) = cli.command else {
            panic!("expected index command");
        };
        let config = args.to_config(cli.es_timeout);
        assert_eq!(config.write_mode, WriteMode::Upsert);
        assert_eq!(config.id_field, "uid");
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity(), 8);
        assert_eq!(config.throttle.high_water_mark, Some(0.75));
        assert_eq!(config.throttle.backoff_factor, 0.5);
        assert_eq!(config.queue_full_wait, Duration::from_millis(250));
    }

    #[test]
    fn connection_flags_read_environment() {
        let command = Cli::command();
        for (id, var) in [("es_host", "ES_HOST"), ("es_index", "ES_INDEX"), ("es_type", "ES_TYPE")] {
            let arg = command.get_arguments().find(|a| a.get_id() == id).unwrap();
            assert_eq!(arg.get_env().and_then(|v| v.to_str()), Some(var), "{}", id);
        }
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(Cli::try_parse_from(["esx", "-I", "docs", "index", "-a", "delete"]).is_err());
        assert!(Cli::try_parse_from(["esx", "-I", "docs", "index", "-M", "150"]).is_err());
        assert!(Cli::try_parse_from(["esx", "-I", "docs", "scroll", "-Q", "{}", "-f", "q.json"]).is_err());
    }
}
