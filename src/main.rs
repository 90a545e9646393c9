use std::process::ExitCode;
use std::sync::Arc;
use clap::Parser;
use tokio::io::BufWriter;
use tracing::{error, info, warn};
use esx::core::error::Result;
use esx::export::scroll;
use esx::pipeline::Supervisor;
use esx::sink::ElasticClient;
use esx::source::JsonStreamSource;

mod cli;

use cli::{Cli, Command, IndexArgs, ScrollArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_logging(cli.debug, cli.quiet);

    let (name, result) = match &cli.command {
        Command::Index(args) => ("index", run_index(&cli, args).await),
        Command::Scroll(args) => ("scroll", run_scroll(&cli, args).await),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if cli.quiet {
                eprintln!("{} failed: {}", name, err);
            } else {
                error!("{} failed: {}", name, err);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_index(cli: &Cli, args: &IndexArgs) -> Result<()> {
    let config = args.to_config(cli.es_timeout);
    let client = ElasticClient::new(&cli.es_host, &cli.es_index, Some(&cli.es_type))?;
    let supervisor = Supervisor::new(config, Arc::new(client))?;

    let cancel = supervisor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; shutting down");
            cancel.cancel();
        }
    });

    let stats = supervisor.run(JsonStreamSource::stdin()).await?;
    info!(
        "Done: {} document(s), {} batch(es)",
        stats.documents_written, stats.batches_written
    );
    Ok(())
}

async fn run_scroll(cli: &Cli, args: &ScrollArgs) -> Result<()> {
    let client = ElasticClient::new(&cli.es_host, &cli.es_index, Some(&cli.es_type))?;
    let query = scroll::resolve_query(args.query.as_deref(), args.query_file.as_deref()).await?;
    let mut out = BufWriter::new(tokio::io::stdout());
    scroll::export(&client, &query, &args.to_options(cli.es_timeout), &mut out).await?;
    Ok(())
}
