mod app;
mod cli;
mod commands;
mod error;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use billsync_config::Config;
use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let app = App::open(config).await?;
    let result = match &cli.command {
        Command::Upload { file, name } => commands::upload(&app, file, name.as_deref()).await,
        Command::Fetch { name, output } => commands::fetch(&app, name, output.as_deref()).await,
        Command::List => commands::list(&app).await,
        Command::Status => commands::status(&app).await,
        Command::Sync => commands::sync(&app).await,
        Command::Reconcile => commands::reconcile(&app).await,
        Command::Run => commands::run(&app).await,
    };
    app.close().await;
    result
}
