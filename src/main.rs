use std::{io::Write, process, sync::Arc};

use opsdesk::{
    application::{
        context::AppContext, customers::InMemoryCustomerRepo, error::AppError, simulate,
    },
    config::{self, SimulateArgs},
    infra::{error::InfraError, telemetry},
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or_default();

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Simulate(args) => run_simulate(&settings, &args).await,
        config::Command::ShowConfig => print_json(&settings),
    }
}

async fn run_simulate(settings: &config::Settings, args: &SimulateArgs) -> Result<(), AppError> {
    let repo = Arc::new(InMemoryCustomerRepo::with_generated(args.customers));
    let ctx = AppContext::new(settings, repo.clone())?;

    let report = simulate::run(&ctx, args).await?;
    info!(repository_reads = repo.read_count(), "workload complete");
    ctx.shutdown();

    print_json(&report)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render JSON: {err}")))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").map_err(InfraError::from)?;
    Ok(())
}
