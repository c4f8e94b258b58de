//! # smit-notify
//!
//! Trigger program run by the Smit server for every new entry. The event is
//! read on stdin; the outcome is reported through the exit status.

mod cli;
mod fixture;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::Layer;

use smit_core::config::{AppConfig, EmailDeliveryMethod};
use smit_core::{NotifyError, NotifyResult};
use smit_notifications::{
    ConfiguredEmailSender, DispatchOutcome, EmailRenderer, EventRecord, GpgEncryptor,
    NotificationDispatcher, RecipientDirectory,
};

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("{:#}", e);
        return ExitCode::from(2);
    }

    match run(&cli).await {
        Ok(DispatchOutcome::Sent { .. }) | Ok(DispatchOutcome::Skipped(_)) => ExitCode::SUCCESS,
        Ok(DispatchOutcome::Failed(e)) => ExitCode::from(exit_status(&e)),
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Trigger failed");
            ExitCode::from(exit_status(&e))
        }
    }
}

fn exit_status(err: &NotifyError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}

async fn read_event(cli: &Cli) -> NotifyResult<EventRecord> {
    let raw = if cli.test {
        info!("Using built-in test event");
        fixture::TEST_EVENT.to_string()
    } else {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        raw
    };

    EventRecord::parse(&raw).map_err(|e| {
        tracing::debug!(raw = %raw, "Rejected event payload");
        NotifyError::from(e)
    })
}

async fn run(cli: &Cli) -> NotifyResult<DispatchOutcome> {
    let event = read_event(cli).await?;
    tracing::debug!(project = %event.project, issue = %event.issue, "Event received");

    let mut config = AppConfig::from_env()?;
    if cli.dry_run {
        config.email.delivery_method = EmailDeliveryMethod::Console;
    }

    let directory = match cli.directory.as_ref().or(config.directory.as_ref()) {
        Some(path) => RecipientDirectory::load(path)?,
        None => RecipientDirectory::new(),
    };

    // delivery settings are checked when there is a message to submit
    let sender = ConfiguredEmailSender::new(config.email.clone());
    let from = sender.from_address();

    let dispatcher = NotificationDispatcher::new(
        Arc::new(sender),
        Arc::new(GpgEncryptor::new(&config.gpg)),
        EmailRenderer::new(config.web.root_url.clone()),
        from,
    )
    .with_retry(config.email.max_attempts, Duration::from_secs(1));

    Ok(dispatcher.dispatch(&event, &cli.policy(), &directory).await)
}

/// Initialize logging based on CLI options. Logs go to stderr so that
/// `--dry-run` output stays clean on stdout.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else {
        let default_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let fmt_layer = match cli.log_format {
        cli::LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        cli::LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
        cli::LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
