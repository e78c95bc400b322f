// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use filesource::bounded_channel;
use filesource::init::args::FileSourceArgs;
use filesource::init::wait::{self, TaskSet};
use filesource::sources::file::checkpoint_committer::{CheckpointCommitter, load_checkpoint};
use filesource::sources::file::persistence::JsonFileDatabase;
use filesource::sources::file::{ChannelListener, FileSource, Record};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Ingest files from a directory and write records to stdout
    Start(Box<FileSourceArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "filesource")]
#[command(bin_name = "filesource")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "FILESOURCE_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version());
            ExitCode::SUCCESS
        }
        Some(Commands::Start(args)) => {
            let _logger = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {e}");
                    return ExitCode::FAILURE;
                }
            };

            match run_source(args) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = ?e, "Failed to run file source.");
                    ExitCode::FAILURE
                }
            }
        }
        None => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn run_source(args: Box<FileSourceArgs>) -> Result<(), BoxError> {
    let config = args.build_config()?;
    info!(
        source_id = %config.source_id,
        root = ?config.root,
        mode = %config.mode,
        tailing = config.tailing,
        version = %get_version(),
        "Starting file source."
    );

    let db = JsonFileDatabase::open(&args.checkpoint_path)?;
    let mut persister = db.persister(config.source_id.clone());
    let checkpoint = load_checkpoint(&mut persister)?;

    let (records_tx, records_rx) = bounded_channel::bounded::<Record>(args.output_queue_size);
    let listener = Arc::new(ChannelListener::new(records_tx));
    let mut source = FileSource::new(config, listener)?;

    if let Some(checkpoint) = checkpoint {
        info!(
            offset = checkpoint.offset,
            tailed_file = ?checkpoint.tailed_file,
            "Restoring from checkpoint."
        );
        source.restore(checkpoint)?;
    }

    source.connect()?;

    let mut task_set = TaskSet::new();
    let committer_cancel = CancellationToken::new();
    let mut committer =
        CheckpointCommitter::new(source.checkpoint_store(), persister, args.committer_config());
    {
        let token = committer_cancel.clone();
        task_set.spawn(async move { committer.run(token).await.map_err(|e| e.into()) });
    }
    task_set.spawn(write_records(records_rx));

    let mut result = Ok(());
    select! {
        res = signal_wait() => {
            res?;
            info!("Shutdown signal received.");
        },
        res = wait::wait_for_any_task(&mut task_set) => {
            match res {
                Ok(()) => warn!("Unexpected early exit of task."),
                Err(e) => result = Err(e),
            }
        }
    }

    // Disconnect joins the ingestion threads and drops the listener, which closes
    // the record channel so the writer drains and exits.
    tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
        source.disconnect()?;
        drop(source);
        Ok(())
    })
    .await??;

    committer_cancel.cancel();
    let shutdown = wait::wait_for_tasks_with_timeout(&mut task_set, SHUTDOWN_TIMEOUT).await;

    result.and(shutdown)
}

/// Writes each record payload to stdout followed by a newline.
async fn write_records(
    mut records: bounded_channel::BoundedReceiver<Record>,
) -> Result<(), BoxError> {
    let mut stdout = tokio::io::stdout();
    while let Some(record) = records.next().await {
        stdout.write_all(&record.payload).await?;
        stdout.write_all(b"\n").await?;
        if records.is_empty() {
            stdout.flush().await?;
        }
    }
    stdout.flush().await?;

    Ok(())
}

// Records go to stdout, so logs are written to stderr.
fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(std::io::stderr().is_terminal())
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() -> Result<(), BoxError> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
