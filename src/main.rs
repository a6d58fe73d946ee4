use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gazelink::calibration::DeviceCalibrationOutcome;
use gazelink::telemetry::LogSink;
use gazelink::{AckOutcome, Session, SessionOutcome, TerminalHost};

mod cli;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let default_level = if args.conn.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    LocalSet::new().block_on(&runtime, run(args))
}

async fn run(args: cli::Cli) -> Result<()> {
    let config = args.conn.to_config();
    let session = Session::new(config, TerminalHost::new());
    session
        .connect()
        .await
        .with_context(|| format!("connecting to {}:{}", args.conn.host, args.conn.port))?;

    match args.cmd {
        cli::Cmd::Stream => stream(&session).await,
        cli::Cmd::Calibrate => {
            let outcome = session.calibrate_device().await;
            session.connection().close();
            if outcome == DeviceCalibrationOutcome::NotConnected {
                bail!("connection lost during calibration");
            }
            info!("calibration sent");
            Ok(())
        }
        cli::Cmd::Session => {
            let outcome = session.begin_calibration().await;
            session.stop().await;
            match outcome {
                SessionOutcome::Completed | SessionOutcome::Cancelled => Ok(()),
                other => bail!("calibration did not run: {:?}", other),
            }
        }
    }
}

async fn stream(session: &Session<TerminalHost>) -> Result<()> {
    let closed = Rc::new(Notify::new());
    let on_close = closed.clone();
    session.connection().on_close(move || on_close.notify_one());
    session.attach_telemetry(LogSink);

    for (id, outcome) in session.start_streaming().await {
        if outcome != AckOutcome::Acknowledged {
            warn!("{} -> {:?}", id, outcome);
        }
    }

    tokio::select! {
        r = tokio::signal::ctrl_c() => r.context("waiting for Ctrl-C")?,
        _ = closed.notified() => bail!("tracker closed the connection"),
    }
    session.stop().await;
    Ok(())
}
