//! advmon host tool.
//!
//! Connects to a BGAPI network co-processor, runs one monitoring session and
//! prints its report on stdout. Progress and diagnostics go to stderr via
//! `tracing`.
//!
//! The session loop is blocking, so it runs on tokio's blocking pool while
//! the async side waits for either its completion or Ctrl-C.

mod cli;
mod transport;

use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use advmon::{Clock, Exit, Session};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Monotonic time since the session was created.
struct SystemClock(Instant);

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(Exit::Done) => ExitCode::SUCCESS,
        Ok(exit) => {
            error!("session ended: {:?}", exit);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<Exit> {
    let config = cli.session_config();
    let cancel = Arc::new(AtomicBool::new(false));

    let worker_cancel = Arc::clone(&cancel);
    let worker = tokio::task::spawn_blocking(move || -> Result<Exit> {
        let mut transport = transport::open(&cli)?;
        let mut session = Session::new(config, SystemClock(Instant::now()));
        let exit = advmon::run(&mut session, &mut transport, &worker_cancel)?;
        if let Some(report) = session.take_report() {
            println!("{report}");
        }
        Ok(exit)
    });

    supervise(worker, tokio::signal::ctrl_c(), &cancel).await
}

/// Wait for the session worker, cancelling it when `interrupt` fires.
///
/// If the interrupt source itself fails, the session is stopped and the
/// failure is returned.
async fn supervise(
    mut worker: JoinHandle<Result<Exit>>,
    interrupt: impl Future<Output = io::Result<()>>,
    cancel: &AtomicBool,
) -> Result<Exit> {
    tokio::select! {
        joined = &mut worker => joined.context("session task failed")?,
        signal = interrupt => {
            cancel.store(true, Ordering::Relaxed);
            match signal {
                Ok(()) => {
                    info!("interrupted, stopping");
                    worker.await.context("session task failed")?
                }
                Err(e) => {
                    if let Ok(Err(session_err)) = worker.await {
                        error!("{session_err:#}");
                    }
                    Err(anyhow::Error::new(e).context("cannot listen for Ctrl-C"))
                }
            }
        }
    }
}
