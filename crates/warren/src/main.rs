//! Warren CLI - sandboxed agent orchestrator
//!
//! Binary name: `warren`

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::process;

use tokio_util::sync::CancellationToken;

mod cli;
mod process_controller;
mod server;
mod shutdown;

use cli::{build_cli, format_error, get_exit_code, run_cli};

/// Conventional exit status after SIGINT.
const INTERRUPTED: i32 = 130;

/// Resolves on SIGINT/SIGTERM. Never resolves if handlers cannot be installed.
async fn interrupted() {
    if let Err(e) = shutdown::termination_signal().await {
        tracing::warn!(error = %e, "signal handlers unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("interrupted");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    // The dashboard server drains its own connections on a signal.
    let serving = matches.subcommand_name() == Some("serve");

    let interrupt = CancellationToken::new();
    let run = run_cli(matches, interrupt.clone());
    tokio::pin!(run);

    let (cli_result, exit_code) = tokio::select! {
        result = &mut run => (result, None),
        () = interrupted(), if !serving => {
            // Let in-flight work roll back and record its outcome first.
            interrupt.cancel();
            (run.await, Some(INTERRUPTED))
        }
    };

    if let Err(err) = &cli_result {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {}", format_error(err));
        }
    }
    let code = exit_code.or_else(|| cli_result.as_ref().err().map(get_exit_code));
    if let Some(code) = code {
        #[allow(clippy::exit)]
        process::exit(code);
    }
}
