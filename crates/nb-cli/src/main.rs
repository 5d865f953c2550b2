mod gateway;

use clap::Parser;
use gateway::LiveGateway;
use nb_core::{NatError, Settings};
use nb_troubleshoot::NatDoctor;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "natbridge")]
#[command(version, about = "Diagnose and repair a NAT bridge on ifupdown hosts", long_about = None)]
struct Cli {}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _cli = Cli::parse();

    if let Err(err) = require_root() {
        eprintln!("Error: {}", err);
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn require_root() -> Result<(), NatError> {
    let euid = rustix::process::geteuid();
    if euid.is_root() {
        Ok(())
    } else {
        Err(NatError::NotRoot {
            euid: euid.as_raw(),
        })
    }
}

fn run() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    tracing::debug!(?settings, "loaded settings");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let gateway = LiveGateway::connect().await?;
        let report = NatDoctor::new(&gateway, &settings).run().await?;
        report.display();
        Ok::<_, anyhow::Error>(())
    })
}
