// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aviary::config::Config;
use aviary::launch::ClaudeLaunchCommand;
use aviary::ports;
use aviary::supervisor::Supervisor;
use aviary::tmux::TmuxAdapter;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(()) => {}
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let tmux = Arc::new(TmuxAdapter::new(config.session.clone()));
    let mut launcher = ClaudeLaunchCommand::default();
    if let Some(ref script) = config.launcher_script {
        launcher.script_path = script.clone();
    }

    let supervisor = Arc::new(Supervisor::new(
        config.supervisor_config()?,
        tmux,
        Arc::new(launcher),
    )?);

    for (name, prompt) in config.agent_specs()? {
        supervisor
            .register_agent(&name, "placeholder", &prompt, config.working_dir.as_deref())
            .await?;
    }

    let mcp_port = match config.mcp_port {
        Some(preferred) => Some(ports::find_available_port(preferred, 10)?),
        None => None,
    };

    Arc::clone(&supervisor).start(mcp_port).await?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    // A second signal during teardown forces an immediate exit.
    tokio::spawn(async {
        wait_for_shutdown_signal().await;
        error!("second shutdown signal, exiting immediately");
        std::process::exit(130);
    });

    // Stop order matters: the supervisor tears down poll loops and the
    // broker listener before the process exits.
    supervisor.stop().await;
    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
