//! Orchestrator driver.
//!
//! Wires the supervisor, the load balancer and the console together:
//!
//! 1. start every service in name order (a failing service is logged and
//!    skipped)
//! 2. bind the load balancer and let it follow replica membership
//! 3. run until a signal, `quit`, or a load balancer failure
//! 4. stop all replicas and wait for them to be reaped

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::console::{self, Console};
use crate::constants;
use crate::lb::LoadBalancer;
use crate::supervisor::{Backpressure, Supervisor};

/// Start every configured service.
///
/// Returns the number of services that failed to start completely. Replicas
/// started before a failure keep running and are logged with the error.
pub fn start_services(supervisor: &Supervisor, config: &Config) -> usize {
    let mut failed = 0;
    for service in config.services_in_order() {
        match supervisor.start_service(service) {
            Ok(names) => {
                info!(service = %service.name, replicas = names.len(), "Started service");
            },
            Err(e) => {
                error!(
                    service = %service.name,
                    running = ?e.started(),
                    error = %e,
                    "Failed to start service"
                );
                failed += 1;
            },
        }
    }
    failed
}

/// Run the orchestrator until shutdown.
///
/// `input` feeds the console; `None` runs without one. Cancelling `cancel`
/// (or typing `quit`) shuts everything down.
///
/// # Errors
///
/// Returns an error if the load balancer cannot be created, bound or
/// served. All replicas are stopped before returning either way.
pub async fn run(
    config: Config,
    cancel: CancellationToken,
    input: Option<mpsc::Receiver<String>>,
) -> Result<()> {
    let supervisor = Supervisor::with_log_capacity(config.log_capacity);
    let printer = console::spawn_log_printer(
        supervisor.subscribe_logs(constants::DEFAULT_SINK_CAPACITY, Backpressure::Block),
    );

    start_services(&supervisor, &config);

    let result = serve(&config, &supervisor, cancel.clone(), input).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Load balancer failed, shutting down");
    }

    cancel.cancel();
    shutdown(&supervisor).await;

    supervisor.log_stream().unsubscribe();
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("Log printer did not finish");
    }

    result
}

async fn serve(
    config: &Config,
    supervisor: &Supervisor,
    cancel: CancellationToken,
    input: Option<mpsc::Receiver<String>>,
) -> Result<()> {
    let lb = LoadBalancer::from_config(config).context("Failed to create load balancer")?;
    let _membership = lb.follow_membership(supervisor.subscribe_events(), cancel.clone());
    let listening = lb.bind().await.context("Load balancer failed")?;
    info!(addr = %listening.local_addr(), "Load balancer started");

    if let Some(input) = input {
        let console = Console::new(supervisor.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            console.run(input, std::io::stdout(), cancel).await;
        });
    }

    let mut lb_task = tokio::spawn(listening.serve(cancel.clone()));

    let finished = tokio::select! {
        joined = &mut lb_task => Some(joined),
        () = wait_for_shutdown_signal() => None,
        () = cancel.cancelled() => None,
    };
    cancel.cancel();

    let joined = match finished {
        Some(joined) => joined,
        None => lb_task.await,
    };
    joined
        .context("Load balancer task panicked")?
        .context("Load balancer failed")
}

/// Stop every replica and wait (bounded) for them to be reaped.
pub async fn shutdown(supervisor: &Supervisor) {
    info!("Shutting down");
    supervisor.shutdown_all();

    let timeout = Duration::from_secs(constants::REAP_TIMEOUT_SECS);
    if tokio::time::timeout(timeout, supervisor.wait_idle()).await.is_err() {
        warn!(timeout = ?timeout, "Replicas still running after shutdown");
    } else {
        info!("All replicas stopped");
    }
}

/// Wait for a shutdown signal (SIGTERM/SIGINT on Unix, Ctrl+C elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    std::future::pending::<()>().await;
                    return;
                },
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    }
}
