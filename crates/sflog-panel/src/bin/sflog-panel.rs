use anyhow::Context;
use clap::Parser;
use sflog_panel::config::{init_logging, Args, Config};
use sflog_panel::detail::DetailFetcher;
use sflog_panel::poller::{CommandListing, Poller};
use sflog_panel::process::ShellCommand;
use sflog_panel::web::{router, WebHost, WebHostConfig};
use sflog_panel::{Host, PanelController};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(Args::parse()).context("invalid configuration")?;
    let _log_guard = init_logging(&config);

    let web = WebHost::new(WebHostConfig {
        url: config.panel_url(),
        opener: config.opener.clone(),
        open_browser: config.open_browser,
    });
    let host: Arc<dyn Host> = Arc::new(web.clone());

    let listing = CommandListing::new(ShellCommand::new(config.listing_command.clone()));
    let poller = Poller::new(Arc::new(listing), Arc::clone(&host), config.poll_interval);
    let detail = DetailFetcher::new(
        Arc::clone(&host),
        config.output_dir.clone(),
        config.detail_command.clone(),
    );
    let (controller, handle) =
        PanelController::new(Arc::clone(&host), config.template.clone(), poller, detail);
    let controller_task = tokio::spawn(controller.run());

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(
        event = "panel_server_start",
        url = %config.panel_url(),
        output_dir = %config.output_dir.display(),
        poll_interval_secs = config.poll_interval.as_secs()
    );

    if config.show_on_start {
        handle.show_logs();
    }

    let shutdown_handle = handle.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "shutdown_requested");
        shutdown_handle.shutdown();
    };

    let served = axum::serve(
        listener,
        router(web, handle.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;
    if let Err(err) = &served {
        error!(event = "panel_server_error", error = %err);
    }

    handle.shutdown();
    if let Err(err) = controller_task.await {
        error!(event = "controller_join", error = %err);
    }
    served.context("panel server failed")
}
