//! markerchat: display and mobile clients for a marker-gated session chat.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use markerchat_client::config::ClientConfig;
use markerchat_client::connection::{ConnectionConfig, ConnectionManager};
use markerchat_client::console::run_mobile_console;
use markerchat_client::driver::display::DisplayDriver;
use markerchat_client::driver::mobile::MobileDriver;
use markerchat_client::frames::{JsonlFrames, run_frame_poll};
use markerchat_client::tui::{run_display_plain, run_display_tui};
use markerchat_core::endpoint::{Endpoint, EndpointError, PageOrigin};
use markerchat_core::session::SessionId;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod cli;

/// Exit code when the mobile page carries no usable session id.
const EXIT_NO_SESSION: i32 = 2;

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let result = runtime.block_on(run(args));
    // A pending stdin read parks a blocking thread; don't wait on it.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(args: cli::Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::load_or_default(args.config.as_deref())?;
    if let Some(ms) = args.reconnect_delay_ms {
        config.reconnect_delay_ms = ms;
    }

    match args.command {
        cli::Command::Display(opts) => {
            // The full-screen UI owns the terminal; only log when asked to.
            if opts.plain || args.log_file.is_some() {
                init_tracing(args.log_file.as_deref())?;
            }
            run_display(opts, &config).await?;
        }
        cli::Command::Mobile(opts) => {
            init_tracing(args.log_file.as_deref())?;
            run_mobile(opts, &config).await?;
        }
        cli::Command::CompanionUrl(opts) => {
            let origin = PageOrigin::parse(&opts.origin)?;
            let endpoint = match opts.session {
                Some(id) => Endpoint::Session {
                    origin,
                    session: SessionId::new(id)?,
                },
                None => Endpoint::SharedRoom { origin },
            };
            println!("{}", endpoint.companion_url());
        }
        cli::Command::NewSession => {
            println!("{}", SessionId::generate());
        }
    }

    Ok(())
}

/// Page URL errors that end the process with a dedicated status instead of
/// an error report.
fn exit_status(err: &EndpointError) -> Option<i32> {
    match err {
        EndpointError::Session(_) => Some(EXIT_NO_SESSION),
        _ => None,
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = std::env::var("MARKERCHAT_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let builder = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(std::sync::Mutex::new(file)).init();
        }
        // stdout carries the transcript.
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
        }
        cancel.cancel();
    });
}

async fn run_display(opts: cli::DisplayOpts, config: &ClientConfig) -> anyhow::Result<()> {
    let origin = PageOrigin::parse(&opts.server)?;
    let endpoint = match (opts.session, opts.new_session) {
        (Some(id), _) => Endpoint::Session {
            origin,
            session: SessionId::new(id)?,
        },
        (None, true) => Endpoint::Session {
            origin,
            session: SessionId::generate(),
        },
        (None, false) => Endpoint::SharedRoom { origin },
    };
    let companion_url = endpoint.session().map(|_| endpoint.companion_url());
    let name = opts.name.unwrap_or_else(|| config.display_name.clone());
    let delay = config.reconnect_delay();

    tracing::info!(url = %endpoint.ws_url(), %name, "display starting");

    let cancel = CancellationToken::new();
    let (handle, events) = ConnectionManager::open(
        &endpoint,
        ConnectionConfig { reconnect_delay: delay },
        cancel.clone(),
    );
    let driver = DisplayDriver::for_endpoint(handle, &endpoint, name, delay);

    let result = if opts.plain {
        cancel_on_ctrl_c(&cancel);
        if let Some(url) = &companion_url {
            println!("scan: {url}");
        }
        let stdin = BufReader::new(tokio::io::stdin());
        run_display_plain(driver, events, stdin, tokio::io::stdout(), cancel.clone()).await
    } else {
        run_display_tui(driver, events, companion_url, cancel.clone()).await
    };
    cancel.cancel();
    result.context("display terminal failed")
}

async fn run_mobile(opts: cli::MobileOpts, config: &ClientConfig) -> anyhow::Result<()> {
    let endpoint = match Endpoint::from_mobile_page(&opts.page_url) {
        Ok(endpoint) => endpoint,
        Err(e) => match exit_status(&e) {
            Some(code) => {
                tracing::error!(page_url = %opts.page_url, error = %e, "no usable session id");
                eprintln!("{e}");
                std::process::exit(code);
            }
            None => return Err(e.into()),
        },
    };
    let delay = config.reconnect_delay();

    tracing::info!(url = %endpoint.ws_url(), "mobile starting");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let (marker_tx, marker_rx) = mpsc::channel(64);
    if let Some(path) = &opts.frames {
        let source = JsonlFrames::load(path)?;
        tracing::info!(path = %path.display(), frames = source.len(), "replaying marker frames");
        tokio::spawn(run_frame_poll(source, marker_tx, config.frame_period(), cancel.clone()));
    } else {
        drop(marker_tx);
    }

    let (handle, events) = ConnectionManager::open(
        &endpoint,
        ConnectionConfig { reconnect_delay: delay },
        cancel.clone(),
    );
    let driver = MobileDriver::new(handle, config.markers.clone(), config.prompts.clone(), delay);

    let stdin = BufReader::new(tokio::io::stdin());
    let result = run_mobile_console(driver, events, marker_rx, stdin, tokio::io::stdout(), cancel.clone()).await;
    cancel.cancel();
    result.context("mobile console failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_status(page_url: &str) -> Option<i32> {
        Endpoint::from_mobile_page(page_url).err().and_then(|e| exit_status(&e))
    }

    #[test]
    fn missing_or_empty_session_exits_with_two() {
        assert_eq!(page_status("http://localhost:8000/mobile"), Some(2));
        assert_eq!(page_status("http://localhost:8000/mobile?session_id="), Some(2));
        assert_eq!(page_status("http://localhost:8000/mobile?other=1"), Some(2));
    }

    #[test]
    fn other_page_errors_are_reported_normally() {
        assert_eq!(page_status("not a url"), None);
        assert_eq!(page_status("ftp://localhost/mobile?session_id=abc123"), None);
    }

    #[test]
    fn valid_page_has_no_exit_status() {
        assert!(Endpoint::from_mobile_page("http://localhost:8000/mobile?session_id=abc123").is_ok());
        assert_eq!(page_status("http://localhost:8000/mobile?session_id=abc123"), None);
    }
}
