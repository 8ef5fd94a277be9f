//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "markerchat", version, about = "Marker-gated session chat clients")]
pub struct Cli {
    /// TOML config file
    #[arg(long, short = 'c', global = true, env = "MARKERCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Override the delay between a close and the next connect attempt
    #[arg(long, global = true)]
    pub reconnect_delay_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the live transcript on a stationary screen
    Display(DisplayOpts),
    /// Talk to the animal in view from a visitor's device
    Mobile(MobileOpts),
    /// Print the URL a QR code should encode for the mobile page
    CompanionUrl(CompanionOpts),
    /// Print a freshly generated session id
    NewSession,
}

#[derive(Args)]
pub struct DisplayOpts {
    /// Server origin, e.g. http://127.0.0.1:8000
    #[arg(long, short = 's')]
    pub server: String,

    /// Bind to this session instead of the shared room
    #[arg(long, conflicts_with = "new_session")]
    pub session: Option<String>,

    /// Bind to a freshly generated session
    #[arg(long)]
    pub new_session: bool,

    /// Name to send under and highlight (default from config)
    #[arg(long)]
    pub name: Option<String>,

    /// Print lines instead of drawing a full-screen UI
    #[arg(long)]
    pub plain: bool,
}

#[derive(Args)]
pub struct MobileOpts {
    /// The mobile page URL, as scanned from the QR code
    pub page_url: String,

    /// Replay recorded marker visibility, one {"visible": [...]} per line
    #[arg(long)]
    pub frames: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompanionOpts {
    /// Server origin, e.g. https://zoo.example.org
    #[arg(long)]
    pub origin: String,

    /// Session to embed in the URL
    #[arg(long)]
    pub session: Option<String>,
}
