use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/bluewm/config.kdl`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Run with virtual outputs instead of the GPU and input devices.
    #[arg(long)]
    pub headless: bool,
    /// Remember placement requests for windows that do not exist yet (headless only).
    #[arg(long, requires = "headless")]
    pub offline: bool,
    /// Command to run upon compositor startup.
    #[arg(last = true)]
    pub command: Vec<OsString>,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Communicate with the running bluewm instance.
    Msg {
        #[command(subcommand)]
        msg: Msg,
        /// Format output as JSON.
        #[arg(short, long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Msg {
    /// Print the version of the running bluewm instance.
    Version,
    /// Move and resize the first window whose identifier contains the given text.
    MoveResize {
        identifier: String,
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        y: i32,
        width: i32,
        height: i32,
    },
    /// Set the brightness of every output, between 0.1 and 1.0.
    SetBrightness { value: f64 },
    /// Print the number of connected outputs.
    MonitorCount,
    /// Check whether a window with the given identifier is open.
    IsRunning { identifier: String },
    /// List connected outputs.
    Outputs,
    /// List open windows.
    Surfaces,
}

impl From<Msg> for bluewm_ipc::Request {
    fn from(msg: Msg) -> Self {
        use bluewm_ipc::Request;

        match msg {
            Msg::Version => Request::Version,
            Msg::MoveResize {
                identifier,
                x,
                y,
                width,
                height,
            } => Request::MoveResize {
                identifier,
                x,
                y,
                width,
                height,
            },
            Msg::SetBrightness { value } => Request::SetBrightness { value },
            Msg::MonitorCount => Request::MonitorCount,
            Msg::IsRunning { identifier } => Request::IsRunning { identifier },
            Msg::Outputs => Request::Outputs,
            Msg::Surfaces => Request::Surfaces,
        }
    }
}
