#[macro_use]
extern crate tracing;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use bluewm::bluewm::{StartOptions, State};
use bluewm::cli::{Cli, Sub};
use bluewm::ipc::client::handle_msg;
use bluewm::utils::version;
use bluewm_config::Config;
use bluewm_ipc::socket::SOCKET_PATH_ENV;
use calloop::signals::{Signal, Signals};
use calloop::EventLoop;
use clap::Parser;
use directories::ProjectDirs;
use sd_notify::NotifyState;
use smithay::reexports::wayland_server::Display;
use tracing_subscriber::EnvFilter;

#[cfg(debug_assertions)]
const DEFAULT_LOG_FILTER: &str = "bluewm=debug,info";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_FILTER: &str = "bluewm=info";

fn main() -> ExitCode {
    // Set backtrace defaults if not set.
    if env::var_os("RUST_BACKTRACE").is_none() {
        env::set_var("RUST_BACKTRACE", "1");
    }
    if env::var_os("RUST_LIB_BACKTRACE").is_none() {
        env::set_var("RUST_LIB_BACKTRACE", "0");
    }

    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    if let Some(subcommand) = cli.subcommand {
        match subcommand {
            Sub::Msg { msg, json } => {
                if let Err(err) = handle_msg(msg, json) {
                    error!("{err:?}");
                    return ExitCode::FAILURE;
                }
            }
        }

        return ExitCode::SUCCESS;
    }

    let _client = tracy_client::Client::start();

    info!("starting version {}", &version());

    if let Err(err) = run(cli) {
        error!("{err:?}");
        return ExitCode::FAILURE;
    }

    info!("exiting");
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.or_else(default_config_path);
    let config = match Config::load_or_default(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            warn!("{err:?}");
            warn!("using the default config");
            Config::default()
        }
    };

    let spawn_xwayland = !config.debug.disable_xwayland;

    let mut event_loop = EventLoop::<State>::try_new().context("error creating the event loop")?;
    let display = Display::new().context("error creating the Wayland display")?;

    let options = StartOptions {
        headless: cli.headless,
        offline: cli.offline,
    };
    let mut state = State::new(
        config,
        event_loop.handle(),
        event_loop.get_signal(),
        display,
        options,
    )?;

    // Advertise the endpoints to spawned clients.
    env::set_var("WAYLAND_DISPLAY", &state.bluewm.socket_name);
    if let Some(ipc_server) = &state.bluewm.ipc_server {
        env::set_var(SOCKET_PATH_ENV, &ipc_server.socket_path);
        info!("IPC listening on: {}", ipc_server.socket_path.to_string_lossy());
    }

    state.bluewm.startup_command = cli.command;
    if spawn_xwayland {
        // The startup command then runs once Xwayland reports back.
        if let Err(err) = state.bluewm.start_xwayland() {
            warn!("{err:?}");
            state.bluewm.spawn_startup_command();
        }
    } else {
        state.bluewm.spawn_startup_command();
    }

    let signals =
        Signals::new(&[Signal::SIGINT, Signal::SIGTERM]).context("error watching signals")?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state| {
            info!("received {:?}, shutting down", event.signal());
            state.bluewm.shutdown();
        })
        .map_err(|err| anyhow::anyhow!("error inserting the signal source: {err}"))?;

    // Notify systemd we're ready.
    if let Err(err) = sd_notify::notify(true, &[NotifyState::Ready]) {
        warn!("error notifying systemd: {err:?}");
    }

    event_loop
        .run(None, &mut state, |state| state.refresh_and_flush_clients())
        .context("error running the event loop")?;

    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let Some(dirs) = ProjectDirs::from("", "", "bluewm") else {
        warn!("error retrieving home directory");
        return None;
    };

    Some(bluewm_config::default_config_path(dirs.config_dir()))
}
