//! Session startup.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bluewm_config::Config;
use calloop::generic::Generic;
use calloop::ping::make_ping;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{Interest, LoopHandle, LoopSignal, Mode, PostAction};
use smithay::reexports::wayland_server::Display;
use smithay::wayland::socket::ListeningSocketSource;

use super::{Bluewm, ProtocolStates, State, Windows};
use crate::backend::{Backend, Headless, Tty};
use crate::control::ControlMode;
use crate::cursor::CursorManager;
use crate::ipc::server::IpcServer;
use crate::session::Session;

/// How the session was asked to run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Use the simulated backend instead of the devices.
    pub headless: bool,
    /// Record placeholders for unknown windows; only honored with `headless`.
    pub offline: bool,
}

impl State {
    pub fn new(
        config: Config,
        event_loop: LoopHandle<'static, State>,
        stop_signal: LoopSignal,
        display: Display<State>,
        options: StartOptions,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("State::new");

        let control_mode = if (options.headless && options.offline) || config.debug.offline_control
        {
            ControlMode::Offline
        } else {
            ControlMode::Native
        };

        let config = Rc::new(RefCell::new(config));

        let mut backend = if options.headless {
            Backend::Headless(Headless::new(&config.borrow()))
        } else {
            let tty = Tty::new(config.clone(), event_loop.clone())
                .context("error initializing the TTY backend")?;
            Backend::Tty(tty)
        };

        let mut bluewm =
            Bluewm::new(config, event_loop, stop_signal, display, &backend, control_mode)?;
        backend
            .init(&mut bluewm)
            .context("error initializing the backend")?;

        Ok(Self { backend, bluewm })
    }
}

impl Bluewm {
    pub fn new(
        config: Rc<RefCell<Config>>,
        event_loop: LoopHandle<'static, State>,
        stop_signal: LoopSignal,
        display: Display<State>,
        backend: &Backend,
        control_mode: ControlMode,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Bluewm::new");

        let (executor, scheduler) =
            calloop::futures::executor().context("error creating the async executor")?;
        event_loop
            .insert_source(executor, |_, _, _| ())
            .map_err(|err| anyhow::anyhow!("error inserting the async executor: {err}"))?;

        let display_handle = display.handle();
        let config_ = config.borrow();

        // Control callers on other threads wake the loop to flush what they queued.
        let (wake, wake_source) = make_ping().context("error creating the control wake-up")?;
        event_loop
            .insert_source(wake_source, |_, _, state| state.apply_pending())
            .map_err(|err| anyhow::anyhow!("error inserting the control wake-up: {err}"))?;

        let session = Session::new(&config_, control_mode, Some(wake));
        let protocols = ProtocolStates::new(&display_handle);
        let cursor = CursorManager::new(&config_.cursor.xcursor_theme, config_.cursor.xcursor_size);

        // Devices attach keyboards and pointers as they appear.
        let seat = protocols
            .seat
            .new_wl_seat(&display_handle, backend.seat_name());

        event_loop
            .insert_source(
                Timer::from_duration(Duration::from_secs(1)),
                |_, _, state| {
                    state.bluewm.send_frame_callbacks_on_fallback_timer();
                    TimeoutAction::ToDuration(Duration::from_secs(1))
                },
            )
            .map_err(|err| anyhow::anyhow!("error inserting the frame callback timer: {err}"))?;

        let socket_source =
            ListeningSocketSource::new_auto().context("error creating the Wayland socket")?;
        let socket_name = socket_source.socket_name().to_os_string();
        event_loop
            .insert_source(socket_source, |client, _, state| {
                state.bluewm.insert_client(client);
            })
            .map_err(|err| anyhow::anyhow!("error inserting the Wayland socket: {err}"))?;
        info!("listening on Wayland socket: {socket_name:?}");

        let ipc_server = match IpcServer::start(&event_loop, &socket_name, session.control.clone()) {
            Ok(server) => Some(server),
            Err(err) => {
                warn!("error starting IPC server: {err:?}");
                None
            }
        };

        let display_source = Generic::new(display, Interest::READ, Mode::Level);
        event_loop
            .insert_source(display_source, |_, display, state| {
                // SAFETY: we don't drop the display.
                if let Err(err) = unsafe { display.get_mut().dispatch_clients(state) } {
                    warn!("error dispatching clients: {err}");
                }
                Ok(PostAction::Continue)
            })
            .map_err(|err| anyhow::anyhow!("error inserting the display source: {err}"))?;

        drop(config_);
        Ok(Self {
            config,

            event_loop,
            scheduler,
            stop_signal,
            display_handle,
            socket_name,
            start_time: Instant::now(),

            session,
            protocols,
            seat,
            cursor,
            windows: Windows::default(),
            outputs: HashMap::new(),

            xwm: None,
            xdisplay: None,

            startup_command: Vec::new(),

            ipc_server,
        })
    }
}
