//! Compositor state.
//!
//! [`State`] is the calloop data: the backend plus [`Bluewm`], which holds the Wayland side of
//! the session. The protocol-independent core lives in [`Session`]; this module wires smithay
//! objects to it.

mod init;
mod output;
mod protocols;
mod render;
mod windows;

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bluewm_config::Config;
use calloop::futures::Scheduler;
use calloop::{LoopHandle, LoopSignal, RegistrationToken};
use smithay::desktop::layer_map_for_output;
use smithay::input::Seat;
use smithay::output::Output;
use smithay::reexports::wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use smithay::reexports::wayland_server::{DisplayHandle, Resource};
use smithay::utils::{Logical, Rectangle, Serial};
use smithay::wayland::compositor::CompositorClientState;
use smithay::xwayland::X11Wm;

pub use self::init::StartOptions;
pub use self::protocols::ProtocolStates;
pub use self::render::OutputRenderElements;
pub use self::windows::{initial_configure_sent, ClientWindow, Windows};
use crate::backend::Backend;
use crate::cursor::CursorManager;
use crate::ipc::server::IpcServer;
use crate::outputs::OutputId;
use crate::session::{Session, TeardownSink};
use crate::shell::lock;
use crate::surfaces::SurfaceId;
use crate::utils::spawning::spawn;

const FRAME_CALLBACK_THROTTLE: Option<Duration> = Some(Duration::from_millis(995));

pub struct State {
    pub backend: Backend,
    pub bluewm: Bluewm,
}

pub struct Bluewm {
    pub config: Rc<RefCell<Config>>,

    pub event_loop: LoopHandle<'static, State>,
    pub scheduler: Scheduler<()>,
    pub stop_signal: LoopSignal,
    pub display_handle: DisplayHandle,
    pub socket_name: OsString,
    pub start_time: Instant,

    pub session: Session,
    pub protocols: ProtocolStates,
    pub seat: Seat<State>,
    pub cursor: CursorManager,
    pub windows: Windows,

    /// Wayland-side state of every output the session manages.
    pub outputs: HashMap<OutputId, OutputState>,

    pub xwm: Option<X11Wm>,
    pub xdisplay: Option<u32>,

    /// Command to run once the session endpoints are up.
    pub startup_command: Vec<OsString>,

    pub ipc_server: Option<IpcServer>,
}

pub struct OutputState {
    pub output: Output,
    pub global: smithay::reexports::wayland_server::backend::GlobalId,
    pub redraw_state: RedrawState,
    /// Incremented on every presented or estimated frame.
    pub frame_callback_sequence: u32,
    pub refresh_interval: Option<Duration>,
}

#[derive(Debug, Default)]
pub enum RedrawState {
    /// The compositor is idle.
    #[default]
    Idle,
    /// A redraw is queued.
    Queued,
    /// We submitted a frame to the KMS and waiting for it to be presented.
    WaitingForVBlank { redraw_needed: bool },
    /// We did not submit anything to KMS and made a timer to fire at the estimated VBlank.
    WaitingForEstimatedVBlank(RegistrationToken),
    /// A redraw is queued on top of the above.
    WaitingForEstimatedVBlankAndQueued(RegistrationToken),
}

impl RedrawState {
    fn queue_redraw(self) -> Self {
        match self {
            RedrawState::Idle => RedrawState::Queued,
            RedrawState::WaitingForEstimatedVBlank(token) => {
                RedrawState::WaitingForEstimatedVBlankAndQueued(token)
            }

            // A redraw is already queued.
            value @ (RedrawState::Queued | RedrawState::WaitingForEstimatedVBlankAndQueued(_)) => {
                value
            }

            // We're waiting for VBlank, request a redraw afterwards.
            RedrawState::WaitingForVBlank { .. } => RedrawState::WaitingForVBlank {
                redraw_needed: true,
            },
        }
    }

    /// The state after a queued redraw produced no frame.
    ///
    /// A pending estimated VBlank timer is kept so that frame callbacks still go out.
    fn skipped(self) -> Self {
        match self {
            RedrawState::WaitingForEstimatedVBlank(token)
            | RedrawState::WaitingForEstimatedVBlankAndQueued(token) => {
                RedrawState::WaitingForEstimatedVBlank(token)
            }
            _ => RedrawState::Idle,
        }
    }
}

#[derive(Default)]
pub struct SurfaceFrameThrottlingState {
    last_sent_at: RefCell<Option<(Output, u32)>>,
}

pub struct ClientState {
    pub compositor_state: CompositorClientState,
}

impl ClientData for ClientState {
    fn initialized(&self, _client_id: ClientId) {}
    fn disconnected(&self, _client_id: ClientId, _reason: DisconnectReason) {}
}

impl State {
    pub fn refresh_and_flush_clients(&mut self) {
        let _span = tracy_client::span!("State::refresh_and_flush_clients");

        self.bluewm.protocols.popups.cleanup();
        self.bluewm.cursor.check_cursor_image_alive();

        self.bluewm.redraw_queued_outputs(&mut self.backend);

        {
            let _span = tracy_client::span!("flush_clients");
            if let Err(err) = self.bluewm.display_handle.flush_clients() {
                warn!("error flushing clients: {err:?}");
            }
        }
    }

    /// Flushes requests queued by control callers.
    pub fn apply_pending(&mut self) {
        let _span = tracy_client::span!("State::apply_pending");

        let configures = self.bluewm.session.apply_pending(&mut self.backend);
        for configure in configures {
            match self.bluewm.windows.get(configure.surface) {
                Some(window) => window.configure(configure.geometry),
                None => debug!("configure for {} dropped: no window", configure.surface),
            }
        }

        self.refresh_pointer_contents();
        self.bluewm.queue_redraw_all();
    }

    /// Gives keyboard focus to a window, or clears it.
    pub fn focus_surface(&mut self, id: Option<SurfaceId>, serial: Serial) {
        let Some(keyboard) = self.bluewm.seat.get_keyboard() else {
            self.bluewm.session.input.set_keyboard_focus(id);
            return;
        };

        let previous = self.bluewm.session.input.keyboard_focus();
        self.bluewm.session.input.set_keyboard_focus(id);

        if previous != id {
            if let Some(window) = previous.and_then(|prev| self.bluewm.windows.get(prev)) {
                window.set_activated(false);
            }
        }

        let surface = id.and_then(|id| {
            let window = self.bluewm.windows.get(id)?;
            window.set_activated(true);
            if let (ClientWindow::X11(x11), Some(xwm)) = (window, &mut self.bluewm.xwm) {
                if let Err(err) = xwm.raise_window(x11) {
                    debug!("error raising X11 window: {err:?}");
                }
            }
            window.wl_surface()
        });

        if keyboard.current_focus() != surface {
            keyboard.set_focus(self, surface, serial);
        }
    }

    /// Brings the smithay keyboard in line with the router after a window went away.
    pub fn sync_keyboard_focus(&mut self) {
        let Some(keyboard) = self.bluewm.seat.get_keyboard() else {
            return;
        };

        let surface = self
            .bluewm
            .session
            .input
            .keyboard_focus()
            .and_then(|id| self.bluewm.windows.wl_surface(id));

        if keyboard.current_focus() != surface {
            let serial = smithay::utils::SERIAL_COUNTER.next_serial();
            keyboard.set_focus(self, surface, serial);
        }
    }
}

impl Bluewm {
    pub fn insert_client(&mut self, client: UnixStream) {
        let data = Arc::new(ClientState {
            compositor_state: Default::default(),
        });

        if let Err(err) = self.display_handle.insert_client(client, data) {
            warn!("error inserting client: {err}");
        }
    }

    /// Runs the startup command, once.
    ///
    /// With Xwayland enabled this waits for the X server so that `DISPLAY` is known.
    pub fn spawn_startup_command(&mut self) {
        let command = std::mem::take(&mut self.startup_command);
        spawn(command, self.xdisplay);
    }

    /// Sends configures queued by tiling or window moves.
    ///
    /// Brightness requests stay queued for [`State::apply_pending`].
    pub fn flush_configures(&mut self) {
        let configures = lock(&self.session.shell).take_configures();
        for configure in configures {
            match self.windows.get(configure.surface) {
                Some(window) => window.configure(configure.geometry),
                None => debug!("configure for {} dropped: no window", configure.surface),
            }
        }
    }

    /// The part of the first output that layer surfaces leave to windows, in global coordinates.
    fn tile_area(&self) -> Option<Rectangle<i32, Logical>> {
        let first = self.session.outputs.iter().next()?;
        let state = self.outputs.get(&first.id())?;
        let mut zone = layer_map_for_output(&state.output).non_exclusive_zone();
        zone.loc += first.geometry().loc;
        Some(zone)
    }

    /// Follows output and exclusive zone changes.
    pub fn refresh_tile_area(&mut self) {
        let area = self.tile_area();
        lock(&self.session.shell).set_tile_area(area);
        self.flush_configures();
    }

    pub fn toggle_tiling(&mut self) {
        let area = self.tile_area();
        {
            let mut shell = lock(&self.session.shell);
            shell.set_tile_area(area);
            let tiling = shell.is_tiling();
            shell.set_tiling(!tiling);
        }
        self.flush_configures();
        self.queue_redraw_all();
    }

    /// Destroys every window, then every output, then stops the event loop.
    pub fn shutdown(&mut self) {
        let _span = tracy_client::span!("Bluewm::shutdown");

        let teardown = self.session.shutdown();
        teardown.run(self);
        info!(
            "closed {} windows and {} outputs",
            teardown.surfaces.len(),
            teardown.outputs.len()
        );
    }
}

impl TeardownSink for Bluewm {
    fn destroy_surface(&mut self, id: SurfaceId) {
        let Some(window) = self.windows.remove(id) else {
            return;
        };
        window.close();

        // Clients that ignore the close request are cut off.
        if let Some(client) = window.wl_surface().and_then(|surface| surface.client()) {
            self.display_handle
                .backend_handle()
                .kill_client(client.id(), DisconnectReason::ConnectionClosed);
        }
    }

    fn destroy_output(&mut self, id: OutputId) {
        self.remove_output_global(id);
    }

    fn stop(&mut self) {
        self.xwm = None;
        self.stop_signal.stop();
    }
}
