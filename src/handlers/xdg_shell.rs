use smithay::desktop::PopupKind;
use smithay::reexports::wayland_protocols::xdg::decoration::zv1::server::zxdg_toplevel_decoration_v1;
use smithay::reexports::wayland_server::protocol::wl_seat::WlSeat;
use smithay::utils::Serial;
use smithay::wayland::compositor::with_states;
use smithay::wayland::shell::xdg::decoration::XdgDecorationHandler;
use smithay::wayland::shell::xdg::{
    PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState,
    XdgToplevelSurfaceData,
};
use smithay::{delegate_xdg_decoration, delegate_xdg_shell};
use zxdg_toplevel_decoration_v1::Mode as DecorationMode;

use crate::bluewm::{initial_configure_sent, ClientWindow, State};
use crate::shell::lock;
use crate::surfaces::{NativeSurface, SurfaceKind};

impl XdgShellHandler for State {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.bluewm.protocols.xdg_shell
    }

    fn new_toplevel(&mut self, toplevel: ToplevelSurface) {
        let (app_id, title) = toplevel_identity(&toplevel);
        let kind = SurfaceKind::Native(NativeSurface {
            title: title.clone(),
        });
        let identifier = app_id.or(title);

        match self
            .bluewm
            .session
            .surface_created(kind, identifier.as_deref())
        {
            Ok(id) => {
                self.bluewm.windows.insert(id, ClientWindow::Native(toplevel));
                self.flush_pending_placement();
            }
            Err(err) => {
                warn!("rejecting new toplevel: {err}");
                toplevel.send_close();
            }
        }
    }

    fn toplevel_destroyed(&mut self, toplevel: ToplevelSurface) {
        let Some(id) = self.bluewm.windows.find_toplevel(&toplevel) else {
            return;
        };

        self.bluewm.windows.remove(id);
        if self.bluewm.session.surface_destroyed(id) {
            self.bluewm.flush_configures();
            self.sync_keyboard_focus();
            self.refresh_pointer_contents();
            self.bluewm.queue_redraw_all();
        }
    }

    fn app_id_changed(&mut self, toplevel: ToplevelSurface) {
        self.update_identity(&toplevel);
    }

    fn title_changed(&mut self, toplevel: ToplevelSurface) {
        self.update_identity(&toplevel);
    }

    fn new_popup(&mut self, surface: PopupSurface, positioner: PositionerState) {
        surface.with_pending_state(|state| {
            state.geometry = positioner.get_geometry();
        });

        if let Err(err) = self.bluewm.protocols.popups.track_popup(PopupKind::Xdg(surface)) {
            warn!("error tracking popup: {err:?}");
        }
    }

    fn reposition_request(&mut self, surface: PopupSurface, positioner: PositionerState, token: u32) {
        surface.with_pending_state(|state| {
            state.geometry = positioner.get_geometry();
            state.positioner = positioner;
        });
        surface.send_repositioned(token);
    }

    fn grab(&mut self, _surface: PopupSurface, _seat: WlSeat, _serial: Serial) {
        // Popups are dismissed by their client; there is no compositor-side grab.
    }
}
delegate_xdg_shell!(State);

/// Windows never draw their own decorations.
impl XdgDecorationHandler for State {
    fn new_decoration(&mut self, toplevel: ToplevelSurface) {
        set_server_side(&toplevel);
    }

    fn request_mode(&mut self, toplevel: ToplevelSurface, _mode: DecorationMode) {
        set_server_side(&toplevel);
    }

    fn unset_mode(&mut self, toplevel: ToplevelSurface) {
        set_server_side(&toplevel);
    }
}
delegate_xdg_decoration!(State);

fn set_server_side(toplevel: &ToplevelSurface) {
    toplevel.with_pending_state(|state| {
        state.decoration_mode = Some(DecorationMode::ServerSide);
    });

    // Before the initial configure, the mode goes out with it.
    if initial_configure_sent(toplevel) {
        toplevel.send_pending_configure();
    }
}

impl State {
    /// Follows app id and title changes; the app id wins when both are set.
    fn update_identity(&mut self, toplevel: &ToplevelSurface) {
        let Some(id) = self.bluewm.windows.find_toplevel(toplevel) else {
            return;
        };

        let (app_id, title) = toplevel_identity(toplevel);
        {
            let mut shell = lock(&self.bluewm.session.shell);
            shell.set_title(id, title.as_deref());
            shell.set_identifier(id, app_id.as_deref().or(title.as_deref()));
        }
        self.flush_pending_placement();
    }

    /// Sends the configure of a window that just adopted a placeholder.
    pub(super) fn flush_pending_placement(&mut self) {
        if lock(&self.bluewm.session.shell).has_pending() {
            self.apply_pending();
        }
    }
}

fn toplevel_identity(toplevel: &ToplevelSurface) -> (Option<String>, Option<String>) {
    with_states(toplevel.wl_surface(), |states| {
        states
            .data_map
            .get::<XdgToplevelSurfaceData>()
            .and_then(|data| data.lock().ok())
            .map(|role| (role.app_id.clone(), role.title.clone()))
            .unwrap_or_default()
    })
}
