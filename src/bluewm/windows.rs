//! Protocol handles of client windows, keyed by surface id.

use std::collections::HashMap;

use smithay::reexports::wayland_protocols::xdg::shell::server::xdg_toplevel;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Rectangle};
use smithay::wayland::compositor::with_states;
use smithay::wayland::shell::xdg::{ToplevelSurface, XdgToplevelSurfaceData};
use smithay::xwayland::X11Surface;

use crate::surfaces::SurfaceId;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientWindow {
    Native(ToplevelSurface),
    X11(X11Surface),
}

impl ClientWindow {
    /// The window's root surface.
    ///
    /// X11 windows only get one once Xwayland has associated it.
    pub fn wl_surface(&self) -> Option<WlSurface> {
        match self {
            ClientWindow::Native(toplevel) => Some(toplevel.wl_surface().clone()),
            ClientWindow::X11(window) => window.wl_surface(),
        }
    }

    /// Asks the client to take the given geometry.
    ///
    /// Native windows only learn the size; their position is compositor-side.
    pub fn configure(&self, geometry: Rectangle<i32, Logical>) {
        match self {
            ClientWindow::Native(toplevel) => {
                toplevel.with_pending_state(|state| state.size = Some(geometry.size));
                if initial_configure_sent(toplevel) {
                    toplevel.send_pending_configure();
                }
            }
            ClientWindow::X11(window) => {
                if let Err(err) = window.configure(Some(geometry)) {
                    debug!("error configuring X11 window: {err:?}");
                }
            }
        }
    }

    pub fn set_activated(&self, activated: bool) {
        match self {
            ClientWindow::Native(toplevel) => {
                let changed = toplevel.with_pending_state(|state| {
                    if activated {
                        state.states.set(xdg_toplevel::State::Activated)
                    } else {
                        state.states.unset(xdg_toplevel::State::Activated)
                    }
                });
                if changed && initial_configure_sent(toplevel) {
                    toplevel.send_pending_configure();
                }
            }
            ClientWindow::X11(window) => {
                if let Err(err) = window.set_activated(activated) {
                    debug!("error activating X11 window: {err:?}");
                }
            }
        }
    }

    pub fn close(&self) {
        match self {
            ClientWindow::Native(toplevel) => toplevel.send_close(),
            ClientWindow::X11(window) => {
                if let Err(err) = window.close() {
                    debug!("error closing X11 window: {err:?}");
                }
            }
        }
    }
}

pub fn initial_configure_sent(toplevel: &ToplevelSurface) -> bool {
    with_states(toplevel.wl_surface(), |states| {
        states
            .data_map
            .get::<XdgToplevelSurfaceData>()
            .and_then(|data| data.lock().ok().map(|data| data.initial_configure_sent))
            .unwrap_or(false)
    })
}

#[derive(Debug, Default)]
pub struct Windows {
    windows: HashMap<SurfaceId, ClientWindow>,
}

impl Windows {
    pub fn insert(&mut self, id: SurfaceId, window: ClientWindow) {
        self.windows.insert(id, window);
    }

    pub fn remove(&mut self, id: SurfaceId) -> Option<ClientWindow> {
        self.windows.remove(&id)
    }

    pub fn get(&self, id: SurfaceId) -> Option<&ClientWindow> {
        self.windows.get(&id)
    }

    pub fn wl_surface(&self, id: SurfaceId) -> Option<WlSurface> {
        self.get(id).and_then(ClientWindow::wl_surface)
    }

    /// Finds the window whose root surface is `surface`.
    pub fn surface_id(&self, surface: &WlSurface) -> Option<SurfaceId> {
        self.windows
            .iter()
            .find(|(_, window)| window.wl_surface().as_ref() == Some(surface))
            .map(|(id, _)| *id)
    }

    pub fn find_toplevel(&self, toplevel: &ToplevelSurface) -> Option<SurfaceId> {
        self.windows.iter().find_map(|(id, window)| match window {
            ClientWindow::Native(t) if t == toplevel => Some(*id),
            _ => None,
        })
    }

    pub fn find_x11(&self, window: &X11Surface) -> Option<SurfaceId> {
        self.windows.iter().find_map(|(id, w)| match w {
            ClientWindow::X11(x11) if x11 == window => Some(*id),
            _ => None,
        })
    }

    /// Finds an X11 window by its X11 window id.
    pub fn find_x11_by_window_id(&self, window_id: u32) -> Option<SurfaceId> {
        self.windows.iter().find_map(|(id, w)| match w {
            ClientWindow::X11(x11) if x11.window_id() == window_id => Some(*id),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SurfaceId, &ClientWindow)> + '_ {
        self.windows.iter()
    }
}
