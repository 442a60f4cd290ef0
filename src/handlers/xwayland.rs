//! Xwayland integration.
//!
//! X11 windows are compatibility surfaces: they pick their own geometry through configure
//! requests, and transient windows nest under their parent in the scene.

use std::process::Stdio;

use anyhow::Context;
use smithay::delegate_xwayland_shell;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Rectangle};
use smithay::wayland::xwayland_shell::{XWaylandShellHandler, XWaylandShellState};
use smithay::xwayland::xwm::{Reorder, ResizeEdge, WmWindowProperty, XwmId};
use smithay::xwayland::{X11Surface, X11Wm, XWayland, XWaylandEvent, XwmHandler};

use crate::bluewm::{Bluewm, ClientWindow, State};
use crate::shell::lock;
use crate::surfaces::{CompatSurface, SurfaceKind};

impl Bluewm {
    /// Spawns Xwayland and starts the X11 window manager once it is ready.
    ///
    /// `DISPLAY` is exported when the X server accepts connections.
    pub fn start_xwayland(&mut self) -> anyhow::Result<()> {
        let (xwayland, client) = XWayland::spawn(
            &self.display_handle,
            None,
            std::iter::empty::<(String, String)>(),
            true,
            Stdio::null(),
            Stdio::null(),
            |_| (),
        )
        .context("error spawning Xwayland")?;

        self.event_loop
            .insert_source(xwayland, move |event, _, state| match event {
                XWaylandEvent::Ready {
                    x11_socket,
                    display_number,
                } => {
                    let handle = state.bluewm.event_loop.clone();
                    match X11Wm::start_wm(handle, x11_socket, client.clone()) {
                        Ok(wm) => {
                            info!("Xwayland ready on :{display_number}");
                            state.bluewm.xwm = Some(wm);
                            state.bluewm.xdisplay = Some(display_number);
                            std::env::set_var("DISPLAY", format!(":{display_number}"));
                        }
                        Err(err) => warn!("error starting the X11 window manager: {err:?}"),
                    }
                    state.bluewm.spawn_startup_command();
                }
                XWaylandEvent::Error => {
                    warn!("Xwayland crashed on startup");
                    state.bluewm.spawn_startup_command();
                }
            })
            .map_err(|err| anyhow::anyhow!("error inserting the Xwayland source: {err}"))?;

        Ok(())
    }
}

impl State {
    fn on_x11_window_created(&mut self, window: X11Surface, override_redirect: bool) {
        let parent = window
            .is_transient_for()
            .and_then(|parent| self.bluewm.windows.find_x11_by_window_id(parent));
        let kind = SurfaceKind::Compat(CompatSurface {
            window_id: window.window_id(),
            override_redirect,
            parent,
        });
        let identifier = x11_identifier(&window);

        match self
            .bluewm
            .session
            .surface_created(kind, identifier.as_deref())
        {
            Ok(id) => self.bluewm.windows.insert(id, ClientWindow::X11(window)),
            Err(err) => {
                warn!("rejecting new X11 window: {err}");
                if let Err(err) = window.close() {
                    debug!("error closing X11 window: {err:?}");
                }
            }
        }
    }

    fn on_x11_configured(&mut self, window: &X11Surface, geometry: Rectangle<i32, Logical>) {
        let Some(id) = self.bluewm.windows.find_x11(window) else {
            return;
        };

        lock(&self.bluewm.session.shell).on_surface_configured(id, geometry);
        self.refresh_pointer_contents();
        self.bluewm.queue_redraw_all();
    }
}

impl XwmHandler for State {
    fn xwm_state(&mut self, _xwm: XwmId) -> &mut X11Wm {
        self.bluewm
            .xwm
            .as_mut()
            .expect("X11 events only arrive once the window manager runs")
    }

    fn new_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.on_x11_window_created(window, false);
    }

    fn new_override_redirect_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.on_x11_window_created(window, true);
    }

    fn map_window_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Err(err) = window.set_mapped(true) {
            warn!("error mapping X11 window: {err:?}");
            return;
        }

        let geometry = window.geometry();
        if let Err(err) = window.configure(Some(geometry)) {
            debug!("error configuring X11 window: {err:?}");
        }
        self.on_x11_configured(&window, geometry);
    }

    fn mapped_override_redirect_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.on_x11_configured(&window, window.geometry());
    }

    fn unmapped_window(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(id) = self.bluewm.windows.find_x11(&window) {
            if self.bluewm.session.surface_unmapped(id) {
                self.bluewm.flush_configures();
                self.sync_keyboard_focus();
                self.bluewm.queue_redraw_all();
            }
        }

        if !window.is_override_redirect() {
            if let Err(err) = window.set_mapped(false) {
                debug!("error unmapping X11 window: {err:?}");
            }
        }
    }

    fn destroyed_window(&mut self, _xwm: XwmId, window: X11Surface) {
        let Some(id) = self.bluewm.windows.find_x11(&window) else {
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

    fn configure_request(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        x: Option<i32>,
        y: Option<i32>,
        w: Option<u32>,
        h: Option<u32>,
        _reorder: Option<Reorder>,
    ) {
        let geometry = requested_geometry(window.geometry(), x, y, w, h);
        if let Err(err) = window.configure(Some(geometry)) {
            debug!("error configuring X11 window: {err:?}");
            return;
        }
        self.on_x11_configured(&window, geometry);
    }

    fn configure_notify(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        geometry: Rectangle<i32, Logical>,
        _above: Option<u32>,
    ) {
        // Only override-redirect windows move on their own.
        if window.is_override_redirect() {
            self.on_x11_configured(&window, geometry);
        }
    }

    fn property_notify(&mut self, _xwm: XwmId, window: X11Surface, property: WmWindowProperty) {
        if !matches!(property, WmWindowProperty::Title | WmWindowProperty::Class) {
            return;
        }
        let Some(id) = self.bluewm.windows.find_x11(&window) else {
            return;
        };

        let identifier = x11_identifier(&window);
        lock(&self.bluewm.session.shell).set_identifier(id, identifier.as_deref());
        self.flush_pending_placement();
    }

    fn resize_request(
        &mut self,
        _xwm: XwmId,
        _window: X11Surface,
        _button: u32,
        _resize_edge: ResizeEdge,
    ) {
    }

    fn move_request(&mut self, _xwm: XwmId, _window: X11Surface, _button: u32) {}
}

impl XWaylandShellHandler for State {
    fn xwayland_shell_state(&mut self) -> &mut XWaylandShellState {
        &mut self.bluewm.protocols.xwayland_shell
    }

    fn surface_associated(&mut self, _xwm: XwmId, _surface: WlSurface, window: X11Surface) {
        trace!("X11 window {} got its surface", window.window_id());
        self.refresh_pointer_contents();
    }
}
delegate_xwayland_shell!(State);

/// Applies the fields an X11 configure request sets.
fn requested_geometry(
    mut geometry: Rectangle<i32, Logical>,
    x: Option<i32>,
    y: Option<i32>,
    w: Option<u32>,
    h: Option<u32>,
) -> Rectangle<i32, Logical> {
    if let Some(x) = x {
        geometry.loc.x = x;
    }
    if let Some(y) = y {
        geometry.loc.y = y;
    }
    if let Some(w) = w {
        geometry.size.w = i32::try_from(w).unwrap_or(i32::MAX);
    }
    if let Some(h) = h {
        geometry.size.h = i32::try_from(h).unwrap_or(i32::MAX);
    }
    geometry
}

/// The WM class identifies X11 applications; the title is the fallback.
fn x11_identifier(window: &X11Surface) -> Option<String> {
    let class = window.class();
    if !class.is_empty() {
        return Some(class);
    }

    let title = window.title();
    (!title.is_empty()).then_some(title)
}
