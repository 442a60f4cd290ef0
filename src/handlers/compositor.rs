use smithay::backend::renderer::utils::{on_commit_buffer_handler, with_renderer_surface_state};
use smithay::desktop::{PopupKind, PopupManager};
use smithay::reexports::wayland_server::protocol::wl_buffer::WlBuffer;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::Client;
use smithay::wayland::buffer::BufferHandler;
use smithay::wayland::compositor::{
    get_parent, is_sync_subsurface, CompositorClientState, CompositorHandler, CompositorState,
};
use smithay::wayland::shm::{ShmHandler, ShmState};
use smithay::xwayland::XWaylandClientData;
use smithay::{delegate_compositor, delegate_shm};

use crate::bluewm::{initial_configure_sent, ClientState, ClientWindow, State};
use crate::shell::lock;

impl CompositorHandler for State {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.bluewm.protocols.compositor
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        if let Some(state) = client.get_data::<XWaylandClientData>() {
            return &state.compositor_state;
        }
        if let Some(state) = client.get_data::<ClientState>() {
            return &state.compositor_state;
        }
        panic!("unknown client data type")
    }

    fn commit(&mut self, surface: &WlSurface) {
        let _span = tracy_client::span!("CompositorHandler::commit");

        on_commit_buffer_handler::<Self>(surface);
        PopupManager::commit(surface);

        if is_sync_subsurface(surface) {
            return;
        }

        let mut root = surface.clone();
        while let Some(parent) = get_parent(&root) {
            root = parent;
        }

        if surface == &root && !self.on_layer_commit(surface) {
            self.on_root_commit(surface);
        }

        if let Some(PopupKind::Xdg(popup)) = self.bluewm.protocols.popups.find_popup(surface) {
            if !popup.is_initial_configure_sent() {
                if let Err(err) = popup.send_configure() {
                    warn!("error sending initial popup configure: {err:?}");
                }
            }
        }

        // Subsurface and popup content changes land on screen on the next frame.
        self.bluewm.queue_redraw_all();
    }
}
delegate_compositor!(State);

impl State {
    /// Drives the window lifecycle from commits of its root surface.
    ///
    /// The first commit with a buffer maps the window, a commit without one unmaps it.
    fn on_root_commit(&mut self, surface: &WlSurface) {
        let Some(id) = self.bluewm.windows.surface_id(surface) else {
            return;
        };

        if let Some(ClientWindow::Native(toplevel)) = self.bluewm.windows.get(id) {
            if !initial_configure_sent(toplevel) {
                toplevel.send_configure();
                return;
            }
        }

        let (has_buffer, size) = with_renderer_surface_state(surface, |state| {
            (state.buffer().is_some(), state.surface_size())
        })
        .unwrap_or((false, None));

        let session = &mut self.bluewm.session;
        if has_buffer {
            if let Some(size) = size {
                lock(&session.shell).on_surface_committed(id, size);
            }
            session.surface_mapped(id);
        } else if session.surface_unmapped(id) {
            self.sync_keyboard_focus();
        }

        // Tiled windows re-flow when one maps or unmaps.
        self.bluewm.flush_configures();
        self.refresh_pointer_contents();
    }
}

impl BufferHandler for State {
    fn buffer_destroyed(&mut self, _buffer: &WlBuffer) {}
}

impl ShmHandler for State {
    fn shm_state(&self) -> &ShmState {
        &self.bluewm.protocols.shm
    }
}
delegate_shm!(State);
