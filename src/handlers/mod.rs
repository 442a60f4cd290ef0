//! Smithay protocol handlers.
//!
//! Every handler here only translates protocol events into [`Session`](crate::session::Session)
//! calls and applies the results back to the protocol objects.

mod compositor;
mod layer_shell;
mod xdg_shell;
mod xwayland;

use anyhow::Context;
use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::input::pointer::CursorImageStatus;
use smithay::input::{Seat, SeatHandler, SeatState};
use smithay::output::Output;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::Resource;
use smithay::wayland::dmabuf::{DmabufGlobal, DmabufHandler, DmabufState, ImportNotifier};
use smithay::wayland::output::OutputHandler;
use smithay::wayland::selection::data_device::{
    set_data_device_focus, ClientDndGrabHandler, DataDeviceHandler, DataDeviceState,
    ServerDndGrabHandler,
};
use smithay::wayland::selection::SelectionHandler;
use smithay::{delegate_data_device, delegate_dmabuf, delegate_output, delegate_seat};

use crate::bluewm::State;
use crate::delegate_gamma_control;
use crate::protocols::gamma_control::{GammaControlHandler, GammaControlManagerState};
use crate::surfaces::SurfaceId;

impl SeatHandler for State {
    type KeyboardFocus = WlSurface;
    type PointerFocus = WlSurface;
    type TouchFocus = WlSurface;

    fn seat_state(&mut self) -> &mut SeatState<State> {
        &mut self.bluewm.protocols.seat
    }

    fn cursor_image(&mut self, _seat: &Seat<Self>, image: CursorImageStatus) {
        let requester = self.cursor_requester(&image);
        let allowed = self.bluewm.session.input.can_set_cursor(requester)
            || self.layer_has_pointer(&image);
        if !allowed {
            trace!("ignoring cursor request from a client without pointer focus");
            return;
        }

        self.bluewm.cursor.set_cursor_image(image);
        self.bluewm.queue_redraw_all();
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&WlSurface>) {
        let dh = &self.bluewm.display_handle;
        let client = focused.and_then(|surface| dh.get_client(surface.id()).ok());
        set_data_device_focus(dh, seat, client);
    }
}
delegate_seat!(State);

impl State {
    /// Which window a cursor request comes from.
    ///
    /// Cursor surfaces are matched by client against the pointer focus. Named and hidden
    /// images can only arrive through the focused client's pointer.
    fn cursor_requester(&self, image: &CursorImageStatus) -> Option<SurfaceId> {
        let focus = self.bluewm.session.input.pointer_focus()?;

        match image {
            CursorImageStatus::Surface(surface) => {
                let focus_client = self.bluewm.windows.wl_surface(focus)?.client();
                (surface.client() == focus_client).then_some(focus)
            }
            _ => Some(focus),
        }
    }

    /// Layer surfaces under the pointer may set the cursor too.
    fn layer_has_pointer(&self, image: &CursorImageStatus) -> bool {
        let Some(focus) = self
            .bluewm
            .seat
            .get_pointer()
            .and_then(|pointer| pointer.current_focus())
        else {
            return false;
        };
        if self.bluewm.layer_output(&focus).is_none() {
            return false;
        }

        match image {
            CursorImageStatus::Surface(surface) => surface.client() == focus.client(),
            _ => true,
        }
    }
}

impl SelectionHandler for State {
    type SelectionUserData = ();
}

impl DataDeviceHandler for State {
    fn data_device_state(&self) -> &DataDeviceState {
        &self.bluewm.protocols.data_device
    }
}

impl ClientDndGrabHandler for State {}
impl ServerDndGrabHandler for State {}

delegate_data_device!(State);

impl OutputHandler for State {}
delegate_output!(State);

impl DmabufHandler for State {
    fn dmabuf_state(&mut self) -> &mut DmabufState {
        &mut self.bluewm.protocols.dmabuf
    }

    fn dmabuf_imported(
        &mut self,
        _global: &DmabufGlobal,
        dmabuf: Dmabuf,
        notifier: ImportNotifier,
    ) {
        if self.backend.import_dmabuf(&dmabuf) {
            let _ = notifier.successful::<State>();
        } else {
            notifier.failed();
        }
    }
}
delegate_dmabuf!(State);

impl GammaControlHandler for State {
    fn gamma_control_manager_state(&mut self) -> &mut GammaControlManagerState {
        &mut self.bluewm.protocols.gamma_control
    }

    fn gamma_size(&mut self, output: &Output) -> Option<u32> {
        let id = self.bluewm.output_id(output)?;
        let size = self.bluewm.session.outputs.get(id)?.gamma_size()?;
        u32::try_from(size).ok()
    }

    fn set_gamma(&mut self, output: &Output, ramp: Option<Vec<u16>>) -> anyhow::Result<()> {
        let id = self.bluewm.output_id(output).context("output is gone")?;
        self.bluewm
            .session
            .outputs
            .set_client_gamma(id, ramp, &mut self.backend)
    }
}
delegate_gamma_control!(State);
