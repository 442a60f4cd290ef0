//! Smithay protocol state container.

use smithay::desktop::PopupManager;
use smithay::input::SeatState;
use smithay::reexports::wayland_protocols::xdg::shell::server::xdg_toplevel::WmCapabilities;
use smithay::reexports::wayland_server::protocol::wl_shm;
use smithay::reexports::wayland_server::DisplayHandle;
use smithay::wayland::compositor::CompositorState;
use smithay::wayland::dmabuf::DmabufState;
use smithay::wayland::output::OutputManagerState;
use smithay::wayland::selection::data_device::DataDeviceState;
use smithay::wayland::shell::wlr_layer::WlrLayerShellState;
use smithay::wayland::shell::xdg::decoration::XdgDecorationState;
use smithay::wayland::shell::xdg::XdgShellState;
use smithay::wayland::shm::ShmState;
use smithay::wayland::xwayland_shell::XWaylandShellState;

use super::State;
use crate::protocols::gamma_control::GammaControlManagerState;

/// Globals advertised to clients.
///
/// Created once in `Bluewm::new`. Dmabuf feedback is filled in by the backend once a renderer
/// exists.
pub struct ProtocolStates {
    pub compositor: CompositorState,
    pub xdg_shell: XdgShellState,
    pub xdg_decoration: XdgDecorationState,
    pub layer_shell: WlrLayerShellState,
    pub shm: ShmState,
    pub output_manager: OutputManagerState,
    pub dmabuf: DmabufState,
    pub seat: SeatState<State>,
    pub data_device: DataDeviceState,
    pub xwayland_shell: XWaylandShellState,
    pub gamma_control: GammaControlManagerState,
    pub popups: PopupManager,
}

impl ProtocolStates {
    pub fn new(display_handle: &DisplayHandle) -> Self {
        let compositor = CompositorState::new_v6::<State>(display_handle);
        let xdg_shell = XdgShellState::new_with_capabilities::<State>(
            display_handle,
            [WmCapabilities::Fullscreen, WmCapabilities::Maximize],
        );
        let xdg_decoration = XdgDecorationState::new::<State>(display_handle);
        let layer_shell = WlrLayerShellState::new::<State>(display_handle);
        let shm = ShmState::new::<State>(
            display_handle,
            vec![wl_shm::Format::Xbgr8888, wl_shm::Format::Abgr8888],
        );
        let output_manager = OutputManagerState::new_with_xdg_output::<State>(display_handle);
        let seat = SeatState::new();
        let data_device = DataDeviceState::new::<State>(display_handle);
        let xwayland_shell = XWaylandShellState::new::<State>(display_handle);
        let gamma_control = GammaControlManagerState::new::<State, _>(display_handle, |_| true);

        Self {
            compositor,
            xdg_shell,
            xdg_decoration,
            layer_shell,
            shm,
            output_manager,
            dmabuf: DmabufState::new(),
            seat,
            data_device,
            xwayland_shell,
            gamma_control,
            popups: PopupManager::default(),
        }
    }
}
