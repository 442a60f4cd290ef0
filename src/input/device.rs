//! Input device lifecycle.

use smithay::backend::input::{Device, DeviceCapability};
use smithay::input::pointer::CursorImageStatus;

use super::{add_keyboard, CapabilityChange, SeatCapabilities};
use crate::bluewm::State;

pub(crate) trait DeviceInput {
    fn on_device_added(&mut self, device: impl Device);

    fn on_device_removed(&mut self, device: impl Device);
}

impl DeviceInput for State {
    fn on_device_added(&mut self, device: impl Device) {
        let id = device.id();
        let Some(change) = self
            .bluewm
            .session
            .input
            .on_device_added(&id, device_capabilities(&device))
        else {
            return;
        };

        debug!("input device added: {} ({id})", device.name());
        self.apply_capability_change(change);
    }

    fn on_device_removed(&mut self, device: impl Device) {
        let id = device.id();
        let Some(change) = self.bluewm.session.input.on_device_removed(&id) else {
            return;
        };

        debug!("input device removed: {} ({id})", device.name());
        self.apply_capability_change(change);
    }
}

impl State {
    fn apply_capability_change(&mut self, change: CapabilityChange) {
        let added = change.added();
        let removed = change.removed();

        if added.contains(SeatCapabilities::KEYBOARD) {
            let config = self.bluewm.config.borrow();
            add_keyboard(&mut self.bluewm.seat, &config.input.keyboard);
        }
        if removed.contains(SeatCapabilities::KEYBOARD) {
            self.bluewm.seat.remove_keyboard();
        }

        if added.contains(SeatCapabilities::POINTER) {
            self.bluewm.seat.add_pointer();
            self.bluewm
                .cursor
                .set_cursor_image(CursorImageStatus::default_named());
            self.bluewm.queue_redraw_all();
        }
    }
}

fn device_capabilities(device: &impl Device) -> SeatCapabilities {
    let mut caps = SeatCapabilities::empty();
    if device.has_capability(DeviceCapability::Keyboard) {
        caps |= SeatCapabilities::KEYBOARD;
    }
    if device.has_capability(DeviceCapability::Pointer) {
        caps |= SeatCapabilities::POINTER;
    }
    caps
}
