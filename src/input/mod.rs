//! Input routing.
//!
//! [`InputRouter`] holds the seat bookkeeping that does not depend on smithay types: attached
//! devices, capability flags, pointer location and focus. The `State` side of the module
//! translates backend events into router calls and forwards the results to the smithay seat.

use std::collections::HashMap;

use bitflags::bitflags;
use smithay::backend::input::InputEvent;
use smithay::utils::{Logical, Point};

use crate::bluewm::State;
use crate::outputs::OutputManager;
use crate::shell::Shell;
use crate::surfaces::SurfaceId;

mod device;
mod keyboard;
mod pointer;

use device::DeviceInput;
use keyboard::KeyboardInput;
use pointer::PointerInput;

pub use keyboard::add_keyboard;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeatCapabilities: u8 {
        const KEYBOARD = 1;
        const POINTER = 1 << 1;
    }
}

/// Capabilities before and after a device attach or detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityChange {
    pub before: SeatCapabilities,
    pub after: SeatCapabilities,
}

impl CapabilityChange {
    pub fn added(&self) -> SeatCapabilities {
        self.after - self.before
    }

    pub fn removed(&self) -> SeatCapabilities {
        self.before - self.after
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerMotion {
    Relative(Point<f64, Logical>),
    /// Position normalized to `[0, 1]` on both axes.
    Absolute(Point<f64, Logical>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerUpdate {
    pub location: Point<f64, Logical>,
    /// Surface under the pointer and its origin in global coordinates.
    pub under: Option<(SurfaceId, Point<f64, Logical>)>,
}

/// A window following the pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MoveGrab {
    surface: SurfaceId,
    /// Pointer position relative to the window origin when the grab started.
    offset: Point<f64, Logical>,
}

#[derive(Debug, Default)]
pub struct InputRouter {
    /// Attached devices by backend id.
    devices: HashMap<String, SeatCapabilities>,
    keyboards: usize,
    /// Pointer capability stays once any pointer has been attached.
    pointer_seen: bool,
    pointer_location: Point<f64, Logical>,
    pointer_focus: Option<SurfaceId>,
    keyboard_focus: Option<SurfaceId>,
    move_grab: Option<MoveGrab>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(&self) -> SeatCapabilities {
        let mut caps = SeatCapabilities::empty();
        if self.keyboards > 0 {
            caps |= SeatCapabilities::KEYBOARD;
        }
        if self.pointer_seen {
            caps |= SeatCapabilities::POINTER;
        }
        caps
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Records a new device.
    ///
    /// Returns `None` for devices that are neither keyboards nor pointers, and for devices that
    /// are already attached.
    pub fn on_device_added(&mut self, id: &str, caps: SeatCapabilities) -> Option<CapabilityChange> {
        let caps = caps & SeatCapabilities::all();
        if caps.is_empty() {
            debug!("ignoring input device {id}: not a keyboard or pointer");
            return None;
        }
        if self.devices.contains_key(id) {
            return None;
        }

        let before = self.capabilities();
        self.devices.insert(id.to_owned(), caps);
        if caps.contains(SeatCapabilities::KEYBOARD) {
            self.keyboards += 1;
        }
        if caps.contains(SeatCapabilities::POINTER) {
            self.pointer_seen = true;
        }

        Some(CapabilityChange {
            before,
            after: self.capabilities(),
        })
    }

    pub fn on_device_removed(&mut self, id: &str) -> Option<CapabilityChange> {
        let before = self.capabilities();
        let caps = self.devices.remove(id)?;
        if caps.contains(SeatCapabilities::KEYBOARD) {
            self.keyboards -= 1;
        }

        Some(CapabilityChange {
            before,
            after: self.capabilities(),
        })
    }

    pub fn pointer_location(&self) -> Point<f64, Logical> {
        self.pointer_location
    }

    pub fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer_focus
    }

    pub fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    /// Moves the pointer, keeping it inside the output layout.
    ///
    /// A window being moved follows the pointer. Returns `None` when there are no outputs to move
    /// over.
    pub fn on_pointer_motion(
        &mut self,
        motion: PointerMotion,
        outputs: &OutputManager,
        shell: &mut Shell,
    ) -> Option<PointerUpdate> {
        let bounds = outputs.layout_bounds()?.to_f64();

        let target = match motion {
            PointerMotion::Relative(delta) => self.pointer_location + delta,
            PointerMotion::Absolute(pos) => {
                bounds.loc
                    + Point::from((
                        pos.x.clamp(0., 1.) * bounds.size.w,
                        pos.y.clamp(0., 1.) * bounds.size.h,
                    ))
            }
        };

        self.pointer_location = outputs.clamp_to_layout(target);

        if let Some(grab) = self.move_grab {
            let loc = (self.pointer_location - grab.offset).to_i32_round();
            if !shell.move_window(grab.surface, loc) {
                self.move_grab = None;
            }
        }

        Some(self.refresh_pointer_focus(shell))
    }

    /// Re-runs the hit test at the current pointer location.
    pub fn refresh_pointer_focus(&mut self, shell: &Shell) -> PointerUpdate {
        let location = self.pointer_location;
        let under = shell
            .surface_under(location)
            .map(|(id, rel)| (id, location - rel));
        self.pointer_focus = under.map(|(id, _)| id);

        PointerUpdate { location, under }
    }

    /// Focus-follows-click: a press raises the window under the pointer and focuses it.
    ///
    /// Returns the newly focused surface.
    pub fn on_pointer_button(&mut self, pressed: bool, shell: &mut Shell) -> Option<SurfaceId> {
        if !pressed {
            return None;
        }

        let (id, _) = shell.surface_under(self.pointer_location)?;
        if !shell.surface(id)?.kind.is_managed() {
            return None;
        }
        shell.raise(id);
        self.keyboard_focus = Some(id);
        Some(id)
    }

    /// Starts moving the window under the pointer, raising and focusing it like a click.
    pub fn begin_move(&mut self, shell: &mut Shell) -> Option<SurfaceId> {
        let (id, offset) = shell.surface_under(self.pointer_location)?;
        if !shell.surface(id)?.kind.is_managed() {
            return None;
        }

        shell.raise(id);
        self.keyboard_focus = Some(id);
        self.move_grab = Some(MoveGrab {
            surface: id,
            offset,
        });
        Some(id)
    }

    /// Returns `true` if a move was in progress.
    pub fn end_move(&mut self) -> bool {
        self.move_grab.take().is_some()
    }

    pub fn is_moving(&self) -> bool {
        self.move_grab.is_some()
    }

    pub fn set_keyboard_focus(&mut self, id: Option<SurfaceId>) {
        self.keyboard_focus = id;
    }

    /// Drops every reference to a surface that was unmapped or destroyed.
    ///
    /// Returns `true` if it had keyboard focus.
    pub fn on_surface_gone(&mut self, id: SurfaceId) -> bool {
        if self.move_grab.is_some_and(|grab| grab.surface == id) {
            self.move_grab = None;
        }
        if self.pointer_focus == Some(id) {
            self.pointer_focus = None;
        }
        if self.keyboard_focus == Some(id) {
            self.keyboard_focus = None;
            return true;
        }
        false
    }

    /// Clients may only change the cursor image while they have pointer focus.
    pub fn can_set_cursor(&self, requester: Option<SurfaceId>) -> bool {
        requester.is_some() && requester == self.pointer_focus
    }
}

impl State {
    pub fn process_input_event<I: smithay::backend::input::InputBackend>(
        &mut self,
        event: InputEvent<I>,
    ) {
        let _span = tracy_client::span!("process_input_event");

        match event {
            InputEvent::DeviceAdded { device } => DeviceInput::on_device_added(self, device),
            InputEvent::DeviceRemoved { device } => DeviceInput::on_device_removed(self, device),
            InputEvent::Keyboard { event } => KeyboardInput::<I>::on_keyboard(self, event),
            InputEvent::PointerMotion { event } => {
                PointerInput::<I>::on_pointer_motion(self, event)
            }
            InputEvent::PointerMotionAbsolute { event } => {
                PointerInput::<I>::on_pointer_motion_absolute(self, event)
            }
            InputEvent::PointerButton { event } => {
                PointerInput::<I>::on_pointer_button(self, event)
            }
            InputEvent::PointerAxis { event } => PointerInput::<I>::on_pointer_axis(self, event),
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests;
