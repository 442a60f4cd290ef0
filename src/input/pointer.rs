    fn on_pointer_button(&mut self, event: I::PointerButtonEvent) {
        let Some(pointer) = self.bluewm.seat.get_pointer() else {
            return;
        };

        let serial = SERIAL_COUNTER.next_serial();
        let button_state = event.state();
        let pressed = button_state == ButtonState::Pressed;

        // Alt+drag moves windows; the client never sees those buttons.
        if !pressed && self.bluewm.session.input.end_move() {
            return;
        }
        if pressed && event.button() == Some(MouseButton::Left) && self.alt_held() {
            let grabbed = {
                let session = &mut self.bluewm.session;
                let mut shell = lock(&session.shell);
                session.input.begin_move(&mut shell)
            };
            if let Some(id) = grabbed {
                self.focus_surface(Some(id), serial);
                self.bluewm.queue_redraw_all();
                return;
            }
        }

        // Panels and overlays take clicks without stealing window focus.
        let location = self.bluewm.session.input.pointer_location();
        let over_layer = self
            .bluewm
            .layer_surface_under(location, &[Layer::Overlay, Layer::Top])
            .is_some();

        let focused = if over_layer {
            None
        } else {
            let session = &mut self.bluewm.session;
            let mut shell = lock(&session.shell);
            session.input.on_pointer_button(pressed, &mut shell)
        };
        if let Some(id) = focused {
            self.focus_surface(Some(id), serial);
            self.bluewm.queue_redraw_all();
        }

        pointer.button(
            self,
            &ButtonEvent {
                button: event.button_code(),
                state: button_state,
                serial,
                time: event.time_msec(),
            },
        );
        pointer.frame(self);
    }

//! Pointer input event handling.

use smithay::backend::input::{
    AbsolutePositionEvent, Axis, AxisSource, ButtonState, Event, InputBackend, MouseButton,
    PointerAxisEvent, PointerButtonEvent, PointerMotionEvent,
};
use smithay::input::pointer::{
    AxisFrame, ButtonEvent, CursorImageStatus, MotionEvent, PointerHandle, RelativeMotionEvent,
};
use smithay::utils::{Point, SERIAL_COUNTER};
use smithay::wayland::shell::wlr_layer::Layer;

use super::{PointerMotion, PointerUpdate};
use crate::bluewm::State;
use crate::shell::lock;
use crate::utils::get_monotonic_time;

pub(crate) trait PointerInput<I: InputBackend> {
    fn on_pointer_motion(&mut self, event: I::PointerMotionEvent);

    fn on_pointer_motion_absolute(&mut self, event: I::PointerMotionAbsoluteEvent);

    fn on_pointer_button(&mut self, event: I::PointerButtonEvent);

    fn on_pointer_axis(&mut self, event: I::PointerAxisEvent);
}

impl<I: InputBackend> PointerInput<I> for State {
    fn on_pointer_motion(&mut self, event: I::PointerMotionEvent) {
        let relative = RelativeMotionEvent {
            delta: event.delta(),
            delta_unaccel: event.delta_unaccel(),
            utime: event.time(),
        };
        self.move_pointer(
            PointerMotion::Relative(event.delta()),
            event.time_msec(),
            Some(relative),
        );
    }

    fn on_pointer_motion_absolute(&mut self, event: I::PointerMotionAbsoluteEvent) {
        let pos = Point::from((event.x_transformed(1), event.y_transformed(1)));
        self.move_pointer(PointerMotion::Absolute(pos), event.time_msec(), None);
    }

    fn on_pointer_button(&mut self, event: I::PointerButtonEvent) {
        let Some(pointer) = self.bluewm.seat.get_pointer() else {
            return;
        };

        let serial = SERIAL_COUNTER.next_serial();
        let button_state = event.state();

        let focused = {
            let session = &mut self.bluewm.session;
            let mut shell = lock(&session.shell);
            session
                .input
                .on_pointer_button(button_state == ButtonState::Pressed, &mut shell)
        };
        if let Some(id) = focused {
            self.focus_surface(Some(id), serial);
            self.bluewm.queue_redraw_all();
        }

        pointer.button(
            self,
            &ButtonEvent {
                button: event.button_code(),
                state: button_state,
                serial,
                time: event.time_msec(),
            },
        );
        pointer.frame(self);
    }

    fn on_pointer_axis(&mut self, event: I::PointerAxisEvent) {
        let Some(pointer) = self.bluewm.seat.get_pointer() else {
            return;
        };

        let source = event.source();

        let horizontal_amount_v120 = event.amount_v120(Axis::Horizontal);
        let vertical_amount_v120 = event.amount_v120(Axis::Vertical);

        // Discrete-only devices report v120 steps, 15 px each.
        let horizontal_amount = event
            .amount(Axis::Horizontal)
            .unwrap_or_else(|| horizontal_amount_v120.unwrap_or(0.) / 120. * 15.);
        let vertical_amount = event
            .amount(Axis::Vertical)
            .unwrap_or_else(|| vertical_amount_v120.unwrap_or(0.) / 120. * 15.);

        let mut frame = AxisFrame::new(event.time_msec()).source(source);
        if horizontal_amount != 0.0 {
            frame = frame
                .relative_direction(Axis::Horizontal, event.relative_direction(Axis::Horizontal));
            frame = frame.value(Axis::Horizontal, horizontal_amount);
            if let Some(v120) = horizontal_amount_v120 {
                frame = frame.v120(Axis::Horizontal, v120 as i32);
            }
        }
        if vertical_amount != 0.0 {
            frame =
                frame.relative_direction(Axis::Vertical, event.relative_direction(Axis::Vertical));
            frame = frame.value(Axis::Vertical, vertical_amount);
            if let Some(v120) = vertical_amount_v120 {
                frame = frame.v120(Axis::Vertical, v120 as i32);
            }
        }

        if source == AxisSource::Finger {
            if event.amount(Axis::Horizontal) == Some(0.0) {
                frame = frame.stop(Axis::Horizontal);
            }
            if event.amount(Axis::Vertical) == Some(0.0) {
                frame = frame.stop(Axis::Vertical);
            }
        }

        pointer.axis(self, frame);
        pointer.frame(self);
    }
}

impl State {
    fn move_pointer(
        &mut self,
        motion: PointerMotion,
        time: u32,
        relative: Option<RelativeMotionEvent>,
    ) {
        let Some(pointer) = self.bluewm.seat.get_pointer() else {
            return;
        };

        let update = {
            let session = &mut self.bluewm.session;
            let mut shell = lock(&session.shell);
            session
                .input
                .on_pointer_motion(motion, &session.outputs, &mut shell)
        };
        let Some(update) = update else {
            return;
        };

        if self.bluewm.session.input.is_moving() {
            self.bluewm.flush_configures();
        } else {
            self.notify_pointer(&pointer, update, time, relative);
        }

        // Redraw to update the cursor position.
        self.bluewm.queue_redraw_all();
    }

    fn alt_held(&self) -> bool {
        self.bluewm
            .seat
            .get_keyboard()
            .is_some_and(|keyboard| keyboard.modifier_state().alt)
    }

    /// Re-runs the hit test after windows moved under a stationary pointer.
    pub fn refresh_pointer_contents(&mut self) {
        let Some(pointer) = self.bluewm.seat.get_pointer() else {
            return;
        };

        let update = {
            let session = &mut self.bluewm.session;
            let shell = lock(&session.shell);
            session.input.refresh_pointer_focus(&shell)
        };

        let time = get_monotonic_time().as_millis() as u32;
        self.notify_pointer(&pointer, update, time, None);
    }

    fn notify_pointer(
        &mut self,
        pointer: &PointerHandle<State>,
        update: PointerUpdate,
        time: u32,
        relative: Option<RelativeMotionEvent>,
    ) {
        let location = update.location;
        let focus = self
            .bluewm
            .layer_surface_under(location, &[Layer::Overlay, Layer::Top])
            .or_else(|| {
                update.under.and_then(|(id, origin)| {
                    self.bluewm
                        .windows
                        .wl_surface(id)
                        .map(|surface| (surface, origin))
                })
            })
            .or_else(|| {
                self.bluewm
                    .layer_surface_under(location, &[Layer::Bottom, Layer::Background])
            });

        if focus.is_none() {
            self.bluewm
                .cursor
                .set_cursor_image(CursorImageStatus::default_named());
        }

        let serial = SERIAL_COUNTER.next_serial();
        pointer.motion(
            self,
            focus.clone(),
            &MotionEvent {
                location,
                serial,
                time,
            },
        );
        if let Some(relative) = relative {
            pointer.relative_motion(self, focus, &relative);
        }
        pointer.frame(self);
    }
}
