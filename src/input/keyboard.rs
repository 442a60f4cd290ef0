//! Keyboard input event handling.

use smithay::backend::input::{Event, InputBackend, KeyState, KeyboardKeyEvent};
use smithay::input::keyboard::{FilterResult, Keysym, ModifiersState, XkbConfig};
use smithay::input::Seat;
use smithay::utils::SERIAL_COUNTER;

use crate::bluewm::State;

pub(crate) trait KeyboardInput<I: InputBackend> {
    fn on_keyboard(&mut self, event: I::KeyboardKeyEvent);
}

/// Compositor key bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ChangeVt(i32),
    ToggleTiling,
    Quit,
}

impl<I: InputBackend> KeyboardInput<I> for State {
    fn on_keyboard(&mut self, event: I::KeyboardKeyEvent) {
        let Some(keyboard) = self.bluewm.seat.get_keyboard() else {
            return;
        };

        let serial = SERIAL_COUNTER.next_serial();
        let time = Event::time_msec(&event);
        let pressed = event.state() == KeyState::Pressed;

        // Bound keys are intercepted both ways so that clients never see half a key press.
        let Some(action) = keyboard.input(
            self,
            event.key_code(),
            event.state(),
            serial,
            time,
            |_, modifiers, keysym| match action_for(modifiers, keysym.modified_sym()) {
                Some(action) => FilterResult::Intercept(action),
                None => FilterResult::Forward,
            },
        ) else {
            return;
        };

        if !pressed {
            return;
        }

        debug!("key binding: {action:?}");
        match action {
            Action::ChangeVt(vt) => self.backend.change_vt(vt),
            Action::ToggleTiling => self.bluewm.toggle_tiling(),
            Action::Quit => self.bluewm.shutdown(),
        }
    }
}

pub fn action_for(modifiers: &ModifiersState, keysym: Keysym) -> Option<Action> {
    let raw = keysym.raw();
    let first = Keysym::XF86_Switch_VT_1.raw();
    let last = Keysym::XF86_Switch_VT_12.raw();
    if (first..=last).contains(&raw) {
        return Some(Action::ChangeVt((raw - first + 1) as i32));
    }

    if !modifiers.ctrl || modifiers.alt || modifiers.logo {
        return None;
    }
    if keysym == Keysym::Return {
        Some(Action::ToggleTiling)
    } else if keysym == Keysym::q || keysym == Keysym::Q {
        Some(Action::Quit)
    } else {
        None
    }
}

/// Gives the seat a keyboard with the configured keymap and repeat settings.
///
/// Falls back to the default keymap if the configured one does not compile. If that fails too,
/// the seat stays without a keyboard.
pub fn add_keyboard(seat: &mut Seat<State>, config: &bluewm_config::Keyboard) {
    let delay = i32::from(config.repeat_delay);
    let rate = i32::from(config.repeat_rate);

    let xkb = &config.xkb;
    let configured = XkbConfig {
        rules: &xkb.rules,
        model: &xkb.model,
        layout: &xkb.layout,
        variant: &xkb.variant,
        options: xkb.options.clone(),
    };

    match seat.add_keyboard(configured, delay, rate) {
        Ok(_) => return,
        Err(err) => warn!("error loading the configured keymap, using the default: {err:?}"),
    }

    if let Err(err) = seat.add_keyboard(XkbConfig::default(), delay, rate) {
        error!("error loading the default keymap, keyboard input is unavailable: {err:?}");
    }
}
