//! Output lifecycle on the Wayland side.

use std::time::Duration;

use anyhow::Context;
use calloop::timer::{TimeoutAction, Timer};
use smithay::output::{Mode, Output, PhysicalProperties, Scale, Subpixel};
use smithay::utils::Transform;

use super::{Bluewm, OutputState, RedrawState};
use crate::outputs::{OutputBackend, OutputDescriptor, OutputId};

impl Bluewm {
    /// Adds an output to the session and advertises it to clients.
    ///
    /// On error the output is not tracked and nothing is advertised.
    pub fn add_output(
        &mut self,
        id: OutputId,
        desc: OutputDescriptor,
        backend: &mut dyn OutputBackend,
    ) -> anyhow::Result<Output> {
        let physical = PhysicalProperties {
            size: (desc.physical_size.w, desc.physical_size.h).into(),
            subpixel: Subpixel::Unknown,
            make: desc.make.clone(),
            model: desc.model.clone(),
            serial_number: String::new(),
        };
        let name = desc.name.clone();

        self.session.add_output(id, desc, backend)?;
        let managed = self
            .session
            .outputs
            .get(id)
            .context("output vanished right after it was added")?;
        let mode = managed.mode();

        let output = Output::new(name, physical);
        output.change_current_state(
            Some(mode),
            Some(Transform::Normal),
            Some(Scale::Integer(1)),
            Some(managed.geometry().loc),
        );
        output.set_preferred(mode);

        let global = output.create_global::<super::State>(&self.display_handle);

        let state = OutputState {
            output: output.clone(),
            global,
            redraw_state: RedrawState::Idle,
            frame_callback_sequence: 0,
            refresh_interval: refresh_interval(mode),
        };
        self.outputs.insert(id, state);

        self.reposition_outputs();
        self.refresh_tile_area();
        self.queue_redraw(id);

        Ok(output)
    }

    pub fn remove_output(&mut self, id: OutputId) {
        if !self.session.remove_output(id) {
            return;
        }

        self.remove_output_global(id);
        self.reposition_outputs();
        self.refresh_tile_area();
        self.queue_redraw_all();
    }

    /// Drops the protocol side of an output the session already forgot.
    pub(super) fn remove_output_global(&mut self, id: OutputId) {
        let Some(state) = self.outputs.remove(&id) else {
            return;
        };

        self.close_layer_surfaces(&state.output);
        self.protocols.gamma_control.output_removed(&state.output);

        match state.redraw_state {
            RedrawState::WaitingForEstimatedVBlank(token)
            | RedrawState::WaitingForEstimatedVBlankAndQueued(token) => {
                self.event_loop.remove(token)
            }
            _ => (),
        }

        // Disable the output global and remove some time later to give the clients some time to
        // process it.
        let global = state.global;
        self.display_handle.disable_global::<super::State>(global.clone());
        let res = self.event_loop.insert_source(
            Timer::from_duration(Duration::from_secs(10)),
            move |_, _, state| {
                state
                    .bluewm
                    .display_handle
                    .remove_global::<super::State>(global.clone());
                TimeoutAction::Drop
            },
        );
        if let Err(err) = res {
            warn!("error scheduling output global removal: {err}");
        }
    }

    /// Pushes the session layout to the smithay outputs.
    fn reposition_outputs(&mut self) {
        for managed in self.session.outputs.iter() {
            let Some(state) = self.outputs.get(&managed.id()) else {
                continue;
            };
            let loc = managed.geometry().loc;
            if state.output.current_location() != loc {
                debug!("moving output {} to {loc:?}", managed.name());
                state
                    .output
                    .change_current_state(None, None, None, Some(loc));
            }
        }
    }
}

pub fn refresh_interval(mode: Mode) -> Option<Duration> {
    u64::try_from(mode.refresh)
        .ok()
        .filter(|refresh| *refresh > 0)
        .map(|refresh| Duration::from_nanos(1_000_000_000_000 / refresh))
}

#[cfg(test)]
mod tests {
    use smithay::utils::Size;

    use super::*;

    #[test]
    fn refresh_interval_from_millihertz() {
        let mode = Mode {
            size: Size::from((1920, 1080)),
            refresh: 60_000,
        };
        assert_eq!(refresh_interval(mode), Some(Duration::from_nanos(16_666_666)));

        let mode = Mode { refresh: 0, ..mode };
        assert_eq!(refresh_interval(mode), None);
    }
}
