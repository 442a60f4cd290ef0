//! Control API.
//!
//! [`ControlApi`] is a cheap handle that can be cloned into any thread. Every call takes the shell
//! lock once and releases it before returning. Requests that must reach a client or the hardware
//! are queued on the shell and the event loop is woken up to flush them.

use bluewm_ipc::MoveResizeOutcome;
use calloop::ping::Ping;
use smithay::utils::{Point, Rectangle, Size};

use crate::outputs::{clamp_brightness, IpcOutputs};
use crate::shell::{lock, MoveResize, SharedShell};

/// How `move_resize` treats identifiers that match nothing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Unknown identifiers are ignored.
    #[default]
    Native,
    /// Unknown identifiers get a placeholder that the first matching window adopts.
    Offline,
}

#[derive(Debug, Clone)]
pub struct ControlApi {
    shell: SharedShell,
    ipc_outputs: IpcOutputs,
    wake: Option<Ping>,
    mode: ControlMode,
}

impl ControlApi {
    pub fn new(
        shell: SharedShell,
        ipc_outputs: IpcOutputs,
        wake: Option<Ping>,
        mode: ControlMode,
    ) -> Self {
        Self {
            shell,
            ipc_outputs,
            wake,
            mode,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Moves the first window matching `identifier` to `(x, y)` and asks it to resize.
    ///
    /// Sizes below one pixel are raised to one.
    pub fn move_resize(
        &self,
        identifier: &str,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> MoveResizeOutcome {
        let geometry = Rectangle::new(
            Point::from((x, y)),
            Size::from((width.max(1), height.max(1))),
        );

        let outcome = {
            let mut shell = lock(&self.shell);
            shell.move_resize(identifier, geometry, self.mode == ControlMode::Offline)
        };

        match outcome {
            MoveResize::Moved(id) => {
                debug!("moved {id} ({identifier:?}) to {geometry:?}");
                self.wake();
                MoveResizeOutcome::Moved
            }
            MoveResize::Placeholder => MoveResizeOutcome::Placeholder,
            MoveResize::NotFound => {
                debug!("move_resize: no window matches {identifier:?}");
                MoveResizeOutcome::NotFound
            }
        }
    }

    /// Requests a new global brightness and returns the clamped value.
    pub fn set_brightness(&self, value: f64) -> f64 {
        let value = clamp_brightness(value);
        lock(&self.shell).request_brightness(value);
        self.wake();
        value
    }

    pub fn monitor_count(&self) -> usize {
        lock(&self.shell).scene().outputs().len()
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        lock(&self.shell).find(identifier).is_some()
    }

    pub fn outputs(&self) -> Vec<bluewm_ipc::Output> {
        match self.ipc_outputs.lock() {
            Ok(outputs) => outputs.clone(),
            Err(err) => err.into_inner().clone(),
        }
    }

    pub fn surfaces(&self) -> Vec<bluewm_ipc::Surface> {
        let shell = lock(&self.shell);
        shell
            .surfaces()
            .iter()
            .map(|surface| bluewm_ipc::Surface {
                identifier: surface.identifier().to_owned(),
                is_x11: surface.kind.is_compat(),
                mapped: surface.is_mapped(),
                x: surface.loc.x,
                y: surface.loc.y,
                requested_size: surface.requested_size.map(|size| (size.w, size.h)),
            })
            .collect()
    }

    fn wake(&self) {
        if let Some(ping) = &self.wake {
            ping.ping();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::outputs::OutputId;
    use crate::shell::Shell;
    use crate::surfaces::{NativeSurface, SurfaceKind};

    fn control(mode: ControlMode) -> ControlApi {
        let shell = Shell::default().into_shared();
        ControlApi::new(shell, Arc::new(Mutex::new(Vec::new())), None, mode)
    }

    fn add_window(control: &ControlApi, identifier: &str) {
        let mut shell = lock(&control.shell);
        let kind = SurfaceKind::Native(NativeSurface::default());
        let id = shell.on_surface_created(kind, Some(identifier)).unwrap();
        shell.on_surface_mapped(id);
    }

    #[test]
    fn move_resize_by_substring() {
        let control = control(ControlMode::Native);
        add_window(&control, "firefox-browser");

        assert_eq!(
            control.move_resize("fire", 10, 20, 800, 600),
            MoveResizeOutcome::Moved
        );

        let surfaces = control.surfaces();
        assert_eq!(surfaces.len(), 1);
        assert_eq!((surfaces[0].x, surfaces[0].y), (10, 20));
        assert_eq!(surfaces[0].requested_size, Some((800, 600)));
        assert!(lock(&control.shell).has_pending());
    }

    #[test]
    fn unknown_identifier_is_ignored_in_native_mode() {
        let control = control(ControlMode::Native);
        add_window(&control, "foot");
        let before = control.surfaces();

        assert_eq!(
            control.move_resize("nonexistent", 1, 2, 3, 4),
            MoveResizeOutcome::NotFound
        );
        assert_eq!(control.surfaces(), before);
        assert!(!control.is_running("nonexistent"));

        let shell = lock(&control.shell);
        assert!(shell.surfaces().placeholders().is_empty());
        assert!(!shell.has_pending());
    }

    #[test]
    fn offline_mode_records_placeholders() {
        let control = control(ControlMode::Offline);

        assert_eq!(
            control.move_resize("term", 5, 5, 640, 480),
            MoveResizeOutcome::Placeholder
        );
        assert!(!control.is_running("term"));

        add_window(&control, "my-term");
        assert!(control.is_running("term"));
        let surfaces = control.surfaces();
        assert_eq!((surfaces[0].x, surfaces[0].y), (5, 5));
        assert_eq!(surfaces[0].requested_size, Some((640, 480)));
    }

    #[test]
    fn degenerate_sizes_are_raised() {
        let control = control(ControlMode::Native);
        add_window(&control, "foot");

        control.move_resize("foot", 0, 0, 0, -10);
        assert_eq!(control.surfaces()[0].requested_size, Some((1, 1)));
    }

    #[test]
    fn brightness_is_clamped_and_queued() {
        let control = control(ControlMode::Native);

        assert_abs_diff_eq!(control.set_brightness(-5.), 0.1);
        assert_abs_diff_eq!(control.set_brightness(3.), 1.);

        let pending = lock(&control.shell).take_pending();
        assert_eq!(pending.brightness, Some(1.));
    }

    #[test]
    fn monitor_count_follows_scene_outputs() {
        let control = control(ControlMode::Native);
        assert_eq!(control.monitor_count(), 0);

        let geometry = Rectangle::new(Point::from((0, 0)), Size::from((10, 10)));
        lock(&control.shell)
            .scene_mut()
            .add_output(OutputId::next(), geometry);
        assert_eq!(control.monitor_count(), 1);
    }

    #[test]
    fn callable_from_other_threads() {
        let control = control(ControlMode::Native);
        add_window(&control, "firefox-browser");

        thread::scope(|s| {
            for i in 0..4 {
                let control = control.clone();
                s.spawn(move || {
                    control.move_resize("firefox", i, i, 100, 100);
                    assert!(control.is_running("firefox"));
                });
            }
        });

        let surfaces = control.surfaces();
        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].requested_size, Some((100, 100)));
    }
}
