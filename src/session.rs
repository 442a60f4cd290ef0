//! Session context.
//!
//! [`Session`] ties the core components together: the shared shell (surfaces and scene), the
//! output manager, the input router and the control handle. It knows nothing about Wayland
//! objects; the compositor glue calls into it and applies the results to the protocol side.

use calloop::ping::Ping;

use crate::control::{ControlApi, ControlMode};
use crate::input::InputRouter;
use crate::outputs::{OutputBackend, OutputDescriptor, OutputId, OutputManager};
use crate::scene::SceneElement;
use crate::shell::{lock, PendingConfigure, SharedShell, Shell, ShellOptions};
use crate::surfaces::{RegistryError, SurfaceId, SurfaceKind};

pub struct Session {
    pub shell: SharedShell,
    pub outputs: OutputManager,
    pub input: InputRouter,
    pub control: ControlApi,
}

/// What shutdown tore down, in teardown order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Teardown {
    pub surfaces: Vec<SurfaceId>,
    pub outputs: Vec<OutputId>,
}

/// The protocol side of a shutdown.
pub trait TeardownSink {
    /// Drops the window and disconnects its client.
    fn destroy_surface(&mut self, id: SurfaceId);
    fn destroy_output(&mut self, id: OutputId);
    fn stop(&mut self);
}

impl Teardown {
    /// Releases every surface, then every output, then stops the loop.
    pub fn run(&self, sink: &mut dyn TeardownSink) {
        for id in &self.surfaces {
            sink.destroy_surface(*id);
        }
        for id in &self.outputs {
            sink.destroy_output(*id);
        }
        sink.stop();
    }
}

impl Session {
    pub fn new(config: &bluewm_config::Config, mode: ControlMode, wake: Option<Ping>) -> Self {
        let shell = Shell::new(ShellOptions::from_config(config)).into_shared();
        let outputs = OutputManager::new(config.initial_brightness());
        let control = ControlApi::new(shell.clone(), outputs.ipc_outputs(), wake, mode);

        Self {
            shell,
            outputs,
            input: InputRouter::new(),
            control,
        }
    }

    pub fn add_output(
        &mut self,
        id: OutputId,
        desc: OutputDescriptor,
        backend: &mut dyn OutputBackend,
    ) -> anyhow::Result<()> {
        let mut shell = lock(&self.shell);
        self.outputs
            .on_output_added(id, desc, backend, shell.scene_mut())
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        let mut shell = lock(&self.shell);
        self.outputs.on_output_removed(id, shell.scene_mut())
    }

    pub fn present_frame(&self, id: OutputId) -> Option<Vec<SceneElement>> {
        let shell = lock(&self.shell);
        self.outputs.present_frame(id, shell.scene())
    }

    pub fn surface_created(
        &mut self,
        kind: SurfaceKind,
        identifier: Option<&str>,
    ) -> Result<SurfaceId, RegistryError> {
        lock(&self.shell).on_surface_created(kind, identifier)
    }

    pub fn surface_mapped(&mut self, id: SurfaceId) -> bool {
        let mut shell = lock(&self.shell);
        if !shell.on_surface_mapped(id) {
            return false;
        }
        self.input.refresh_pointer_focus(&shell);
        true
    }

    pub fn surface_unmapped(&mut self, id: SurfaceId) -> bool {
        let mut shell = lock(&self.shell);
        if !shell.on_surface_unmapped(id) {
            return false;
        }
        self.input.on_surface_gone(id);
        self.input.refresh_pointer_focus(&shell);
        true
    }

    pub fn surface_destroyed(&mut self, id: SurfaceId) -> bool {
        let mut shell = lock(&self.shell);
        if shell.on_surface_destroyed(id).is_none() {
            return false;
        }
        self.input.on_surface_gone(id);
        self.input.refresh_pointer_focus(&shell);
        true
    }

    /// Drains requests queued by control callers.
    ///
    /// Brightness is applied right away; configures are returned for the caller to send.
    pub fn apply_pending(&mut self, backend: &mut dyn OutputBackend) -> Vec<PendingConfigure> {
        let pending = lock(&self.shell).take_pending();

        if let Some(value) = pending.brightness {
            let applied = self.outputs.set_brightness(value, backend);
            debug!("brightness set to {applied}");
        }

        pending.configures
    }

    /// Destroys every surface, then every output.
    pub fn shutdown(&mut self) -> Teardown {
        let mut shell = lock(&self.shell);

        let surfaces = shell.clear();
        for id in &surfaces {
            self.input.on_surface_gone(*id);
        }

        let outputs: Vec<_> = self.outputs.iter().map(|o| o.id()).collect();
        for id in &outputs {
            self.outputs.on_output_removed(*id, shell.scene_mut());
        }

        Teardown { surfaces, outputs }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use smithay::utils::{Point, Rectangle, Size};

    use super::*;
    use crate::input::PointerMotion;
    use crate::surfaces::{CompatSurface, NativeSurface};
    use crate::test_utils::{desc, mode, TestBackend};

    #[derive(Debug, PartialEq, Eq)]
    enum Step {
        Surface(SurfaceId),
        Output(OutputId),
        Stop,
    }

    #[derive(Default)]
    struct RecordingSink {
        steps: Vec<Step>,
    }

    impl TeardownSink for RecordingSink {
        fn destroy_surface(&mut self, id: SurfaceId) {
            self.steps.push(Step::Surface(id));
        }

        fn destroy_output(&mut self, id: OutputId) {
            self.steps.push(Step::Output(id));
        }

        fn stop(&mut self) {
            self.steps.push(Step::Stop);
        }
    }

    fn session() -> Session {
        Session::new(&bluewm_config::Config::default(), ControlMode::Native, None)
    }

    fn native() -> SurfaceKind {
        SurfaceKind::Native(NativeSurface::default())
    }

    fn window(session: &mut Session, identifier: &str) -> SurfaceId {
        let id = session.surface_created(native(), Some(identifier)).unwrap();
        lock(&session.shell).on_surface_committed(id, Size::from((100, 100)));
        assert!(session.surface_mapped(id));
        id
    }

    #[test]
    fn frame_contains_mapped_windows_back_to_front() {
        let mut session = session();
        let mut backend = TestBackend::default();
        let output = OutputId::next();
        let dp1 = desc("DP-1", vec![mode(1920, 1080)], None, 0);
        session.add_output(output, dp1, &mut backend).unwrap();

        let a = window(&mut session, "alpha");
        let b = window(&mut session, "beta");
        let hidden = session.surface_created(native(), Some("gamma")).unwrap();

        let frame = session.present_frame(output).unwrap();
        let order: Vec<_> = frame.iter().map(|e| e.surface).collect();
        assert_eq!(order, vec![a, b]);
        assert!(!order.contains(&hidden));

        assert_eq!(session.control.monitor_count(), 1);
        assert!(session.present_frame(OutputId::next()).is_none());
    }

    #[test]
    fn output_without_renderer_is_an_error() {
        let mut session = session();
        let mut backend = TestBackend {
            fail_init: true,
            ..Default::default()
        };
        let output = OutputId::next();

        let headless = desc("HEADLESS-1", vec![mode(1920, 1080)], None, 0);
        let err = session.add_output(output, headless, &mut backend).unwrap_err();
        let err = format!("{err:?}");
        assert!(err.contains("error creating the render target for HEADLESS-1"));
        assert!(err.contains("no renderer"));

        assert_eq!(session.control.monitor_count(), 0);
        assert!(session.outputs.is_empty());
        assert!(session.present_frame(output).is_none());
    }

    #[test]
    fn windows_off_screen_are_not_presented() {
        let mut session = session();
        let mut backend = TestBackend::default();
        let left = OutputId::next();
        let right = OutputId::next();
        session
            .add_output(left, desc("DP-1", vec![mode(1000, 1000)], None, 0), &mut backend)
            .unwrap();
        session
            .add_output(right, desc("DP-2", vec![mode(1000, 1000)], None, 0), &mut backend)
            .unwrap();

        let id = window(&mut session, "foot");
        session.control.move_resize("foot", 1500, 10, 100, 100);

        assert!(session.present_frame(left).unwrap().is_empty());
        assert_eq!(session.present_frame(right).unwrap()[0].surface, id);
    }

    #[test]
    fn unmap_and_destroy_clear_focus() {
        let mut session = session();
        let mut backend = TestBackend::default();
        session
            .add_output(OutputId::next(), desc("DP-1", vec![mode(500, 500)], None, 0), &mut backend)
            .unwrap();
        let id = window(&mut session, "foot");

        {
            let mut shell = lock(&session.shell);
            let motion = PointerMotion::Relative(Point::from((60., 60.)));
            let update = session
                .input
                .on_pointer_motion(motion, &session.outputs, &mut shell)
                .unwrap();
            assert_eq!(update.under.map(|(id, _)| id), Some(id));
        }
        {
            let mut shell = lock(&session.shell);
            assert_eq!(session.input.on_pointer_button(true, &mut shell), Some(id));
        }

        assert!(session.surface_unmapped(id));
        assert_eq!(session.input.keyboard_focus(), None);
        assert_eq!(session.input.pointer_focus(), None);

        assert!(session.surface_mapped(id));
        assert_eq!(session.input.pointer_focus(), Some(id));

        assert!(session.surface_destroyed(id));
        assert!(!session.surface_destroyed(id));
        assert_eq!(session.input.pointer_focus(), None);
    }

    #[test]
    fn pending_requests_are_applied_on_the_loop() {
        let mut session = session();
        let mut backend = TestBackend::default();
        let output = OutputId::next();
        session
            .add_output(output, desc("DP-1", vec![mode(500, 500)], None, 256), &mut backend)
            .unwrap();
        let id = window(&mut session, "firefox-browser");

        session.control.move_resize("fire", 10, 20, 800, 600);
        assert_abs_diff_eq!(session.control.set_brightness(0.5), 0.5);
        assert!(backend.gamma.is_empty());

        let configures = session.apply_pending(&mut backend);
        assert_eq!(
            configures,
            vec![PendingConfigure {
                surface: id,
                geometry: Rectangle::new(Point::from((10, 20)), Size::from((800, 600))),
            }]
        );
        assert_abs_diff_eq!(session.outputs.brightness(), 0.5);
        assert_eq!(backend.gamma[&output].len(), 768);

        assert!(session.apply_pending(&mut backend).is_empty());
    }

    #[test]
    fn shutdown_destroys_surfaces_then_outputs() {
        let mut session = session();
        let mut backend = TestBackend::default();
        let output = OutputId::next();
        session
            .add_output(output, desc("DP-1", vec![mode(500, 500)], None, 0), &mut backend)
            .unwrap();
        let a = window(&mut session, "alpha");
        let b = window(&mut session, "beta");

        let teardown = session.shutdown();
        assert_eq!(
            teardown,
            Teardown {
                surfaces: vec![a, b],
                outputs: vec![output],
            }
        );

        let mut sink = RecordingSink::default();
        teardown.run(&mut sink);
        assert_eq!(
            sink.steps,
            vec![Step::Surface(a), Step::Surface(b), Step::Output(output), Step::Stop]
        );

        let shell = lock(&session.shell);
        assert!(shell.surfaces().is_empty());
        assert!(shell.scene().is_empty());
        assert!(shell.scene().outputs().is_empty());
        assert!(session.outputs.is_empty());
        assert!(session.control.outputs().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Event {
        CreateNative,
        CreateCompat { parent: prop::sample::Index },
        Map(prop::sample::Index),
        Unmap(prop::sample::Index),
        Destroy(prop::sample::Index),
        Raise(prop::sample::Index),
        Click { x: f64, y: f64 },
        Drag { from: (f64, f64), to: (f64, f64) },
        ToggleTiling,
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::CreateNative),
            any::<prop::sample::Index>().prop_map(|parent| Event::CreateCompat { parent }),
            any::<prop::sample::Index>().prop_map(Event::Map),
            any::<prop::sample::Index>().prop_map(Event::Unmap),
            any::<prop::sample::Index>().prop_map(Event::Destroy),
            any::<prop::sample::Index>().prop_map(Event::Raise),
            (0f64..1., 0f64..1.).prop_map(|(x, y)| Event::Click { x, y }),
            ((0f64..1., 0f64..1.), (0f64..1., 0f64..1.))
                .prop_map(|(from, to)| Event::Drag { from, to }),
            Just(Event::ToggleTiling),
        ]
    }

    fn pick(ids: &[SurfaceId], index: prop::sample::Index) -> Option<SurfaceId> {
        (!ids.is_empty()).then(|| ids[index.index(ids.len())])
    }

    /// Applies one event. `ids` holds every surface ever created, destroyed ones included.
    fn apply(session: &mut Session, ids: &mut Vec<SurfaceId>, event: Event) {
        match event {
            Event::CreateNative => {
                if let Ok(id) = session.surface_created(native(), Some("native")) {
                    ids.push(id);
                }
            }
            Event::CreateCompat { parent } => {
                let n = ids.len() as i32;
                let kind = SurfaceKind::Compat(CompatSurface {
                    window_id: n as u32,
                    override_redirect: false,
                    parent: pick(ids, parent),
                });
                if let Ok(id) = session.surface_created(kind, Some("compat")) {
                    let loc = Point::from(((n * 37) % 900, (n * 53) % 900));
                    let geometry = Rectangle::new(loc, Size::from((100, 100)));
                    lock(&session.shell).on_surface_configured(id, geometry);
                    ids.push(id);
                }
            }
            Event::Map(index) => {
                if let Some(id) = pick(ids, index) {
                    lock(&session.shell).on_surface_committed(id, Size::from((100, 100)));
                    session.surface_mapped(id);
                }
            }
            Event::Unmap(index) => {
                if let Some(id) = pick(ids, index) {
                    session.surface_unmapped(id);
                }
            }
            Event::Destroy(index) => {
                if let Some(id) = pick(ids, index) {
                    session.surface_destroyed(id);
                }
            }
            Event::Raise(index) => {
                if let Some(id) = pick(ids, index) {
                    lock(&session.shell).raise(id);
                }
            }
            Event::Click { x, y } => {
                let mut shell = lock(&session.shell);
                let motion = PointerMotion::Absolute(Point::from((x, y)));
                session.input.on_pointer_motion(motion, &session.outputs, &mut shell);
                session.input.on_pointer_button(true, &mut shell);
                session.input.on_pointer_button(false, &mut shell);
            }
            Event::Drag { from, to } => {
                let mut shell = lock(&session.shell);
                let motion = PointerMotion::Absolute(Point::from(from));
                session.input.on_pointer_motion(motion, &session.outputs, &mut shell);
                session.input.begin_move(&mut shell);
                let motion = PointerMotion::Absolute(Point::from(to));
                session.input.on_pointer_motion(motion, &session.outputs, &mut shell);
                session.input.end_move();
            }
            Event::ToggleTiling => {
                let mut shell = lock(&session.shell);
                let tiling = shell.is_tiling();
                let area = Rectangle::new(Point::from((0, 0)), Size::from((1000, 1000)));
                shell.set_tile_area(Some(area));
                shell.set_tiling(!tiling);
            }
        }
    }

    fn check_consistency(session: &Session) -> Result<(), TestCaseError> {
        let shell = lock(&session.shell);
        let scene = shell.scene();
        scene.verify_invariants();

        // One node per surface, and nothing else.
        prop_assert_eq!(scene.len(), shell.surfaces().len());
        for surface in shell.surfaces().iter() {
            let node = scene.node(surface.node());
            prop_assert!(node.is_some());
            let node = node.unwrap();
            prop_assert_eq!(node.surface(), Some(surface.id()));
            prop_assert_eq!(node.is_enabled(), surface.is_mapped());
        }

        let is_mapped = |id| shell.surface(id).is_some_and(|s| s.is_mapped());
        for element in scene.elements() {
            prop_assert!(is_mapped(element.surface));
        }
        if let Some(id) = session.input.keyboard_focus() {
            prop_assert!(is_mapped(id), "keyboard focus on {id} which is not mapped");
        }
        if let Some(id) = session.input.pointer_focus() {
            prop_assert!(is_mapped(id), "pointer focus on {id} which is not mapped");
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn random_lifecycles_stay_consistent(events in prop::collection::vec(event(), 1..64)) {
            let mut session = session();
            let mut backend = TestBackend::default();
            let dp1 = desc("DP-1", vec![mode(1000, 1000)], None, 0);
            session.add_output(OutputId::next(), dp1, &mut backend).unwrap();

            let mut ids = Vec::new();
            for event in events {
                apply(&mut session, &mut ids, event);
                check_consistency(&session)?;
            }

            session.shutdown();
            check_consistency(&session)?;
            prop_assert!(lock(&session.shell).surfaces().is_empty());
        }
    }
}
