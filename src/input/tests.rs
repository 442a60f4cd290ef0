use smithay::utils::{Rectangle, Size};

use super::*;
use crate::outputs::OutputId;
use crate::scene::SceneGraph;
use crate::surfaces::{CompatSurface, NativeSurface, SurfaceKind};
use crate::test_utils::{desc, mode, TestBackend};

const KB: SeatCapabilities = SeatCapabilities::KEYBOARD;
const PTR: SeatCapabilities = SeatCapabilities::POINTER;

struct Fixture {
    router: InputRouter,
    outputs: OutputManager,
    shell: Shell,
    backend: TestBackend,
}

impl Fixture {
    fn new() -> Self {
        Self {
            router: InputRouter::new(),
            outputs: OutputManager::new(1.),
            shell: Shell::default(),
            backend: TestBackend::default(),
        }
    }

    fn with_outputs(sizes: &[(i32, i32)]) -> Self {
        let mut f = Self::new();
        for (i, (w, h)) in sizes.iter().enumerate() {
            let name = format!("DP-{i}");
            f.outputs
                .on_output_added(
                    OutputId::next(),
                    desc(&name, vec![mode(*w, *h)], None, 0),
                    &mut f.backend,
                    &mut SceneGraph::new(),
                )
                .unwrap();
        }
        f
    }

    fn window(&mut self, identifier: &str, geometry: Rectangle<i32, Logical>) -> SurfaceId {
        let kind = SurfaceKind::Native(NativeSurface::default());
        let id = self.shell.on_surface_created(kind, Some(identifier)).unwrap();
        self.shell.on_surface_committed(id, geometry.size);
        self.shell.on_surface_mapped(id);
        self.shell.move_resize(identifier, geometry, false);
        id
    }

    fn motion(&mut self, motion: PointerMotion) -> Option<PointerUpdate> {
        self.router
            .on_pointer_motion(motion, &self.outputs, &mut self.shell)
    }

    fn move_to(&mut self, x: f64, y: f64) -> Option<PointerUpdate> {
        let delta = Point::from((x, y)) - self.router.pointer_location();
        self.motion(PointerMotion::Relative(delta))
    }

    fn click(&mut self) -> Option<SurfaceId> {
        let focused = self.router.on_pointer_button(true, &mut self.shell);
        assert_eq!(self.router.on_pointer_button(false, &mut self.shell), None);
        focused
    }
}

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

#[test]
fn keyboard_capability_tracks_keyboard_count() {
    let mut router = InputRouter::new();

    let change = router.on_device_added("kbd-1", KB).unwrap();
    assert_eq!(change.added(), KB);

    let change = router.on_device_added("kbd-2", KB).unwrap();
    assert!(change.added().is_empty());

    let change = router.on_device_removed("kbd-1").unwrap();
    assert!(change.removed().is_empty());
    assert_eq!(router.capabilities(), KB);

    let change = router.on_device_removed("kbd-2").unwrap();
    assert_eq!(change.removed(), KB);
    assert_eq!(router.capabilities(), SeatCapabilities::empty());
}

#[test]
fn pointer_capability_is_sticky() {
    let mut router = InputRouter::new();

    assert_eq!(router.on_device_added("mouse", PTR).unwrap().added(), PTR);
    let change = router.on_device_removed("mouse").unwrap();
    assert!(change.removed().is_empty());
    assert_eq!(router.capabilities(), PTR);
    assert_eq!(router.device_count(), 0);
}

#[test]
fn other_devices_are_ignored() {
    let mut router = InputRouter::new();

    assert_eq!(router.on_device_added("touchscreen", SeatCapabilities::empty()), None);
    assert_eq!(router.on_device_removed("touchscreen"), None);
    assert_eq!(router.device_count(), 0);

    assert!(router.on_device_added("combo", KB | PTR).is_some());
    assert_eq!(router.on_device_added("combo", KB | PTR), None);
    assert_eq!(router.capabilities(), KB | PTR);
}

#[test]
fn pointer_does_not_move_without_outputs() {
    let mut f = Fixture::new();
    assert_eq!(f.motion(PointerMotion::Relative(Point::from((5., 5.)))), None);
    assert_eq!(f.router.pointer_location(), Point::from((0., 0.)));
}

#[test]
fn relative_motion_is_clamped_to_layout() {
    let mut f = Fixture::with_outputs(&[(100, 100)]);

    let update = f.motion(PointerMotion::Relative(Point::from((500., 500.))));
    assert_eq!(update.unwrap().location, Point::from((99., 99.)));

    let update = f.motion(PointerMotion::Relative(Point::from((-1000., 0.))));
    assert_eq!(update.unwrap().location, Point::from((0., 99.)));
}

#[test]
fn absolute_motion_maps_onto_layout_bounds() {
    let mut f = Fixture::with_outputs(&[(100, 100), (100, 100)]);

    let update = f.motion(PointerMotion::Absolute(Point::from((0.5, 0.5))));
    assert_eq!(update.unwrap().location, Point::from((100., 50.)));

    let update = f.motion(PointerMotion::Absolute(Point::from((-3., 0.25))));
    assert_eq!(update.unwrap().location, Point::from((0., 25.)));
}

#[test]
fn hover_reports_surface_origin() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let id = f.window("foot", rect(50, 50, 100, 100));

    let update = f.move_to(60., 70.).unwrap();
    assert_eq!(update.under, Some((id, Point::from((50., 50.)))));
    assert_eq!(f.router.pointer_focus(), Some(id));

    let update = f.move_to(500., 500.).unwrap();
    assert_eq!(update.under, None);
    assert_eq!(f.router.pointer_focus(), None);
}

#[test]
fn click_raises_and_focuses() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let back = f.window("back", rect(0, 0, 300, 300));
    let front = f.window("front", rect(200, 200, 300, 300));

    // Only the back window is under the pointer here.
    f.move_to(10., 10.);
    assert_eq!(f.click(), Some(back));
    assert_eq!(f.router.keyboard_focus(), Some(back));

    let order: Vec<_> = f.shell.scene().elements().iter().map(|e| e.surface).collect();
    assert_eq!(order, vec![front, back]);

    // The overlap now belongs to the raised window.
    f.move_to(250., 250.);
    assert_eq!(f.router.pointer_focus(), Some(back));
}

#[test]
fn click_on_empty_space_keeps_focus() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let id = f.window("foot", rect(0, 0, 100, 100));

    f.move_to(10., 10.);
    assert_eq!(f.click(), Some(id));

    f.move_to(1000., 1000.);
    assert_eq!(f.click(), None);
    assert_eq!(f.router.keyboard_focus(), Some(id));
}

#[test]
fn menus_do_not_take_click_focus() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let window = f.window("firefox", rect(0, 0, 100, 100));

    let kind = SurfaceKind::Compat(CompatSurface {
        window_id: 9,
        override_redirect: true,
        parent: None,
    });
    let menu = f.shell.on_surface_created(kind, Some("firefox")).unwrap();
    f.shell.on_surface_configured(menu, rect(200, 200, 50, 50));
    f.shell.on_surface_mapped(menu);

    f.move_to(10., 10.);
    assert_eq!(f.click(), Some(window));

    // The menu still gets hover, but neither focus nor raise.
    f.move_to(210., 210.);
    assert_eq!(f.router.pointer_focus(), Some(menu));
    assert_eq!(f.click(), None);
    assert_eq!(f.router.keyboard_focus(), Some(window));
}

#[test]
fn drag_moves_the_window_under_the_pointer() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let back = f.window("back", rect(0, 0, 300, 300));
    let front = f.window("front", rect(500, 0, 300, 300));

    f.move_to(20., 30.);
    assert_eq!(f.router.begin_move(&mut f.shell), Some(back));
    assert!(f.router.is_moving());
    assert_eq!(f.router.keyboard_focus(), Some(back));

    f.move_to(120., 230.);
    f.move_to(220., 430.);
    assert_eq!(f.shell.surface(back).unwrap().loc, Point::from((200, 400)));
    assert_eq!(f.router.pointer_focus(), Some(back));

    // Moved windows keep their size.
    let configures = f.shell.take_configures();
    assert_eq!(configures.last().unwrap().geometry, rect(200, 400, 300, 300));

    assert!(f.router.end_move());
    f.move_to(0., 0.);
    assert_eq!(f.shell.surface(back).unwrap().loc, Point::from((200, 400)));
    assert_eq!(f.shell.surface(front).unwrap().loc, Point::from((500, 0)));
    assert!(!f.router.end_move());
}

#[test]
fn drag_needs_a_managed_window() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    f.move_to(10., 10.);
    assert_eq!(f.router.begin_move(&mut f.shell), None);

    let id = f.window("foot", rect(0, 0, 100, 100));
    f.move_to(20., 20.);
    assert_eq!(f.router.begin_move(&mut f.shell), Some(id));

    // The grab ends with the window.
    f.shell.on_surface_destroyed(id);
    f.router.on_surface_gone(id);
    assert!(!f.router.is_moving());
}

#[test]
fn destroyed_surface_loses_focus() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let id = f.window("foot", rect(0, 0, 100, 100));

    f.move_to(10., 10.);
    f.click();
    assert!(f.router.can_set_cursor(Some(id)));

    assert!(f.router.on_surface_gone(id));
    assert_eq!(f.router.keyboard_focus(), None);
    assert_eq!(f.router.pointer_focus(), None);
    assert!(!f.router.can_set_cursor(Some(id)));
    assert!(!f.router.on_surface_gone(id));
}

#[test]
fn cursor_requires_pointer_focus() {
    let mut f = Fixture::with_outputs(&[(1920, 1080)]);
    let a = f.window("a", rect(0, 0, 100, 100));
    let b = f.window("b", rect(500, 0, 100, 100));

    f.move_to(10., 10.);
    assert!(f.router.can_set_cursor(Some(a)));
    assert!(!f.router.can_set_cursor(Some(b)));
    assert!(!f.router.can_set_cursor(None));
}
