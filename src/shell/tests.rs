use insta::assert_snapshot;
use proptest::prelude::*;

use super::*;
use crate::surfaces::{CompatSurface, NativeSurface, UNKNOWN_IDENTIFIER};

fn native() -> SurfaceKind {
    SurfaceKind::Native(NativeSurface::default())
}

fn compat(window_id: u32, parent: Option<SurfaceId>) -> SurfaceKind {
    SurfaceKind::Compat(CompatSurface {
        window_id,
        override_redirect: false,
        parent,
    })
}

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

fn mapped(shell: &mut Shell, identifier: &str, size: (i32, i32)) -> SurfaceId {
    let id = shell.on_surface_created(native(), Some(identifier)).unwrap();
    shell.on_surface_committed(id, Size::from(size));
    assert!(shell.on_surface_mapped(id));
    id
}

/// One line per visible node in paint order.
fn dump(shell: &Shell) -> String {
    shell
        .scene
        .elements()
        .iter()
        .map(|elem| {
            let surface = shell.surface(elem.surface).unwrap();
            let g = elem.geometry;
            format!(
                "{} {}x{}+{}+{}",
                surface.identifier(),
                g.size.w,
                g.size.h,
                g.loc.x,
                g.loc.y
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn native_surface_starts_at_default_offset() {
    let mut shell = Shell::default();
    let id = shell.on_surface_created(native(), Some("foot")).unwrap();

    let surface = shell.surface(id).unwrap();
    assert!(surface.is_placed());
    assert!(!surface.is_mapped());
    assert_eq!(surface.loc, Point::from((50, 50)));
    assert_eq!(shell.scene.absolute_position(surface.node()), Point::from((50, 50)));
}

#[test]
fn compat_placement_is_deferred_to_first_configure() {
    let mut shell = Shell::default();
    let id = shell.on_surface_created(compat(7, None), None).unwrap();

    let surface = shell.surface(id).unwrap();
    assert!(!surface.is_placed());
    assert_eq!(surface.identifier(), UNKNOWN_IDENTIFIER);

    shell.on_surface_configured(id, rect(300, 200, 640, 480));
    let surface = shell.surface(id).unwrap();
    assert!(surface.is_placed());
    assert_eq!(surface.loc, Point::from((300, 200)));
    assert_eq!(shell.scene.node(surface.node()).unwrap().size(), Size::from((640, 480)));
}

#[test]
fn compat_child_follows_parent() {
    let mut shell = Shell::default();
    let parent = shell.on_surface_created(compat(1, None), Some("gimp")).unwrap();
    let child = shell
        .on_surface_created(compat(2, Some(parent)), Some("gimp-dialog"))
        .unwrap();

    let parent_node = shell.surface(parent).unwrap().node();
    let child_node = shell.surface(child).unwrap().node();
    assert_eq!(shell.scene.node(child_node).unwrap().parent(), Some(parent_node));
    assert_eq!(shell.scene.top_level(child_node), parent_node);
    shell.scene.verify_invariants();
}

#[test]
fn unmap_before_map_is_noop() {
    let mut shell = Shell::default();
    let id = shell.on_surface_created(native(), Some("foot")).unwrap();

    assert!(!shell.on_surface_unmapped(id));
    assert!(shell.on_surface_mapped(id));
    assert!(!shell.on_surface_mapped(id));
    assert!(shell.on_surface_unmapped(id));
    assert!(!shell.surface(id).unwrap().is_mapped());
}

#[test]
fn events_after_destroy_are_ignored() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "foot", (100, 100));

    assert!(shell.on_surface_destroyed(id).is_some());
    assert!(shell.on_surface_destroyed(id).is_none());
    assert!(!shell.on_surface_mapped(id));
    assert!(!shell.on_surface_unmapped(id));
    shell.on_surface_committed(id, Size::from((1, 1)));

    assert!(shell.surfaces.is_empty());
    assert!(shell.scene.is_empty());
}

#[test]
fn unmapped_surface_is_not_hit() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "foot", (100, 100));
    let pos = Point::from((60., 60.));

    assert_eq!(shell.surface_under(pos), Some((id, Point::from((10., 10.)))));
    shell.on_surface_unmapped(id);
    assert_eq!(shell.surface_under(pos), None);
}

#[test]
fn firefox_move_resize() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "firefox-browser", (100, 100));

    let outcome = shell.move_resize("fire", rect(10, 20, 800, 600), false);
    assert_eq!(outcome, MoveResize::Moved(id));

    let surface = shell.surface(id).unwrap();
    assert_eq!(surface.loc, Point::from((10, 20)));
    assert_eq!(surface.requested_size, Some(Size::from((800, 600))));
    assert_eq!(shell.scene.absolute_position(surface.node()), Point::from((10, 20)));

    let pending = shell.take_pending();
    assert_eq!(
        pending.configures,
        vec![PendingConfigure {
            surface: id,
            geometry: rect(10, 20, 800, 600),
        }]
    );
    assert!(!shell.has_pending());
}

#[test]
fn move_resize_unknown_mutates_nothing() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "foot", (100, 100));
    let before = shell.surface(id).unwrap().clone();

    let outcome = shell.move_resize("nonexistent", rect(1, 2, 3, 4), false);
    assert_eq!(outcome, MoveResize::NotFound);

    let after = shell.surface(id).unwrap();
    assert_eq!(after.loc, before.loc);
    assert_eq!(after.requested_size, before.requested_size);
    assert!(shell.surfaces.placeholders().is_empty());
    assert!(!shell.has_pending());
}

#[test]
fn placeholder_is_adopted_on_creation() {
    let mut shell = Shell::default();
    let outcome = shell.move_resize("term", rect(5, 6, 700, 500), true);
    assert_eq!(outcome, MoveResize::Placeholder);
    assert_eq!(shell.find("term"), None);

    let id = shell.on_surface_created(native(), Some("org.term")).unwrap();
    let surface = shell.surface(id).unwrap();
    assert_eq!(surface.loc, Point::from((5, 6)));
    assert_eq!(surface.requested_size, Some(Size::from((700, 500))));
    assert!(shell.surfaces.placeholders().is_empty());
    assert_eq!(shell.take_pending().configures.len(), 1);
}

#[test]
fn placeholder_is_adopted_when_identifier_arrives_later() {
    let mut shell = Shell::default();
    shell.move_resize("editor", rect(0, 0, 10, 10), true);

    let id = shell.on_surface_created(native(), None).unwrap();
    assert_eq!(shell.surfaces.placeholders().len(), 1);

    shell.set_identifier(id, Some("my-editor"));
    assert!(shell.surfaces.placeholders().is_empty());
    assert_eq!(shell.surface(id).unwrap().loc, Point::from((0, 0)));
}

#[test]
fn capacity_rejects_new_surfaces() {
    let mut shell = Shell::new(ShellOptions {
        max_surfaces: Some(1),
        ..ShellOptions::default()
    });
    shell.on_surface_created(native(), Some("a")).unwrap();

    let err = shell.on_surface_created(native(), Some("b")).unwrap_err();
    assert_eq!(err, RegistryError::Full { max: 1 });
    assert_eq!(shell.surfaces.len(), 1);
    assert_eq!(shell.scene.len(), 1);
}

#[test]
fn raise_reorders_paint_order() {
    let mut shell = Shell::default();
    let a = mapped(&mut shell, "alpha", (100, 100));
    mapped(&mut shell, "beta", (200, 100));
    mapped(&mut shell, "gamma", (300, 100));
    shell.move_resize("beta", rect(400, 0, 200, 100), false);

    assert!(shell.raise(a));
    assert!(!shell.raise(a));

    assert_snapshot!(dump(&shell), @r"
    beta 200x100+400+0
    gamma 300x100+50+50
    alpha 100x100+50+50
    ");
}

#[test]
fn clear_removes_everything() {
    let mut shell = Shell::default();
    let a = mapped(&mut shell, "alpha", (10, 10));
    let b = mapped(&mut shell, "beta", (10, 10));
    shell.move_resize("alpha", rect(0, 0, 1, 1), false);

    assert_eq!(shell.clear(), vec![a, b]);
    assert!(shell.surfaces.is_empty());
    assert!(shell.scene.is_empty());
    assert!(!shell.has_pending());
}

fn tiled(shell: &Shell) -> String {
    shell
        .surfaces
        .iter()
        .filter(|s| s.is_mapped())
        .map(|s| {
            let size = s.requested_size.unwrap_or(s.size);
            format!("{} {}x{}+{}+{}", s.identifier(), size.w, size.h, s.loc.x, s.loc.y)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn tiling_splits_the_area_into_columns() {
    let mut shell = Shell::default();
    mapped(&mut shell, "alpha", (100, 100));
    let beta = mapped(&mut shell, "beta", (100, 100));
    let gamma = mapped(&mut shell, "gamma", (100, 100));

    shell.set_tile_area(Some(rect(0, 30, 1000, 770)));
    assert!(!shell.has_pending());

    shell.set_tiling(true);
    assert_snapshot!(tiled(&shell), @r"
    alpha 333x770+0+30
    beta 333x770+333+30
    gamma 334x770+666+30
    ");
    assert_eq!(shell.take_configures().len(), 3);

    // Windows re-flow as they come and go.
    shell.on_surface_destroyed(gamma);
    assert_snapshot!(tiled(&shell), @r"
    alpha 500x770+0+30
    beta 500x770+500+30
    ");

    shell.on_surface_unmapped(beta);
    assert_snapshot!(tiled(&shell), @"alpha 1000x770+0+30");
}

#[test]
fn tiling_skips_dialogs_and_menus() {
    let mut shell = Shell::default();
    let main = mapped(&mut shell, "gimp", (100, 100));

    let dialog = shell.on_surface_created(compat(2, Some(main)), Some("gimp")).unwrap();
    shell.on_surface_configured(dialog, rect(10, 10, 50, 50));
    shell.on_surface_mapped(dialog);

    let menu = shell
        .on_surface_created(
            SurfaceKind::Compat(CompatSurface {
                window_id: 3,
                override_redirect: true,
                parent: None,
            }),
            Some("gimp"),
        )
        .unwrap();
    shell.on_surface_configured(menu, rect(20, 20, 30, 30));
    shell.on_surface_mapped(menu);

    shell.set_tile_area(Some(rect(0, 0, 800, 600)));
    shell.set_tiling(true);

    let configures = shell.take_configures();
    assert_eq!(configures.len(), 1);
    assert_eq!(configures[0].surface, main);
    assert_eq!(configures[0].geometry, rect(0, 0, 800, 600));
    assert_eq!(shell.surface(menu).unwrap().loc, Point::from((20, 20)));
}

#[test]
fn tiling_waits_for_an_area() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "foot", (100, 100));

    shell.set_tiling(true);
    assert!(!shell.has_pending());

    shell.set_tile_area(Some(rect(0, 0, 640, 480)));
    assert_eq!(shell.surface(id).unwrap().requested_size, Some(Size::from((640, 480))));

    // Turning it off leaves windows where they are.
    shell.take_configures();
    shell.set_tiling(false);
    assert!(!shell.has_pending());
    assert_eq!(shell.surface(id).unwrap().loc, Point::from((0, 0)));
}

#[test]
fn move_window_keeps_size() {
    let mut shell = Shell::default();
    let id = mapped(&mut shell, "foot", (300, 200));

    assert!(shell.move_window(id, Point::from((400, 100))));
    assert_snapshot!(dump(&shell), @"foot 300x200+400+100");
    assert_eq!(
        shell.take_configures(),
        vec![PendingConfigure {
            surface: id,
            geometry: rect(400, 100, 300, 200),
        }]
    );

    // Same spot, nothing to send.
    assert!(shell.move_window(id, Point::from((400, 100))));
    assert!(!shell.has_pending());

    shell.on_surface_destroyed(id);
    assert!(!shell.move_window(id, Point::from((0, 0))));
}

fn arbitrary_rect() -> impl Strategy<Value = Rectangle<i32, Logical>> {
    (-2000..2000, -2000..2000, 1..4000, 1..4000).prop_map(|(x, y, w, h)| rect(x, y, w, h))
}

proptest! {
    #[test]
    fn move_resize_is_idempotent(geometry in arbitrary_rect()) {
        let mut once = Shell::default();
        let id_once = mapped(&mut once, "firefox-browser", (100, 100));
        once.move_resize("fire", geometry, false);

        let mut twice = Shell::default();
        let id_twice = mapped(&mut twice, "firefox-browser", (100, 100));
        twice.move_resize("fire", geometry, false);
        twice.move_resize("fire", geometry, false);

        let a = once.surface(id_once).unwrap();
        let b = twice.surface(id_twice).unwrap();
        prop_assert_eq!(a.loc, b.loc);
        prop_assert_eq!(a.requested_size, b.requested_size);
        prop_assert_eq!(
            once.scene.absolute_position(a.node()),
            twice.scene.absolute_position(b.node())
        );
        prop_assert_eq!(once.take_pending().configures.len(), 1);
        prop_assert_eq!(twice.take_pending().configures.len(), 1);
    }
}
