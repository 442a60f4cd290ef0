//! Surface registry.
//!
//! Tracks every client window, native xdg toplevels and Xwayland windows alike, keyed by
//! [`SurfaceId`]. Registration order is kept separately because identifier lookup returns the
//! first match in the order windows appeared.

use std::collections::HashMap;
use std::fmt;

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::scene::SceneNodeId;
use crate::utils::id::IdCounter;

static SURFACE_ID_COUNTER: IdCounter = IdCounter::new();

/// Identifier used when a client never provided an app id or title.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn next() -> SurfaceId {
        SurfaceId(SURFACE_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceKind {
    Native(NativeSurface),
    Compat(CompatSurface),
}

/// xdg-shell toplevel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeSurface {
    pub title: Option<String>,
}

/// Xwayland window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatSurface {
    pub window_id: u32,
    pub override_redirect: bool,
    /// Window this one is transient for, if it is tracked.
    pub parent: Option<SurfaceId>,
}

impl SurfaceKind {
    pub fn is_compat(&self) -> bool {
        matches!(self, SurfaceKind::Compat(_))
    }

    /// Override-redirect X11 windows (menus, tooltips) place themselves and never take focus.
    ///
    /// They are drawn, but do not count as windows: they are not looked up by identifier and
    /// do not count against the surface limit.
    pub fn is_managed(&self) -> bool {
        !matches!(
            self,
            SurfaceKind::Compat(CompatSurface {
                override_redirect: true,
                ..
            })
        )
    }
}

#[derive(Debug, Clone)]
pub struct Surface {
    id: SurfaceId,
    pub kind: SurfaceKind,
    identifier: String,
    /// Position in the global layout.
    pub loc: Point<i32, Logical>,
    /// Size last requested from the client.
    pub requested_size: Option<Size<i32, Logical>>,
    /// Size of the content the client last committed.
    pub size: Size<i32, Logical>,
    mapped: bool,
    /// Whether the initial placement happened. Compatibility windows are placed on their first
    /// configure.
    placed: bool,
    node: SceneNodeId,
}

impl Surface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn is_placed(&self) -> bool {
        self.placed
    }

    pub fn node(&self) -> SceneNodeId {
        self.node
    }

    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.loc, self.requested_size.unwrap_or(self.size))
    }

    pub(crate) fn set_mapped(&mut self, mapped: bool) {
        self.mapped = mapped;
    }

    pub(crate) fn set_placed(&mut self) {
        self.placed = true;
    }

    pub(crate) fn set_identifier(&mut self, identifier: Option<&str>) {
        self.identifier = normalize_identifier(identifier);
    }
}

fn normalize_identifier(identifier: Option<&str>) -> String {
    match identifier {
        Some(x) if !x.is_empty() => x.to_owned(),
        _ => String::from(UNKNOWN_IDENTIFIER),
    }
}

/// Geometry remembered for a window that has not appeared yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub identifier: String,
    pub geometry: Rectangle<i32, Logical>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured surface limit was reached.
    Full { max: usize },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full { max } => write!(f, "surface limit of {max} reached"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: HashMap<SurfaceId, Surface>,
    /// Registration order.
    order: Vec<SurfaceId>,
    max_surfaces: Option<usize>,
    placeholders: Vec<Placeholder>,
}

impl SurfaceRegistry {
    pub fn new(max_surfaces: Option<usize>) -> Self {
        Self {
            max_surfaces,
            ..Default::default()
        }
    }

    /// Checks whether a surface of the given kind may be added.
    pub fn check_capacity(&self, kind: &SurfaceKind) -> Result<(), RegistryError> {
        let Some(max) = self.max_surfaces else {
            return Ok(());
        };
        if !kind.is_managed() {
            return Ok(());
        }

        let managed = self.surfaces.values().filter(|s| s.kind.is_managed()).count();
        if managed >= max {
            return Err(RegistryError::Full { max });
        }
        Ok(())
    }

    pub(crate) fn insert(
        &mut self,
        kind: SurfaceKind,
        identifier: Option<&str>,
        node: SceneNodeId,
        id: SurfaceId,
    ) -> &mut Surface {
        let surface = Surface {
            id,
            kind,
            identifier: normalize_identifier(identifier),
            loc: Point::from((0, 0)),
            requested_size: None,
            size: Size::from((0, 0)),
            mapped: false,
            placed: false,
            node,
        };

        self.order.push(id);
        self.surfaces.entry(id).or_insert(surface)
    }

    pub(crate) fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        let surface = self.surfaces.remove(&id)?;
        self.order.retain(|x| *x != id);
        Some(surface)
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Surfaces in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Surface> + '_ {
        self.order.iter().filter_map(|id| self.surfaces.get(id))
    }

    /// Returns the first managed surface, in registration order, whose identifier contains
    /// `query`.
    pub fn find(&self, query: &str) -> Option<SurfaceId> {
        self.iter()
            .filter(|surface| surface.kind.is_managed())
            .find(|surface| surface.identifier.contains(query))
            .map(|surface| surface.id)
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Records or updates a placeholder for `identifier`.
    pub(crate) fn set_placeholder(&mut self, identifier: &str, geometry: Rectangle<i32, Logical>) {
        if let Some(existing) = self
            .placeholders
            .iter_mut()
            .find(|p| p.identifier == identifier)
        {
            existing.geometry = geometry;
        } else {
            self.placeholders.push(Placeholder {
                identifier: identifier.to_owned(),
                geometry,
            });
        }
    }

    /// Removes and returns the first placeholder matching a window's identifier.
    pub(crate) fn take_placeholder_for(&mut self, identifier: &str) -> Option<Placeholder> {
        if identifier == UNKNOWN_IDENTIFIER {
            return None;
        }

        let idx = self
            .placeholders
            .iter()
            .position(|p| identifier.contains(&p.identifier))?;
        Some(self.placeholders.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> SurfaceKind {
        SurfaceKind::Native(NativeSurface::default())
    }

    fn override_redirect() -> SurfaceKind {
        SurfaceKind::Compat(CompatSurface {
            window_id: 7,
            override_redirect: true,
            parent: None,
        })
    }

    fn add_kind(
        registry: &mut SurfaceRegistry,
        kind: SurfaceKind,
        identifier: Option<&str>,
    ) -> SurfaceId {
        let id = SurfaceId::next();
        let node = crate::scene::SceneGraph::new().create_node(Some(id), None);
        registry.insert(kind, identifier, node, id);
        id
    }

    fn add(registry: &mut SurfaceRegistry, identifier: Option<&str>) -> SurfaceId {
        add_kind(registry, native(), identifier)
    }

    #[test]
    fn missing_identifier_becomes_unknown() {
        let mut registry = SurfaceRegistry::new(None);
        let a = add(&mut registry, None);
        let b = add(&mut registry, Some(""));
        assert_eq!(registry.get(a).unwrap().identifier(), UNKNOWN_IDENTIFIER);
        assert_eq!(registry.get(b).unwrap().identifier(), UNKNOWN_IDENTIFIER);
    }

    #[test]
    fn find_is_first_substring_match_in_registration_order() {
        let mut registry = SurfaceRegistry::new(None);
        let first = add(&mut registry, Some("firefox-browser"));
        let second = add(&mut registry, Some("firefox-private"));

        assert_eq!(registry.find("fire"), Some(first));
        assert_eq!(registry.find("private"), Some(second));
        assert_eq!(registry.find("nonexistent"), None);

        registry.remove(first);
        assert_eq!(registry.find("fire"), Some(second));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = SurfaceRegistry::new(Some(1));
        assert_eq!(registry.check_capacity(&native()), Ok(()));
        add(&mut registry, Some("a"));
        assert_eq!(
            registry.check_capacity(&native()),
            Err(RegistryError::Full { max: 1 })
        );
    }

    #[test]
    fn override_redirect_windows_are_not_managed() {
        let mut registry = SurfaceRegistry::new(Some(1));
        let menu = add_kind(&mut registry, override_redirect(), Some("firefox"));

        // Menus neither fill the registry nor answer lookups.
        assert_eq!(registry.check_capacity(&native()), Ok(()));
        assert_eq!(registry.find("fire"), None);

        let window = add(&mut registry, Some("firefox"));
        assert_eq!(registry.find("fire"), Some(window));
        assert_eq!(registry.check_capacity(&override_redirect()), Ok(()));
        assert!(registry.contains(menu));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn placeholder_is_adopted_by_substring() {
        let mut registry = SurfaceRegistry::new(None);
        let geometry = Rectangle::new((1, 2).into(), (3, 4).into());
        registry.set_placeholder("term", geometry);
        registry.set_placeholder("term", geometry);
        assert_eq!(registry.placeholders().len(), 1);

        assert_eq!(registry.take_placeholder_for(UNKNOWN_IDENTIFIER), None);
        let placeholder = registry.take_placeholder_for("foot-terminal").unwrap();
        assert_eq!(placeholder.geometry, geometry);
        assert!(registry.placeholders().is_empty());
    }
}
