//! Window bookkeeping shared between the event loop and control callers.
//!
//! [`Shell`] pairs the [`SurfaceRegistry`] with the [`SceneGraph`] and keeps the invariant that
//! every registered surface owns exactly one scene node for its whole lifetime. It lives behind a
//! single mutex ([`SharedShell`]): the event loop locks it for each protocol event, control
//! callers lock it for each request.
//!
//! Anything that has to reach a client or the hardware (configure events, gamma ramps) cannot be
//! done from a control caller's thread, so it is queued in [`PendingRequests`] and drained by the
//! event loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::scene::{SceneGraph, SceneNodeId};
use crate::surfaces::{RegistryError, Surface, SurfaceId, SurfaceKind, SurfaceRegistry};

pub type SharedShell = Arc<Mutex<Shell>>;

/// Locks the shared shell, ignoring poisoning.
pub fn lock(shell: &SharedShell) -> MutexGuard<'_, Shell> {
    shell.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellOptions {
    /// Initial position of native windows.
    pub default_offset: Point<i32, Logical>,
    pub max_surfaces: Option<usize>,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            default_offset: Point::from((50, 50)),
            max_surfaces: None,
        }
    }
}

impl ShellOptions {
    pub fn from_config(config: &bluewm_config::Config) -> Self {
        Self {
            default_offset: Point::from((
                config.placement.default_x,
                config.placement.default_y,
            )),
            max_surfaces: config.limits.max_surfaces.map(|max| max as usize),
        }
    }
}

/// Geometry that must be sent to a client as a configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfigure {
    pub surface: SurfaceId,
    pub geometry: Rectangle<i32, Logical>,
}

#[derive(Debug, Default, PartialEq)]
pub struct PendingRequests {
    pub configures: Vec<PendingConfigure>,
    pub brightness: Option<f64>,
}

impl PendingRequests {
    pub fn is_empty(&self) -> bool {
        self.configures.is_empty() && self.brightness.is_none()
    }
}

/// Result of a move/resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResize {
    Moved(SurfaceId),
    Placeholder,
    NotFound,
}

#[derive(Debug)]
pub struct Shell {
    surfaces: SurfaceRegistry,
    scene: SceneGraph,
    options: ShellOptions,
    pending: PendingRequests,
    tiling: bool,
    /// Where tiled windows go: the usable part of the first output.
    tile_area: Option<Rectangle<i32, Logical>>,
}

impl Shell {
    pub fn new(options: ShellOptions) -> Self {
        Self {
            surfaces: SurfaceRegistry::new(options.max_surfaces),
            scene: SceneGraph::new(),
            options,
            pending: PendingRequests::default(),
            tiling: false,
            tile_area: None,
        }
    }

    pub fn into_shared(self) -> SharedShell {
        Arc::new(Mutex::new(self))
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// Output subtrees are owned by the output manager.
    pub(crate) fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers a new surface and its scene node.
    ///
    /// Native windows start at the default offset. Compatibility windows stay unplaced until
    /// their first configure, and become children of their parent's node if it is tracked.
    pub fn on_surface_created(
        &mut self,
        kind: SurfaceKind,
        identifier: Option<&str>,
    ) -> Result<SurfaceId, RegistryError> {
        self.surfaces.check_capacity(&kind)?;

        let parent_node = match &kind {
            SurfaceKind::Compat(compat) => compat
                .parent
                .and_then(|parent| self.surfaces.get(parent))
                .map(Surface::node),
            SurfaceKind::Native(_) => None,
        };

        let id = SurfaceId::next();
        let node = self.scene.create_node(Some(id), parent_node);
        let surface = self.surfaces.insert(kind, identifier, node, id);

        if !surface.kind.is_compat() {
            surface.loc = self.options.default_offset;
            surface.set_placed();
            self.scene.set_position(node, self.options.default_offset);
        }

        debug!(
            "new surface {id} ({:?}): {}",
            kind_name(&surface.kind),
            surface.identifier()
        );

        self.adopt_placeholder(id);
        Ok(id)
    }

    /// Returns `true` if the surface went from unmapped to mapped.
    pub fn on_surface_mapped(&mut self, id: SurfaceId) -> bool {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return false;
        };
        if surface.is_mapped() {
            return false;
        }

        surface.set_mapped(true);
        let node = surface.node();
        trace!("mapped {id}");
        self.scene.set_enabled(node, true);
        self.retile();
        true
    }

    /// Returns `true` if the surface went from mapped to unmapped.
    pub fn on_surface_unmapped(&mut self, id: SurfaceId) -> bool {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return false;
        };
        if !surface.is_mapped() {
            return false;
        }

        surface.set_mapped(false);
        let node = surface.node();
        trace!("unmapped {id}");
        self.scene.set_enabled(node, false);
        self.retile();
        true
    }

    pub fn on_surface_destroyed(&mut self, id: SurfaceId) -> Option<Surface> {
        let surface = self.surfaces.remove(id)?;
        self.scene.remove_node(surface.node());
        self.pending.configures.retain(|c| c.surface != id);
        debug!("destroyed {id}: {}", surface.identifier());
        if surface.is_mapped() {
            self.retile();
        }
        Some(surface)
    }

    /// A compatibility window asked for its own geometry.
    ///
    /// The first configure fixes the initial placement; later ones update it.
    pub fn on_surface_configured(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };

        surface.loc = geometry.loc;
        surface.requested_size = Some(geometry.size);
        surface.set_placed();
        let node = surface.node();

        self.scene.set_absolute_position(node, geometry.loc);
        self.scene.set_size(node, geometry.size);
    }

    /// Records the size of newly committed content.
    pub fn on_surface_committed(&mut self, id: SurfaceId, size: Size<i32, Logical>) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };

        surface.size = size;
        let node = surface.node();
        self.scene.set_size(node, size);
    }

    pub fn set_identifier(&mut self, id: SurfaceId, identifier: Option<&str>) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };

        surface.set_identifier(identifier);
        self.adopt_placeholder(id);
    }

    pub fn set_title(&mut self, id: SurfaceId, title: Option<&str>) {
        if let Some(surface) = self.surfaces.get_mut(id) {
            if let SurfaceKind::Native(native) = &mut surface.kind {
                native.title = title.map(str::to_owned);
            }
        }
    }

    // =========================================================================
    // Queries and placement
    // =========================================================================

    pub fn find(&self, identifier: &str) -> Option<SurfaceId> {
        self.surfaces.find(identifier)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id)
    }

    pub fn surface_for_node(&self, node: SceneNodeId) -> Option<SurfaceId> {
        self.scene.node(node).and_then(|node| node.surface())
    }

    /// Front-most mapped surface under `pos` and the position relative to its origin.
    pub fn surface_under(&self, pos: Point<f64, Logical>) -> Option<(SurfaceId, Point<f64, Logical>)> {
        self.scene
            .node_at(pos)
            .map(|(_, surface, rel)| (surface, rel))
    }

    /// Raises the surface's top-level window to the front.
    pub fn raise(&mut self, id: SurfaceId) -> bool {
        match self.surfaces.get(id) {
            Some(surface) => self.scene.raise(surface.node()),
            None => false,
        }
    }

    /// Moves the first window whose identifier contains `identifier` and requests a new size.
    ///
    /// When nothing matches and `allow_placeholder` is set, the geometry is remembered and applied
    /// to the first matching window that appears later.
    pub fn move_resize(
        &mut self,
        identifier: &str,
        geometry: Rectangle<i32, Logical>,
        allow_placeholder: bool,
    ) -> MoveResize {
        let Some(id) = self.find(identifier) else {
            if allow_placeholder {
                debug!("no surface matches {identifier:?}, recording a placeholder");
                self.surfaces.set_placeholder(identifier, geometry);
                return MoveResize::Placeholder;
            }
            return MoveResize::NotFound;
        };

        self.place(id, geometry);
        MoveResize::Moved(id)
    }

    /// Moves a window to `loc`, keeping its size.
    ///
    /// Returns `false` if the surface is gone.
    pub fn move_window(&mut self, id: SurfaceId, loc: Point<i32, Logical>) -> bool {
        let Some(surface) = self.surfaces.get(id) else {
            return false;
        };
        if surface.loc == loc {
            return true;
        }

        let size = surface.requested_size.unwrap_or(surface.size);
        self.place(id, Rectangle::new(loc, size));
        true
    }

    // =========================================================================
    // Tiling
    // =========================================================================

    pub fn is_tiling(&self) -> bool {
        self.tiling
    }

    pub fn set_tiling(&mut self, tiling: bool) {
        self.tiling = tiling;
        debug!("tiling {}", if tiling { "on" } else { "off" });
        self.retile();
    }

    pub fn set_tile_area(&mut self, area: Option<Rectangle<i32, Logical>>) {
        if self.tile_area != area {
            self.tile_area = area;
            self.retile();
        }
    }

    /// Lays mapped top-level windows out side by side in creation order.
    ///
    /// Windows keep their tiled geometry when tiling is switched off.
    fn retile(&mut self) {
        let (true, Some(area)) = (self.tiling, self.tile_area) else {
            return;
        };

        let ids: Vec<_> = self
            .surfaces
            .iter()
            .filter(|s| s.is_mapped() && s.kind.is_managed() && !has_parent(&s.kind))
            .map(Surface::id)
            .collect();
        let Ok(count) = i32::try_from(ids.len()) else {
            return;
        };
        if count == 0 {
            return;
        }

        let width = area.size.w / count;
        let last = ids.len() - 1;
        let mut x = area.loc.x;
        for (i, id) in ids.into_iter().enumerate() {
            // The last column takes the rounding remainder.
            let w = if i == last {
                area.loc.x + area.size.w - x
            } else {
                width
            };
            let loc = Point::from((x, area.loc.y));
            self.place(id, Rectangle::new(loc, Size::from((w, area.size.h))));
            x += w;
        }
    }

    fn place(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };

        surface.loc = geometry.loc;
        surface.requested_size = Some(geometry.size);
        surface.set_placed();
        let node = surface.node();
        self.scene.set_absolute_position(node, geometry.loc);

        let configure = PendingConfigure {
            surface: id,
            geometry,
        };
        match self.pending.configures.iter_mut().find(|c| c.surface == id) {
            Some(existing) => *existing = configure,
            None => self.pending.configures.push(configure),
        }
    }

    fn adopt_placeholder(&mut self, id: SurfaceId) {
        let Some(identifier) = self
            .surfaces
            .get(id)
            .filter(|s| s.kind.is_managed())
            .map(|s| s.identifier().to_owned())
        else {
            return;
        };
        if let Some(placeholder) = self.surfaces.take_placeholder_for(&identifier) {
            debug!(
                "{id} ({identifier}) adopts placeholder for {:?}",
                placeholder.identifier
            );
            self.place(id, placeholder.geometry);
        }
    }

    // =========================================================================
    // Pending requests
    // =========================================================================

    pub fn request_brightness(&mut self, value: f64) {
        self.pending.brightness = Some(value);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> PendingRequests {
        std::mem::take(&mut self.pending)
    }

    /// Takes only the configures, leaving hardware requests for the event loop.
    pub fn take_configures(&mut self) -> Vec<PendingConfigure> {
        std::mem::take(&mut self.pending.configures)
    }

    /// Removes every surface, returning their ids in registration order.
    pub fn clear(&mut self) -> Vec<SurfaceId> {
        self.tiling = false;
        let ids: Vec<_> = self.surfaces.iter().map(Surface::id).collect();
        for id in &ids {
            self.on_surface_destroyed(*id);
        }
        self.pending = PendingRequests::default();
        ids
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(ShellOptions::default())
    }
}

fn has_parent(kind: &SurfaceKind) -> bool {
    matches!(kind, SurfaceKind::Compat(compat) if compat.parent.is_some())
}

fn kind_name(kind: &SurfaceKind) -> &'static str {
    match kind {
        SurfaceKind::Native(_) => "native",
        SurfaceKind::Compat(_) => "compat",
    }
}

#[cfg(test)]
mod tests;
