//! Scene graph: the paint and stacking order of client surfaces.
//!
//! The graph is a forest. Top-level nodes live in `roots`, ordered back to front; a node's
//! children paint above it, again in back-to-front order. Every node stores its position relative
//! to its parent (or to the global layout for top-level nodes).
//!
//! Nodes refer to their surface by [`SurfaceId`] only, so a stale node never keeps a surface
//! alive. Outputs are registered in a separate presentation list; every output presents the part
//! of the global scene that intersects its layout rectangle.

use std::collections::HashMap;

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::outputs::OutputId;
use crate::surfaces::SurfaceId;
use crate::utils::id::IdCounter;

static SCENE_NODE_ID_COUNTER: IdCounter = IdCounter::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneNodeId(u64);

impl SceneNodeId {
    fn next() -> SceneNodeId {
        SceneNodeId(SCENE_NODE_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    parent: Option<SceneNodeId>,
    children: Vec<SceneNodeId>,
    surface: Option<SurfaceId>,
    /// Position relative to the parent node, or global for top-level nodes.
    loc: Point<i32, Logical>,
    size: Size<i32, Logical>,
    enabled: bool,
}

impl SceneNode {
    pub fn parent(&self) -> Option<SceneNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[SceneNodeId] {
        &self.children
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    pub fn loc(&self) -> Point<i32, Logical> {
        self.loc
    }

    pub fn size(&self) -> Size<i32, Logical> {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Output in the per-output presentation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneOutput {
    pub id: OutputId,
    pub geometry: Rectangle<i32, Logical>,
}

/// Visible surface as presented on screen, in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneElement {
    pub node: SceneNodeId,
    pub surface: SurfaceId,
    pub geometry: Rectangle<i32, Logical>,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<SceneNodeId, SceneNode>,
    /// Top-level nodes, back to front.
    roots: Vec<SceneNodeId>,
    outputs: Vec<SceneOutput>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Creates a disabled node at the front of its sibling list.
    ///
    /// A missing `parent` makes the node top-level.
    pub fn create_node(
        &mut self,
        surface: Option<SurfaceId>,
        parent: Option<SceneNodeId>,
    ) -> SceneNodeId {
        let id = SceneNodeId::next();

        let parent = match parent.and_then(|parent| Some((parent, self.nodes.get_mut(&parent)?))) {
            Some((parent, node)) => {
                node.children.push(id);
                Some(parent)
            }
            None => {
                self.roots.push(id);
                None
            }
        };

        self.nodes.insert(
            id,
            SceneNode {
                parent,
                children: Vec::new(),
                surface,
                loc: Point::from((0, 0)),
                size: Size::from((0, 0)),
                enabled: false,
            },
        );

        id
    }

    /// Removes a node.
    ///
    /// Children are re-parented to the top level at the removed node's place in the stacking
    /// order, keeping their absolute position and relative order.
    pub fn remove_node(&mut self, id: SceneNodeId) -> Option<SceneNode> {
        if !self.nodes.contains_key(&id) {
            return None;
        }

        let origin = self.absolute_position(id);
        let top = self.top_level(id);
        let mut node = self.nodes.remove(&id)?;
        let children = std::mem::take(&mut node.children);

        for child in &children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent = None;
                child.loc += origin;
            }
        }

        match node.parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|x| *x != id);
                }

                // Orphans go to the top level right above the tree they came from.
                let idx = self
                    .roots
                    .iter()
                    .position(|x| *x == top)
                    .map_or(self.roots.len(), |idx| idx + 1);
                self.roots.splice(idx..idx, children.iter().copied());
            }
            None => {
                if let Some(idx) = self.roots.iter().position(|x| *x == id) {
                    self.roots.splice(idx..=idx, children.iter().copied());
                }
            }
        }

        Some(node)
    }

    pub fn node(&self, id: SceneNodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level nodes, back to front.
    pub fn roots(&self) -> &[SceneNodeId] {
        &self.roots
    }

    pub fn set_position(&mut self, id: SceneNodeId, loc: Point<i32, Logical>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.loc = loc;
        }
    }

    /// Moves a node so that its absolute position becomes `loc`.
    pub fn set_absolute_position(&mut self, id: SceneNodeId, loc: Point<i32, Logical>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let origin = node
            .parent
            .map(|parent| self.absolute_position(parent))
            .unwrap_or_default();
        self.set_position(id, loc - origin);
    }

    pub fn set_size(&mut self, id: SceneNodeId, size: Size<i32, Logical>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.size = size;
        }
    }

    pub fn set_enabled(&mut self, id: SceneNodeId, enabled: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.enabled = enabled;
        }
    }

    /// Returns the top-level ancestor of a node (the node itself if it is top-level).
    pub fn top_level(&self, mut id: SceneNodeId) -> SceneNodeId {
        while let Some(parent) = self.nodes.get(&id).and_then(|node| node.parent) {
            id = parent;
        }
        id
    }

    /// Moves the node's top-level ancestor to the front.
    ///
    /// Returns `false` if the node is unknown or already in front.
    pub fn raise(&mut self, id: SceneNodeId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }

        let top = self.top_level(id);
        let Some(idx) = self.roots.iter().position(|x| *x == top) else {
            return false;
        };
        if idx + 1 == self.roots.len() {
            return false;
        }

        let top = self.roots.remove(idx);
        self.roots.push(top);
        true
    }

    pub fn absolute_position(&self, id: SceneNodeId) -> Point<i32, Logical> {
        let mut loc = Point::from((0, 0));
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get(&id)) {
            loc += node.loc;
            current = node.parent;
        }
        loc
    }

    /// Whether the node and all of its ancestors are enabled.
    pub fn is_visible(&self, id: SceneNodeId) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            match self.nodes.get(&id) {
                Some(node) if node.enabled => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Node ids in paint order, back to front.
    pub fn paint_order(&self) -> Vec<SceneNodeId> {
        fn visit(graph: &SceneGraph, id: SceneNodeId, out: &mut Vec<SceneNodeId>) {
            out.push(id);
            if let Some(node) = graph.nodes.get(&id) {
                for child in &node.children {
                    visit(graph, *child, out);
                }
            }
        }

        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            visit(self, *root, &mut out);
        }
        out
    }

    /// Visible surfaces in paint order, back to front.
    pub fn elements(&self) -> Vec<SceneElement> {
        self.paint_order()
            .into_iter()
            .filter(|id| self.is_visible(*id))
            .filter_map(|id| {
                let node = &self.nodes[&id];
                let surface = node.surface?;
                Some(SceneElement {
                    node: id,
                    surface,
                    geometry: Rectangle::new(self.absolute_position(id), node.size),
                })
            })
            .collect()
    }

    /// Visible surfaces intersecting the given output, back to front.
    ///
    /// Returns `None` if the output is not in the presentation list.
    pub fn elements_for_output(&self, output: OutputId) -> Option<Vec<SceneElement>> {
        let output = self.output(output)?;
        let elements = self
            .elements()
            .into_iter()
            .filter(|elem| elem.geometry.overlaps(output.geometry))
            .collect();
        Some(elements)
    }

    /// Finds the front-most visible surface node under `pos`.
    ///
    /// Returns the node and the position relative to the node's origin.
    pub fn node_at(
        &self,
        pos: Point<f64, Logical>,
    ) -> Option<(SceneNodeId, SurfaceId, Point<f64, Logical>)> {
        self.elements().into_iter().rev().find_map(|elem| {
            elem.geometry
                .to_f64()
                .contains(pos)
                .then(|| (elem.node, elem.surface, pos - elem.geometry.loc.to_f64()))
        })
    }

    // =========================================================================
    // Presentation list
    // =========================================================================

    pub fn add_output(&mut self, id: OutputId, geometry: Rectangle<i32, Logical>) {
        if let Some(output) = self.outputs.iter_mut().find(|o| o.id == id) {
            output.geometry = geometry;
        } else {
            self.outputs.push(SceneOutput { id, geometry });
        }
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        let len = self.outputs.len();
        self.outputs.retain(|o| o.id != id);
        self.outputs.len() != len
    }

    pub fn output(&self, id: OutputId) -> Option<&SceneOutput> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn outputs(&self) -> &[SceneOutput] {
        &self.outputs
    }

    #[cfg(test)]
    pub fn verify_invariants(&self) {
        let mut seen = std::collections::HashSet::new();
        for id in self.paint_order() {
            assert!(seen.insert(id), "node {id:?} reachable twice");
        }
        assert_eq!(seen.len(), self.nodes.len(), "every node must be reachable");

        for id in &self.roots {
            assert_eq!(self.nodes[id].parent, None);
        }
        for (id, node) in &self.nodes {
            for child in &node.children {
                assert_eq!(self.nodes[child].parent, Some(*id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mapped_node(
        graph: &mut SceneGraph,
        parent: Option<SceneNodeId>,
        loc: (i32, i32),
        size: (i32, i32),
    ) -> (SceneNodeId, SurfaceId) {
        let surface = SurfaceId::next();
        let node = graph.create_node(Some(surface), parent);
        graph.set_position(node, Point::from(loc));
        graph.set_size(node, Size::from(size));
        graph.set_enabled(node, true);
        (node, surface)
    }

    #[test]
    fn raise_moves_to_front() {
        let mut graph = SceneGraph::new();
        let (a, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));
        let (b, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));
        let (c, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));

        assert!(graph.raise(a));
        assert_eq!(graph.roots(), &[b, c, a]);

        // Already in front.
        assert!(!graph.raise(a));
        assert_eq!(graph.roots(), &[b, c, a]);
        graph.verify_invariants();
    }

    #[test]
    fn raise_child_raises_top_level() {
        let mut graph = SceneGraph::new();
        let (a, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));
        let (child, _) = mapped_node(&mut graph, Some(a), (5, 5), (2, 2));
        let (b, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));

        assert_eq!(graph.top_level(child), a);
        assert!(graph.raise(child));
        assert_eq!(graph.roots(), &[b, a]);
        graph.verify_invariants();
    }

    #[test]
    fn hit_test_front_to_back() {
        let mut graph = SceneGraph::new();
        let (_, back) = mapped_node(&mut graph, None, (0, 0), (100, 100));
        let (_, front) = mapped_node(&mut graph, None, (50, 50), (100, 100));

        let (_, surface, rel) = graph.node_at(Point::from((60., 60.))).unwrap();
        assert_eq!(surface, front);
        assert_eq!(rel, Point::from((10., 10.)));

        let (_, surface, _) = graph.node_at(Point::from((10., 10.))).unwrap();
        assert_eq!(surface, back);

        assert!(graph.node_at(Point::from((500., 500.))).is_none());
    }

    #[test]
    fn disabled_nodes_are_not_hit_or_painted() {
        let mut graph = SceneGraph::new();
        let (back, back_surface) = mapped_node(&mut graph, None, (0, 0), (100, 100));
        let (front, _) = mapped_node(&mut graph, None, (0, 0), (100, 100));
        let (child, _) = mapped_node(&mut graph, Some(back), (0, 0), (10, 10));

        graph.set_enabled(front, false);
        let (node, surface, _) = graph.node_at(Point::from((50., 50.))).unwrap();
        assert_eq!(node, back);
        assert_eq!(surface, back_surface);

        // Hiding a parent hides its children.
        graph.set_enabled(back, false);
        assert!(!graph.is_visible(child));
        assert!(graph.elements().is_empty());
    }

    #[test]
    fn children_paint_above_parent_with_relative_position() {
        let mut graph = SceneGraph::new();
        let (parent, parent_surface) = mapped_node(&mut graph, None, (100, 100), (50, 50));
        let (child, child_surface) = mapped_node(&mut graph, Some(parent), (10, 20), (5, 5));

        let elements = graph.elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].surface, parent_surface);
        assert_eq!(elements[1].surface, child_surface);
        assert_eq!(elements[1].geometry.loc, Point::from((110, 120)));

        graph.set_absolute_position(child, Point::from((0, 0)));
        assert_eq!(graph.node(child).unwrap().loc(), Point::from((-100, -100)));
        assert_eq!(graph.absolute_position(child), Point::from((0, 0)));
    }

    #[test]
    fn remove_reparents_children_in_place() {
        let mut graph = SceneGraph::new();
        let (a, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));
        let (parent, _) = mapped_node(&mut graph, None, (100, 100), (10, 10));
        let (child1, _) = mapped_node(&mut graph, Some(parent), (1, 1), (10, 10));
        let (child2, _) = mapped_node(&mut graph, Some(parent), (2, 2), (10, 10));
        let (b, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));

        graph.remove_node(parent).unwrap();
        assert_eq!(graph.roots(), &[a, child1, child2, b]);
        assert_eq!(graph.absolute_position(child1), Point::from((101, 101)));
        assert_eq!(graph.absolute_position(child2), Point::from((102, 102)));
        graph.verify_invariants();

        assert!(graph.remove_node(parent).is_none());
    }

    #[test]
    fn remove_nested_child_goes_above_its_tree() {
        let mut graph = SceneGraph::new();
        let (root, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));
        let (mid, _) = mapped_node(&mut graph, Some(root), (10, 10), (10, 10));
        let (leaf, _) = mapped_node(&mut graph, Some(mid), (1, 1), (10, 10));
        let (other, _) = mapped_node(&mut graph, None, (0, 0), (10, 10));

        graph.remove_node(mid).unwrap();
        assert_eq!(graph.roots(), &[root, leaf, other]);
        assert_eq!(graph.absolute_position(leaf), Point::from((11, 11)));
        assert!(graph.node(root).unwrap().children().is_empty());
        graph.verify_invariants();
    }

    #[test]
    fn elements_for_output_filters_by_geometry() {
        let mut graph = SceneGraph::new();
        let left = crate::outputs::OutputId::next();
        let right = crate::outputs::OutputId::next();
        graph.add_output(left, Rectangle::new((0, 0).into(), (1920, 1080).into()));
        graph.add_output(right, Rectangle::new((1920, 0).into(), (1280, 1024).into()));

        let (_, on_left) = mapped_node(&mut graph, None, (50, 50), (100, 100));
        let (_, on_right) = mapped_node(&mut graph, None, (2000, 50), (100, 100));
        let (_, spanning) = mapped_node(&mut graph, None, (1900, 50), (100, 100));

        let surfaces = |output| {
            graph
                .elements_for_output(output)
                .unwrap()
                .into_iter()
                .map(|e| e.surface)
                .collect::<Vec<_>>()
        };
        assert_eq!(surfaces(left), vec![on_left, spanning]);
        assert_eq!(surfaces(right), vec![on_right, spanning]);

        assert!(graph.remove_output(left));
        assert!(graph.elements_for_output(left).is_none());
        assert!(!graph.remove_output(left));
    }

    proptest! {
        #[test]
        fn raise_keeps_relative_order_of_others(count in 1usize..12, raise_idx in 0usize..12) {
            let mut graph = SceneGraph::new();
            let nodes: Vec<_> = (0..count)
                .map(|_| mapped_node(&mut graph, None, (0, 0), (1, 1)).0)
                .collect();
            let target = nodes[raise_idx % count];

            graph.raise(target);

            let roots = graph.roots().to_vec();
            prop_assert_eq!(roots.last().copied(), Some(target));
            let others: Vec<_> = nodes.iter().copied().filter(|n| *n != target).collect();
            let rest: Vec<_> = roots.iter().copied().filter(|n| *n != target).collect();
            prop_assert_eq!(others, rest);
            graph.verify_invariants();
        }
    }
}
