use smithay::delegate_layer_shell;
use smithay::desktop::{layer_map_for_output, LayerSurface, WindowSurfaceType};
use smithay::output::Output;
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point};
use smithay::wayland::compositor::with_states;
use smithay::wayland::shell::wlr_layer::{
    self, Layer, LayerSurfaceData, WlrLayerShellHandler, WlrLayerShellState,
};

use crate::bluewm::{Bluewm, State};
use crate::outputs::OutputId;

impl WlrLayerShellHandler for State {
    fn shell_state(&mut self) -> &mut WlrLayerShellState {
        &mut self.bluewm.protocols.layer_shell
    }

    fn new_layer_surface(
        &mut self,
        surface: wlr_layer::LayerSurface,
        wl_output: Option<WlOutput>,
        _layer: Layer,
        namespace: String,
    ) {
        let output = wl_output
            .as_ref()
            .and_then(Output::from_resource)
            .or_else(|| self.bluewm.first_output());
        let Some(output) = output else {
            debug!("no output for layer surface {namespace:?}, closing it");
            surface.send_close();
            return;
        };

        debug!("new layer surface {namespace:?} on {}", output.name());
        let mut map = layer_map_for_output(&output);
        if let Err(err) = map.map_layer(&LayerSurface::new(surface, namespace)) {
            warn!("error mapping layer surface: {err:?}");
        }
    }

    fn layer_destroyed(&mut self, surface: wlr_layer::LayerSurface) {
        let Some((id, output)) = self.bluewm.layer_output(surface.wl_surface()) else {
            return;
        };

        {
            let mut map = layer_map_for_output(&output);
            let layer = map
                .layer_for_surface(surface.wl_surface(), WindowSurfaceType::TOPLEVEL)
                .cloned();
            if let Some(layer) = layer {
                map.unmap_layer(&layer);
            }
        }

        self.bluewm.refresh_tile_area();
        self.bluewm.queue_redraw(id);
    }
}
delegate_layer_shell!(State);

impl State {
    /// Arranges the output of a committed layer surface.
    ///
    /// Returns `false` if the surface is not a layer surface.
    pub(super) fn on_layer_commit(&mut self, surface: &WlSurface) -> bool {
        let Some((id, output)) = self.bluewm.layer_output(surface) else {
            return false;
        };

        let initial_configure_sent = with_states(surface, |states| {
            states
                .data_map
                .get::<LayerSurfaceData>()
                .and_then(|data| data.lock().ok().map(|data| data.initial_configure_sent))
                .unwrap_or(false)
        });

        {
            let mut map = layer_map_for_output(&output);
            // Anchors and exclusive zones depend on every layer of the output.
            map.arrange();

            if !initial_configure_sent {
                if let Some(layer) = map.layer_for_surface(surface, WindowSurfaceType::TOPLEVEL) {
                    layer.layer_surface().send_configure();
                }
            }
        }

        self.bluewm.refresh_tile_area();
        self.bluewm.queue_redraw(id);
        true
    }
}

impl Bluewm {
    pub fn output_id(&self, output: &Output) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|(_, state)| &state.output == output)
            .map(|(id, _)| *id)
    }

    /// The leftmost output, where layer surfaces without a preference go.
    pub fn first_output(&self) -> Option<Output> {
        let first = self.session.outputs.iter().next()?;
        self.outputs
            .get(&first.id())
            .map(|state| state.output.clone())
    }

    /// The output whose layer map holds `surface`.
    pub fn layer_output(&self, surface: &WlSurface) -> Option<(OutputId, Output)> {
        self.outputs.iter().find_map(|(id, state)| {
            let map = layer_map_for_output(&state.output);
            map.layer_for_surface(surface, WindowSurfaceType::ALL)
                .map(|_| (*id, state.output.clone()))
        })
    }

    /// The layer surface on one of `layers` under `pos`, and its origin in global coordinates.
    ///
    /// Layers are tried in the given order.
    pub fn layer_surface_under(
        &self,
        pos: Point<f64, Logical>,
        layers: &[Layer],
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        let managed = self.session.outputs.output_under(pos)?;
        let state = self.outputs.get(&managed.id())?;
        let output_loc = managed.geometry().loc;
        let pos_within_output = pos - output_loc.to_f64();

        let map = layer_map_for_output(&state.output);
        layers.iter().find_map(|layer| {
            let layer_surface = map.layer_under(*layer, pos_within_output)?;
            let layer_loc = map.layer_geometry(layer_surface)?.loc;
            let (surface, loc) = layer_surface
                .surface_under(pos_within_output - layer_loc.to_f64(), WindowSurfaceType::ALL)?;
            Some((surface, (output_loc + layer_loc + loc).to_f64()))
        })
    }

    /// Asks the layer surfaces of a disappearing output to go away.
    pub(crate) fn close_layer_surfaces(&self, output: &Output) {
        let map = layer_map_for_output(output);
        for layer in map.layers() {
            layer.layer_surface().send_close();
        }
    }
}
