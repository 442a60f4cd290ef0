//! Frame scheduling and render element collection.

use std::mem;
use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use smithay::backend::renderer::element::memory::MemoryRenderBufferRenderElement;
use smithay::backend::renderer::element::surface::{
    render_elements_from_surface_tree, WaylandSurfaceRenderElement,
};
use smithay::backend::renderer::element::Kind;
use smithay::backend::renderer::{ImportAll, ImportMem, Renderer};
use smithay::desktop::utils::send_frames_surface_tree;
use smithay::desktop::{layer_map_for_output, LayerMap, PopupManager};
use smithay::input::pointer::CursorImageStatus;
use smithay::output::{Output, PhysicalProperties, Subpixel};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::render_elements;
use smithay::utils::{Logical, Point, Scale, Size};
use smithay::wayland::compositor::SurfaceData;
use smithay::wayland::shell::wlr_layer::Layer;

use super::{Bluewm, RedrawState, SurfaceFrameThrottlingState, FRAME_CALLBACK_THROTTLE};
use crate::backend::{Backend, RenderResult};
use crate::cursor::{RenderCursor, XCursor};
use crate::outputs::OutputId;
use crate::scene::SceneElement;
use crate::utils::get_monotonic_time;

render_elements! {
    pub OutputRenderElements<R> where R: ImportAll + ImportMem;
    Surface = WaylandSurfaceRenderElement<R>,
    NamedPointer = MemoryRenderBufferRenderElement<R>,
}

impl Bluewm {
    pub fn queue_redraw(&mut self, id: OutputId) {
        if let Some(state) = self.outputs.get_mut(&id) {
            state.redraw_state = mem::take(&mut state.redraw_state).queue_redraw();
        }
    }

    pub fn queue_redraw_all(&mut self) {
        for state in self.outputs.values_mut() {
            state.redraw_state = mem::take(&mut state.redraw_state).queue_redraw();
        }
    }

    pub fn redraw_queued_outputs(&mut self, backend: &mut Backend) {
        let _span = tracy_client::span!("Bluewm::redraw_queued_outputs");

        while let Some(id) = self.outputs.iter().find_map(|(id, state)| {
            matches!(
                state.redraw_state,
                RedrawState::Queued | RedrawState::WaitingForEstimatedVBlankAndQueued(_)
            )
            .then_some(*id)
        }) {
            trace!("redrawing output {id:?}");
            self.redraw(backend, id);
        }
    }

    fn redraw(&mut self, backend: &mut Backend, id: OutputId) {
        let _span = tracy_client::span!("Bluewm::redraw");

        let Some(state) = self.outputs.get(&id) else {
            return;
        };
        let target_presentation_time =
            get_monotonic_time() + state.refresh_interval.unwrap_or(Duration::ZERO);

        let Some(frame) = self.session.present_frame(id) else {
            trace!("output {id:?} has no presentation target");
            if let Some(state) = self.outputs.get_mut(&id) {
                state.redraw_state = mem::take(&mut state.redraw_state).skipped();
            }
            return;
        };

        let res = backend.render(self, id, &frame, target_presentation_time);

        if res == RenderResult::Skipped {
            // Update the redraw state on failed render.
            if let Some(state) = self.outputs.get_mut(&id) {
                state.redraw_state = mem::take(&mut state.redraw_state).skipped();
            }
        }

        // Send the frame callbacks.
        self.send_frame_callbacks(id, &frame);
    }

    /// Collects render elements for one output, front to back.
    pub fn render_elements<R>(
        &self,
        renderer: &mut R,
        id: OutputId,
        frame: &[SceneElement],
    ) -> Vec<OutputRenderElements<R>>
    where
        R: Renderer + ImportAll + ImportMem,
        R::TextureId: Clone + 'static,
    {
        let _span = tracy_client::span!("Bluewm::render_elements");

        let Some(output) = self.session.outputs.get(id) else {
            return vec![];
        };
        let Some(state) = self.outputs.get(&id) else {
            return vec![];
        };
        let output_loc = output.geometry().loc;
        let layer_map = layer_map_for_output(&state.output);

        let mut elements = self.pointer_element(renderer, output_loc);

        push_layer_elements(renderer, &layer_map, &[Layer::Overlay, Layer::Top], &mut elements);

        for element in frame.iter().rev() {
            let Some(window) = self.windows.get(element.surface) else {
                continue;
            };
            let Some(surface) = window.wl_surface() else {
                continue;
            };

            let loc = element.geometry.loc - output_loc;
            push_surface_elements(renderer, &surface, loc, &mut elements);
        }

        push_layer_elements(
            renderer,
            &layer_map,
            &[Layer::Bottom, Layer::Background],
            &mut elements,
        );

        elements
    }

    fn pointer_element<R>(
        &self,
        renderer: &mut R,
        output_loc: Point<i32, Logical>,
    ) -> Vec<OutputRenderElements<R>>
    where
        R: Renderer + ImportAll + ImportMem,
        R::TextureId: Clone + 'static,
    {
        if self.seat.get_pointer().is_none() {
            return vec![];
        }

        let pointer_pos = self.session.input.pointer_location() - output_loc.to_f64();
        let scale = Scale::from(1.);

        match self.cursor.get_render_cursor() {
            RenderCursor::Hidden => vec![],
            RenderCursor::Surface { surface, hotspot } => {
                let pointer_pos = (pointer_pos - hotspot.to_f64()).to_physical_precise_round(1.);

                render_elements_from_surface_tree(
                    renderer,
                    &surface,
                    pointer_pos,
                    scale,
                    1.,
                    Kind::Cursor,
                )
                .into_iter()
                .map(OutputRenderElements::Surface)
                .collect()
            }
            RenderCursor::Named { icon, cursor } => {
                let (idx, frame) = cursor.frame(self.start_time.elapsed().as_millis() as u32);
                let hotspot = XCursor::hotspot(frame).to_logical(1);
                let pointer_pos = (pointer_pos - hotspot.to_f64()).to_physical_precise_round(1.);

                let texture = self.cursor.texture(icon, &cursor, idx);
                match MemoryRenderBufferRenderElement::from_buffer(
                    renderer,
                    pointer_pos,
                    &texture,
                    None,
                    None,
                    None,
                    Kind::Cursor,
                ) {
                    Ok(element) => vec![OutputRenderElements::NamedPointer(element)],
                    Err(err) => {
                        warn!("error importing a cursor texture: {err:?}");
                        vec![]
                    }
                }
            }
        }
    }

    /// Paces an output that did not submit a frame by a timer at the estimated vblank.
    pub fn queue_estimated_vblank_timer(
        &mut self,
        id: OutputId,
        target_presentation_time: Duration,
    ) {
        let Some(output_state) = self.outputs.get_mut(&id) else {
            return;
        };

        match mem::take(&mut output_state.redraw_state) {
            RedrawState::Idle | RedrawState::Queued | RedrawState::WaitingForVBlank { .. } => (),
            RedrawState::WaitingForEstimatedVBlank(token)
            | RedrawState::WaitingForEstimatedVBlankAndQueued(token) => {
                output_state.redraw_state = RedrawState::WaitingForEstimatedVBlank(token);
                return;
            }
        }

        let now = get_monotonic_time();
        let mut duration = target_presentation_time.saturating_sub(now);

        // No use setting a zero timer, since we'll send frame callbacks anyway right after the
        // call to render().
        if duration.is_zero() {
            duration += output_state
                .refresh_interval
                .unwrap_or(Duration::from_micros(16_667));
        }

        trace!("queueing estimated vblank timer to fire in {duration:?}");

        let timer = Timer::from_duration(duration);
        let token = self.event_loop.insert_source(timer, move |_, _, state| {
            state.bluewm.on_estimated_vblank_timer(id);
            TimeoutAction::Drop
        });
        output_state.redraw_state = match token {
            Ok(token) => RedrawState::WaitingForEstimatedVBlank(token),
            Err(err) => {
                warn!("error inserting estimated vblank timer: {err}");
                RedrawState::Idle
            }
        };
    }

    fn on_estimated_vblank_timer(&mut self, id: OutputId) {
        let _span = tracy_client::span!("Bluewm::on_estimated_vblank_timer");

        let Some(output_state) = self.outputs.get_mut(&id) else {
            debug!("estimated vblank for a removed output {id:?}");
            return;
        };

        // We waited for the timer, now we can send frame callbacks again.
        output_state.frame_callback_sequence = output_state.frame_callback_sequence.wrapping_add(1);

        match mem::replace(&mut output_state.redraw_state, RedrawState::Idle) {
            RedrawState::WaitingForEstimatedVBlank(_) => (),
            // The timer fired just in front of a redraw.
            RedrawState::WaitingForEstimatedVBlankAndQueued(_) => {
                output_state.redraw_state = RedrawState::Queued;
                return;
            }
            state => {
                error!("unexpected redraw state on estimated vblank: {state:?}");
                output_state.redraw_state = state;
                return;
            }
        }

        if let Some(frame) = self.session.present_frame(id) {
            self.send_frame_callbacks(id, &frame);
        }
    }

    /// Sends frame callbacks to every surface presented on the output, and to the cursor.
    pub fn send_frame_callbacks(&mut self, id: OutputId, frame: &[SceneElement]) {
        let _span = tracy_client::span!("Bluewm::send_frame_callbacks");

        let Some(state) = self.outputs.get(&id) else {
            return;
        };
        let output = &state.output;
        let sequence = state.frame_callback_sequence;

        let should_send = |_surface: &WlSurface, states: &SurfaceData| {
            let frame_throttling_state = states
                .data_map
                .get_or_insert(SurfaceFrameThrottlingState::default);
            let mut last_sent_at = frame_throttling_state.last_sent_at.borrow_mut();

            // If we already sent a frame callback to this surface this output refresh
            // cycle, don't send one again to prevent empty-damage commit busy loops.
            if let Some((last_output, last_sequence)) = &*last_sent_at {
                if last_output == output && *last_sequence == sequence {
                    return None;
                }
            }

            *last_sent_at = Some((output.clone(), sequence));
            Some(output.clone())
        };

        let frame_callback_time = get_monotonic_time();

        let send = |surface: &WlSurface| {
            send_frames_surface_tree(
                surface,
                output,
                frame_callback_time,
                FRAME_CALLBACK_THROTTLE,
                should_send,
            );
            for (popup, _) in PopupManager::popups_for_surface(surface) {
                send_frames_surface_tree(
                    popup.wl_surface(),
                    output,
                    frame_callback_time,
                    FRAME_CALLBACK_THROTTLE,
                    should_send,
                );
            }
        };

        for element in frame {
            if let Some(surface) = self.windows.wl_surface(element.surface) {
                send(&surface);
            }
        }
        for layer in layer_map_for_output(output).layers() {
            send(layer.wl_surface());
        }

        if let CursorImageStatus::Surface(surface) = self.cursor.cursor_image() {
            send_frames_surface_tree(
                surface,
                output,
                frame_callback_time,
                FRAME_CALLBACK_THROTTLE,
                should_send,
            );
        }
    }

    /// Keeps clients that are not shown anywhere ticking at a slow rate.
    pub fn send_frame_callbacks_on_fallback_timer(&mut self) {
        let _span = tracy_client::span!("Bluewm::send_frame_callbacks_on_fallback_timer");

        // Make up a bogus output; we don't care about it here anyway, just the throttling timer.
        let output = Output::new(
            String::new(),
            PhysicalProperties {
                size: Size::from((0, 0)),
                subpixel: Subpixel::Unknown,
                make: String::new(),
                model: String::new(),
                serial_number: String::new(),
            },
        );
        let output = &output;

        let frame_callback_time = get_monotonic_time();

        for (_, window) in self.windows.iter() {
            if let Some(surface) = window.wl_surface() {
                send_frames_surface_tree(
                    &surface,
                    output,
                    frame_callback_time,
                    FRAME_CALLBACK_THROTTLE,
                    |_, _| None,
                );
            }
        }

        if let CursorImageStatus::Surface(surface) = self.cursor.cursor_image() {
            send_frames_surface_tree(
                surface,
                output,
                frame_callback_time,
                FRAME_CALLBACK_THROTTLE,
                |_, _| None,
            );
        }
    }
}

/// Pushes a surface tree and its popups, front to back.
fn push_surface_elements<R>(
    renderer: &mut R,
    surface: &WlSurface,
    loc: Point<i32, Logical>,
    elements: &mut Vec<OutputRenderElements<R>>,
) where
    R: Renderer + ImportAll + ImportMem,
    R::TextureId: Clone + 'static,
{
    let scale = Scale::from(1.);

    for (popup, offset) in PopupManager::popups_for_surface(surface) {
        let popup_loc = loc + offset - popup.geometry().loc;
        elements.extend(
            render_elements_from_surface_tree(
                renderer,
                popup.wl_surface(),
                popup_loc.to_physical(1),
                scale,
                1.,
                Kind::Unspecified,
            )
            .into_iter()
            .map(OutputRenderElements::Surface),
        );
    }

    elements.extend(
        render_elements_from_surface_tree(
            renderer,
            surface,
            loc.to_physical(1),
            scale,
            1.,
            Kind::Unspecified,
        )
        .into_iter()
        .map(OutputRenderElements::Surface),
    );
}

/// Pushes the layer surfaces of `layers`, given top to bottom.
fn push_layer_elements<R>(
    renderer: &mut R,
    map: &LayerMap,
    layers: &[Layer],
    elements: &mut Vec<OutputRenderElements<R>>,
) where
    R: Renderer + ImportAll + ImportMem,
    R::TextureId: Clone + 'static,
{
    for layer in layers {
        // Later surfaces stack on top within a layer.
        for surface in map.layers_on(*layer).rev() {
            if let Some(geometry) = map.layer_geometry(surface) {
                push_surface_elements(renderer, surface.wl_surface(), geometry.loc, elements);
            }
        }
    }
}
