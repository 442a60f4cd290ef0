//! TTY/DRM backend for native display.
//!
//! `Tty` holds the libseat session, udev and libinput, and dispatches their events. DRM device
//! state lives in [`DeviceManager`].

mod devices;
mod helpers;
mod types;

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context};
use bluewm_config::Config;
use libc::dev_t;
use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::backend::drm::compositor::{FrameFlags, PrimaryPlaneElement};
use smithay::backend::drm::{DrmEventMetadata, DrmEventTime, DrmNode, NodeType};
use smithay::backend::egl::context::ContextPriority;
use smithay::backend::libinput::{LibinputInputBackend, LibinputSessionInterface};
use smithay::backend::renderer::multigpu::gbm::GbmGlesBackend;
use smithay::backend::renderer::multigpu::GpuManager;
use smithay::backend::renderer::ImportDma;
use smithay::backend::session::libseat::LibSeatSession;
use smithay::backend::session::{Event as SessionEvent, Session};
use smithay::backend::udev::{self, UdevBackend, UdevEvent};
use smithay::output::Mode;
use smithay::reexports::calloop::{Dispatcher, LoopHandle};
use smithay::reexports::drm::control::crtc;
use smithay::reexports::input::Libinput;

use devices::DeviceManager;

use super::RenderResult;
use crate::bluewm::{Bluewm, RedrawState, State};
use crate::outputs::{OutputBackend, OutputId};
use crate::scene::SceneElement;

pub struct Tty {
    session: LibSeatSession,
    udev_dispatcher: Dispatcher<'static, UdevBackend, State>,
    libinput: Libinput,
    devices: DeviceManager,
}

impl Tty {
    pub fn new(
        config: Rc<RefCell<Config>>,
        event_loop: LoopHandle<'static, State>,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Tty::new");

        if let Some(backend) = &config.borrow().session.libseat_backend {
            debug!("forcing libseat backend: {backend}");
            std::env::set_var("LIBSEAT_BACKEND", backend);
        }

        let (session, notifier) = LibSeatSession::new().context(
            "Error creating a session. This might mean that you're trying to run bluewm on a TTY \
             that is already busy",
        )?;
        let seat_name = session.seat();

        let udev_backend =
            UdevBackend::new(session.seat()).context("error creating a udev backend")?;
        let udev_dispatcher = Dispatcher::new(udev_backend, move |event, _, state: &mut State| {
            state.backend.tty().on_udev_event(&mut state.bluewm, event);
        });
        event_loop
            .register_dispatcher(udev_dispatcher.clone())
            .map_err(|err| anyhow!("error registering the udev dispatcher: {err}"))?;

        let mut libinput = Libinput::new_with_udev(LibinputSessionInterface::from(session.clone()));
        {
            let _span = tracy_client::span!("Libinput::udev_assign_seat");
            libinput.udev_assign_seat(&seat_name)
        }
        .map_err(|()| anyhow!("error assigning the seat to libinput"))?;

        let input_backend = LibinputInputBackend::new(libinput.clone());
        event_loop
            .insert_source(input_backend, |event, _, state| {
                state.process_input_event(event);
            })
            .map_err(|err| anyhow!("error inserting the libinput source: {err}"))?;

        event_loop
            .insert_source(notifier, move |event, _, state| {
                state
                    .backend
                    .tty()
                    .on_session_event(&mut state.bluewm, event);
            })
            .map_err(|err| anyhow!("error inserting the session notifier: {err}"))?;

        let api = GbmGlesBackend::with_context_priority(ContextPriority::High);
        let gpu_manager = GpuManager::new(api).context("error creating the GPU manager")?;

        let primary_gpu_path = udev::primary_gpu(&seat_name)
            .context("error getting the primary GPU")?
            .context("couldn't find a GPU")?;
        let primary_node = DrmNode::from_path(primary_gpu_path)
            .context("error opening the primary GPU DRM node")?;
        let primary_render_node = primary_node
            .node_with_type(NodeType::Render)
            .and_then(Result::ok)
            .unwrap_or_else(|| {
                warn!("error getting the render node for the primary GPU; proceeding anyway");
                primary_node
            });

        match primary_render_node.dev_path() {
            Some(path) => info!("using as the render node: {path:?}"),
            None => info!("using as the render node: {primary_render_node}"),
        }

        Ok(Self {
            session,
            udev_dispatcher,
            libinput,
            devices: DeviceManager::new(primary_node, primary_render_node, gpu_manager),
        })
    }

    /// Opens the GPUs present at startup.
    ///
    /// Failing to bring up the primary GPU's renderer or allocator is fatal; other devices are
    /// skipped with a warning.
    pub fn init(&mut self, bluewm: &mut Bluewm) -> anyhow::Result<()> {
        let udev = self.udev_dispatcher.clone();
        let udev = udev.as_source_ref();

        // Initialize the primary node first as later nodes might depend on the primary render node
        // being available.
        let primary_dev_id = self.devices.primary_node().dev_id();
        let (device_id, path) = udev
            .device_list()
            .find(|&(device_id, _)| device_id == primary_dev_id)
            .context("the primary GPU is missing from the udev device list")?;
        self.device_added(device_id, path, bluewm)
            .context("error adding the primary GPU")?;
        ensure!(
            self.devices.has_primary_renderer(),
            "error creating the renderer on the primary GPU"
        );

        for (device_id, path) in udev.device_list() {
            if device_id == primary_dev_id {
                continue;
            }

            if let Err(err) = self.device_added(device_id, path, bluewm) {
                warn!("error adding device: {err:?}");
            }
        }

        Ok(())
    }

    fn on_udev_event(&mut self, bluewm: &mut Bluewm, event: UdevEvent) {
        let _span = tracy_client::span!("Tty::on_udev_event");

        if !self.session.is_active() {
            debug!("skipping {event:?} as session is inactive");
            return;
        }

        match event {
            UdevEvent::Added { device_id, path } => {
                if let Err(err) = self.device_added(device_id, &path, bluewm) {
                    warn!("error adding device: {err:?}");
                }
            }
            UdevEvent::Changed { device_id } => {
                self.devices.device_changed(device_id, bluewm, false)
            }
            UdevEvent::Removed { device_id } => self.device_removed(device_id, bluewm),
        }
    }

    fn on_session_event(&mut self, bluewm: &mut Bluewm, event: SessionEvent) {
        let _span = tracy_client::span!("Tty::on_session_event");

        match event {
            SessionEvent::PauseSession => {
                debug!("pausing session");

                self.libinput.suspend();
                self.devices.pause_devices();
            }
            SessionEvent::ActivateSession => {
                debug!("resuming session");

                if self.libinput.resume().is_err() {
                    warn!("error resuming libinput");
                }

                let mut device_list = self
                    .udev_dispatcher
                    .as_source_ref()
                    .device_list()
                    .map(|(device_id, path)| (device_id, path.to_owned()))
                    .collect::<HashMap<_, _>>();

                for node in self.devices.nodes() {
                    if device_list.remove(&node.dev_id()).is_none() {
                        self.device_removed(node.dev_id(), bluewm);
                        continue;
                    }

                    if let Some(device) = self.devices.get_mut(&node) {
                        if let Err(err) = device.activate() {
                            warn!("error activating DRM device: {err:?}");
                        }
                    }

                    // Refresh the connectors.
                    self.devices.device_changed(node.dev_id(), bluewm, true);
                }

                for (device_id, path) in device_list {
                    if let Err(err) = self.device_added(device_id, &path, bluewm) {
                        warn!("error adding device: {err:?}");
                    }
                }

                bluewm.queue_redraw_all();
            }
        }
    }

    fn device_added(
        &mut self,
        device_id: dev_t,
        path: &Path,
        bluewm: &mut Bluewm,
    ) -> anyhow::Result<()> {
        self.devices
            .device_added(device_id, path, &mut self.session, bluewm)?;
        self.devices.device_changed(device_id, bluewm, true);
        Ok(())
    }

    fn device_removed(&mut self, device_id: dev_t, bluewm: &mut Bluewm) {
        if let Some(fd) = self.devices.device_removed(device_id, bluewm) {
            if let Err(err) = self.session.close(fd) {
                warn!("error closing DRM device fd: {err:?}");
            }
        }
    }

    fn on_vblank(
        &mut self,
        bluewm: &mut Bluewm,
        node: DrmNode,
        crtc: crtc::Handle,
        meta: DrmEventMetadata,
    ) {
        let span = tracy_client::span!("Tty::on_vblank");

        let Some(device) = self.devices.get_mut(&node) else {
            // I've seen it happen.
            error!("missing device in vblank callback for crtc {crtc:?}");
            return;
        };

        let Some(surface) = device.surface_mut(crtc) else {
            error!("missing surface in vblank callback for crtc {crtc:?}");
            return;
        };

        span.emit_text(&surface.name);
        trace!("vblank on {} {meta:?}", surface.name);
        drop(surface.vblank_frame.take());

        let presentation_time = match meta.time {
            DrmEventTime::Monotonic(time) => time,
            // Not supported.
            DrmEventTime::Realtime(_) => Duration::ZERO,
        };

        match surface.compositor.frame_submitted() {
            Ok(Some(target_presentation_time)) => {
                if !presentation_time.is_zero() {
                    let misprediction_s =
                        presentation_time.as_secs_f64() - target_presentation_time.as_secs_f64();
                    if let Some(tracy) = tracy_client::Client::running() {
                        tracy.plot(
                            surface.presentation_misprediction_plot_name,
                            misprediction_s * 1000.,
                        );
                    }
                }
            }
            Ok(None) => (),
            Err(err) => warn!("error marking frame as submitted: {err}"),
        }

        let id = surface.id;
        let Some(output_state) = bluewm.outputs.get_mut(&id) else {
            error!("missing output state for {}", surface.name);
            return;
        };

        // Mark the last frame as submitted.
        let redraw_needed = match mem::replace(&mut output_state.redraw_state, RedrawState::Idle) {
            RedrawState::WaitingForVBlank { redraw_needed } => redraw_needed,
            state => {
                error!("unexpected redraw state on vblank: {state:?}");
                true
            }
        };
        output_state.frame_callback_sequence = output_state.frame_callback_sequence.wrapping_add(1);

        if redraw_needed {
            bluewm.queue_redraw(id);
        } else if let Some(frame) = bluewm.session.present_frame(id) {
            bluewm.send_frame_callbacks(id, &frame);
        }
    }

    pub fn seat_name(&self) -> String {
        self.session.seat()
    }

    pub fn render(
        &mut self,
        bluewm: &mut Bluewm,
        id: OutputId,
        frame: &[SceneElement],
        target_presentation_time: Duration,
    ) -> RenderResult {
        let span = tracy_client::span!("Tty::render");

        let mut rv = RenderResult::Skipped;

        let Some(state) = self.devices.output(id) else {
            error!("missing output state for {id:?}");
            return rv;
        };

        let primary_render_node = self.devices.primary_render_node();

        let (render_node, format) = {
            let Some(device) = self.devices.get(&state.node) else {
                error!("missing output device");
                return rv;
            };

            let Some(surface) = device.surface(state.crtc) else {
                // Connected, but the session did not enable it.
                return rv;
            };
            span.emit_text(&surface.name);

            if !device.drm().is_active() {
                // This branch hits any time we try to render while the user had switched to a
                // different VT, so don't print anything here.
                return rv;
            }

            (
                device.render_node().unwrap_or(primary_render_node),
                surface.compositor.format(),
            )
        };

        let (gpu_manager, devices) = self.devices.gpu_manager_and_devices_mut();
        let mut renderer = match gpu_manager.renderer(&primary_render_node, &render_node, format) {
            Ok(renderer) => renderer,
            Err(err) => {
                warn!("error creating renderer for primary GPU: {err:?}");
                return rv;
            }
        };

        let elements = bluewm.render_elements(&mut renderer, id, frame);

        let Some(surface) = devices
            .get_mut(&state.node)
            .and_then(|device| device.surface_mut(state.crtc))
        else {
            return rv;
        };

        // Hand them over to the DRM.
        let flags = FrameFlags::ALLOW_PRIMARY_PLANE_SCANOUT_ANY
            | FrameFlags::ALLOW_CURSOR_PLANE_SCANOUT;
        let drm_compositor = &mut surface.compositor;
        match drm_compositor.render_frame(&mut renderer, &elements, [0.; 4], flags) {
            Ok(res) => {
                if res.needs_sync() {
                    if let PrimaryPlaneElement::Swapchain(element) = res.primary_element {
                        let _span = tracy_client::span!("wait for completion");
                        if let Err(err) = element.sync.wait() {
                            warn!("error waiting for frame completion: {err:?}");
                        }
                    }
                }

                if !res.is_empty {
                    match drm_compositor.queue_frame(target_presentation_time) {
                        Ok(()) => {
                            if let Some(output_state) = bluewm.outputs.get_mut(&id) {
                                let new_state = RedrawState::WaitingForVBlank {
                                    redraw_needed: false,
                                };
                                if let RedrawState::WaitingForEstimatedVBlankAndQueued(token) =
                                    mem::replace(&mut output_state.redraw_state, new_state)
                                {
                                    bluewm.event_loop.remove(token);
                                }

                                // The client buffers of this frame were latched, so a new commit
                                // will wait for the next VBlank.
                                output_state.frame_callback_sequence =
                                    output_state.frame_callback_sequence.wrapping_add(1);
                            }

                            surface.vblank_frame = tracy_client::Client::running()
                                .map(|tracy| tracy.non_continuous_frame(surface.vblank_frame_name));

                            return RenderResult::Submitted;
                        }
                        Err(err) => {
                            warn!("error queueing frame: {err}");
                        }
                    }
                } else {
                    rv = RenderResult::NoDamage;
                }
            }
            Err(err) => {
                // Can fail if we switched to a different TTY.
                warn!("error rendering frame: {err}");
            }
        }

        // We're not expecting a vblank right after this.
        drop(surface.vblank_frame.take());

        bluewm.queue_estimated_vblank_timer(id, target_presentation_time);

        rv
    }

    pub fn change_vt(&mut self, vt: i32) {
        if let Err(err) = self.session.change_vt(vt) {
            warn!("error changing VT: {err}");
        }
    }

    pub fn import_dmabuf(&mut self, dmabuf: &Dmabuf) -> bool {
        let primary_render_node = self.devices.primary_render_node();
        let mut renderer = match self
            .devices
            .gpu_manager_mut()
            .single_renderer(&primary_render_node)
        {
            Ok(renderer) => renderer,
            Err(err) => {
                debug!("error creating renderer for primary GPU: {err:?}");
                return false;
            }
        };

        match renderer.import_dmabuf(dmabuf, None) {
            Ok(_texture) => {
                dmabuf.set_node(Some(primary_render_node));
                true
            }
            Err(err) => {
                debug!("error importing dmabuf: {err:?}");
                false
            }
        }
    }
}

impl OutputBackend for Tty {
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()> {
        self.devices.init_render(output, mode)
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()> {
        self.devices.set_gamma(output, ramp)
    }
}
