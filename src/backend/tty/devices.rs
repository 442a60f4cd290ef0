//! DRM device management for the TTY backend.
//!
//! OWNS:
//! - every opened DRM device (GPU), its connectors and enabled CRTCs
//! - the GPU manager and the dmabuf global of the primary renderer
//! - the mapping from session outputs to CRTCs
//!
//! Output modes are picked by the session: a connected connector is announced with
//! [`Bluewm::add_output`], which calls back into [`OutputBackend::init_render`] to create the
//! DRM compositor for the chosen mode.

use std::collections::{HashMap, HashSet};
use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use libc::dev_t;
use smithay::backend::allocator::format::FormatSet;
use smithay::backend::allocator::gbm::{GbmAllocator, GbmBufferFlags, GbmDevice};
use smithay::backend::drm::compositor::DrmCompositor;
use smithay::backend::drm::exporter::gbm::GbmFramebufferExporter;
use smithay::backend::drm::{DrmDevice, DrmDeviceFd, DrmEvent, DrmNode, NodeType};
use smithay::backend::egl::{EGLDevice, EGLDisplay};
use smithay::backend::renderer::gles::GlesRenderer;
use smithay::backend::renderer::multigpu::gbm::GbmGlesBackend;
use smithay::backend::renderer::multigpu::GpuManager;
use smithay::backend::renderer::{ImportDma, ImportEgl};
use smithay::backend::session::libseat::LibSeatSession;
use smithay::backend::session::Session;
use smithay::output::{Mode, OutputModeSource};
use smithay::reexports::calloop::timer::{TimeoutAction, Timer};
use smithay::reexports::calloop::RegistrationToken;
use smithay::reexports::drm::control::dumbbuffer::DumbBuffer;
use smithay::reexports::drm::control::{
    connector, crtc, plane, property, AtomicCommitFlags, Device, PlaneType,
};
use smithay::reexports::drm::control::atomic::AtomicModeReq;
use smithay::reexports::gbm::Modifier;
use smithay::reexports::rustix::fs::OFlags;
use smithay::utils::{DeviceFd, Scale, Transform};
use smithay::wayland::dmabuf::{DmabufFeedbackBuilder, DmabufGlobal};
use smithay_drm_extras::drm_scanner::{DrmScanEvent, DrmScanner};

use super::helpers::{
    describe_connector, find_drm_property, format_connector_name, legacy_gamma_size, reset_hdr,
    set_gamma_for_crtc,
};
use super::types::{
    ConnectorProperties, GammaProps, GbmDrmCompositor, PendingConnector, Surface,
    TtyOutputState, SUPPORTED_COLOR_FORMATS,
};
use crate::bluewm::{Bluewm, State};
use crate::outputs::{OutputBackend, OutputId};

/// A DRM device (GPU) with its connectors.
pub struct OutputDevice {
    token: RegistrationToken,
    /// Can be None for display-only devices such as DisplayLink.
    render_node: Option<DrmNode>,
    drm_scanner: DrmScanner,
    /// Enabled CRTCs.
    surfaces: HashMap<crtc::Handle, Surface>,
    /// Connected CRTCs, enabled or not.
    known_crtcs: HashMap<crtc::Handle, OutputId>,
    pending: HashMap<OutputId, PendingConnector>,
    /// SAFETY: drop after all the objects used with them are dropped.
    /// See https://github.com/Smithay/smithay/issues/1102.
    drm: DrmDevice,
    gbm: GbmDevice<DrmDeviceFd>,
    /// For display-only devices this will be the allocator from the primary device.
    allocator: GbmAllocator<DrmDeviceFd>,
}

impl OutputDevice {
    pub(super) fn drm(&self) -> &DrmDevice {
        &self.drm
    }

    pub(super) fn render_node(&self) -> Option<DrmNode> {
        self.render_node
    }

    pub(super) fn surface_mut(&mut self, crtc: crtc::Handle) -> Option<&mut Surface> {
        self.surfaces.get_mut(&crtc)
    }

    pub(super) fn surface(&self, crtc: crtc::Handle) -> Option<&Surface> {
        self.surfaces.get(&crtc)
    }

    /// Pauses the device while another VT is active.
    pub(super) fn pause(&mut self) {
        self.drm.pause();
    }

    /// Takes the device back after a VT switch and re-commits the gamma ramps.
    pub(super) fn activate(&mut self) -> anyhow::Result<()> {
        self.drm
            .activate(false)
            .context("error activating DRM device")?;

        for (crtc, surface) in &mut self.surfaces {
            match ConnectorProperties::try_new(&self.drm, surface.connector) {
                Ok(props) => {
                    if let Err(err) = reset_hdr(&props) {
                        debug!("couldn't reset HDR properties: {err:?}");
                    }
                }
                Err(err) => warn!("failed to get connector properties: {err:?}"),
            }

            let res = if let Some(ramp) = surface.pending_gamma_change.take() {
                match &mut surface.gamma_props {
                    Some(gamma_props) => gamma_props.set_gamma(&self.drm, Some(&ramp)),
                    None => set_gamma_for_crtc(&self.drm, *crtc, Some(&ramp)),
                }
            } else if let Some(gamma_props) = &surface.gamma_props {
                gamma_props.restore_gamma(&self.drm)
            } else {
                Ok(())
            };
            if let Err(err) = res {
                warn!("error restoring gamma on {}: {err:?}", surface.name);
            }
        }

        Ok(())
    }

    /// Disables every CRTC and plane that does not drive one of our connectors.
    ///
    /// Connectors whose current CRTC is not the one the scanner picked are cleared too, so that
    /// every connector gets its expected CRTC afterwards.
    fn cleanup_mismatching_resources(&self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("OutputDevice::cleanup_mismatching_resources");

        let res_handles = self
            .drm
            .resource_handles()
            .context("error getting resource handles")?;
        let plane_handles = self
            .drm
            .plane_handles()
            .context("error getting plane handles")?;

        let mut req = AtomicModeReq::new();

        let mut cleanup = HashSet::<crtc::Handle>::new();
        cleanup.extend(res_handles.crtcs());

        for (conn, info) in self.drm_scanner.connectors() {
            if let Some(crtc) = self.drm_scanner.crtc_for_connector(conn) {
                let current_crtc = info.current_encoder().map(|enc| {
                    self.drm
                        .get_encoder(enc)
                        .map(|enc| enc.crtc())
                        .map_err(|err| debug!("couldn't get encoder: {err:?}"))
                });
                let has_different_crtc = match current_crtc {
                    None | Some(Ok(None)) => false,
                    Some(Ok(Some(current))) => current != crtc,
                    Some(Err(())) => true,
                };

                if !has_different_crtc {
                    cleanup.remove(&crtc);
                    continue;
                }
            }

            let Some((crtc_id, _, _)) = find_drm_property(&self.drm, *conn, "CRTC_ID") else {
                debug!("couldn't find connector CRTC_ID property");
                continue;
            };
            req.add_property(*conn, crtc_id, property::Value::CRTC(None));
        }

        // Legacy fallback.
        if !self.drm.is_atomic() {
            for crtc in res_handles.crtcs() {
                #[allow(deprecated)]
                let _ = self.drm.set_cursor(*crtc, Option::<&DumbBuffer>::None);
            }
            for crtc in cleanup {
                let _ = self.drm.set_crtc(crtc, None, (0, 0), &[], None);
            }
            return Ok(());
        }

        let is_primary = |plane: plane::Handle| match find_drm_property(&self.drm, plane, "type") {
            Some((_, info, value)) => matches!(
                info.value_type().convert_value(value),
                property::Value::Enum(Some(val)) if val.value() == PlaneType::Primary as u64
            ),
            None => false,
        };

        // Disable non-primary planes, and planes belonging to disabled CRTCs.
        for plane in plane_handles {
            let Some(crtc) = self.drm.get_plane(plane).ok().and_then(|info| info.crtc()) else {
                continue;
            };
            if !cleanup.contains(&crtc) && is_primary(plane) {
                continue;
            }

            let props = (
                find_drm_property(&self.drm, plane, "CRTC_ID"),
                find_drm_property(&self.drm, plane, "FB_ID"),
            );
            let (Some((crtc_id, _, _)), Some((fb_id, _, _))) = props else {
                debug!("couldn't find plane CRTC_ID or FB_ID property");
                continue;
            };

            req.add_property(plane, crtc_id, property::Value::CRTC(None));
            req.add_property(plane, fb_id, property::Value::Framebuffer(None));
        }

        for crtc in cleanup {
            let props = (
                find_drm_property(&self.drm, crtc, "MODE_ID"),
                find_drm_property(&self.drm, crtc, "ACTIVE"),
            );
            let (Some((mode_id, _, _)), Some((active, _, _))) = props else {
                debug!("couldn't find CRTC MODE_ID or ACTIVE property");
                continue;
            };

            req.add_property(crtc, mode_id, property::Value::Unknown(0));
            req.add_property(crtc, active, property::Value::Boolean(false));
        }

        self.drm
            .atomic_commit(AtomicCommitFlags::ALLOW_MODESET, req)
            .context("error doing atomic commit")?;

        Ok(())
    }
}

pub struct DeviceManager {
    /// Devices indexed by DRM node (not necessarily the render node).
    devices: HashMap<DrmNode, OutputDevice>,
    /// DRM node corresponding to the primary GPU. May or may not be the same as
    /// primary_render_node.
    primary_node: DrmNode,
    /// DRM render node corresponding to the primary GPU.
    primary_render_node: DrmNode,
    gpu_manager: GpuManager<GbmGlesBackend<GlesRenderer, DrmDeviceFd>>,
    /// The dmabuf global corresponds to the primary render device.
    dmabuf_global: Option<DmabufGlobal>,
    /// Where every output the session knows about lives.
    outputs: HashMap<OutputId, TtyOutputState>,
}

impl DeviceManager {
    pub fn new(
        primary_node: DrmNode,
        primary_render_node: DrmNode,
        gpu_manager: GpuManager<GbmGlesBackend<GlesRenderer, DrmDeviceFd>>,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            primary_node,
            primary_render_node,
            gpu_manager,
            dmabuf_global: None,
            outputs: HashMap::new(),
        }
    }

    pub fn primary_node(&self) -> DrmNode {
        self.primary_node
    }

    pub fn primary_render_node(&self) -> DrmNode {
        self.primary_render_node
    }

    /// Whether the renderer on the primary render node is up.
    pub fn has_primary_renderer(&self) -> bool {
        self.dmabuf_global.is_some()
    }

    pub(super) fn nodes(&self) -> Vec<DrmNode> {
        self.devices.keys().copied().collect()
    }

    pub(super) fn get(&self, node: &DrmNode) -> Option<&OutputDevice> {
        self.devices.get(node)
    }

    pub(super) fn get_mut(&mut self, node: &DrmNode) -> Option<&mut OutputDevice> {
        self.devices.get_mut(node)
    }

    pub(super) fn pause_devices(&mut self) {
        for device in self.devices.values_mut() {
            device.pause();
        }
    }

    pub(super) fn gpu_manager_mut(
        &mut self,
    ) -> &mut GpuManager<GbmGlesBackend<GlesRenderer, DrmDeviceFd>> {
        &mut self.gpu_manager
    }

    /// Split borrow to use a renderer and a device at the same time.
    pub(super) fn gpu_manager_and_devices_mut(
        &mut self,
    ) -> (
        &mut GpuManager<GbmGlesBackend<GlesRenderer, DrmDeviceFd>>,
        &mut HashMap<DrmNode, OutputDevice>,
    ) {
        (&mut self.gpu_manager, &mut self.devices)
    }

    pub(super) fn output(&self, id: OutputId) -> Option<TtyOutputState> {
        self.outputs.get(&id).copied()
    }

    /// Opens a DRM device and sets up its renderer.
    ///
    /// The first device that renders on the primary render node also creates the dmabuf global.
    pub(super) fn device_added(
        &mut self,
        device_id: dev_t,
        path: &Path,
        session: &mut LibSeatSession,
        bluewm: &mut Bluewm,
    ) -> anyhow::Result<()> {
        debug!("adding device: {device_id} {path:?}");

        let node = DrmNode::from_dev_id(device_id)?;

        // Only consider primary node on udev event
        // https://gitlab.freedesktop.org/wlroots/wlroots/-/commit/768fbaad54027f8dd027e7e015e8eeb93cb38c52
        if node.ty() != NodeType::Primary {
            debug!("not a primary node, skipping");
            return Ok(());
        }

        let _span = tracy_client::span!("DeviceManager::device_added");

        let open_flags = OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK;
        let fd = session.open(path, open_flags)?;
        let device_fd = DrmDeviceFd::new(DeviceFd::from(fd));

        let (drm, drm_notifier) = DrmDevice::new(device_fd.clone(), false)?;
        let gbm = GbmDevice::new(device_fd)?;

        let mut try_initialize_gpu = || {
            let display = unsafe { EGLDisplay::new(gbm.clone())? };
            let egl_device = EGLDevice::device_for_display(&display)?;

            // Software EGL devices segfault on importing dmabufs from other renderers.
            ensure!(
                !egl_device.is_software(),
                "software EGL renderers are skipped"
            );

            let render_node = egl_device
                .try_get_render_node()
                .ok()
                .flatten()
                .unwrap_or(node);
            self.gpu_manager
                .as_mut()
                .add_node(render_node, gbm.clone())
                .context("error adding render node to GPU manager")?;

            Ok(render_node)
        };

        let render_node = match try_initialize_gpu() {
            Ok(render_node) => {
                debug!("got render node: {render_node}");
                Some(render_node)
            }
            Err(err) => {
                debug!("failed to initialize renderer, falling back to primary gpu: {err:?}");
                None
            }
        };

        if render_node == Some(self.primary_render_node) && self.dmabuf_global.is_none() {
            self.init_primary_renderer(bluewm)?;
        }

        let allocator_gbm = if render_node.is_some() {
            gbm.clone()
        } else if let Some(primary_device) = self.devices.get(&self.primary_node) {
            primary_device.gbm.clone()
        } else {
            bail!("no allocator available for device");
        };
        let gbm_flags = GbmBufferFlags::RENDERING | GbmBufferFlags::SCANOUT;
        let allocator = GbmAllocator::new(allocator_gbm, gbm_flags);

        let token = bluewm
            .event_loop
            .insert_source(drm_notifier, move |event, meta, state| match event {
                DrmEvent::VBlank(crtc) => {
                    let Some(meta) = meta.take() else {
                        warn!("missing vblank metadata for crtc {crtc:?}");
                        return;
                    };
                    state
                        .backend
                        .tty()
                        .on_vblank(&mut state.bluewm, node, crtc, meta);
                }
                DrmEvent::Error(error) => warn!("DRM error: {error}"),
            })
            .map_err(|err| anyhow::anyhow!("error inserting the DRM notifier: {err}"))?;

        let device = OutputDevice {
            token,
            render_node,
            drm_scanner: DrmScanner::new(),
            surfaces: HashMap::new(),
            known_crtcs: HashMap::new(),
            pending: HashMap::new(),
            drm,
            gbm,
            allocator,
        };
        self.devices.insert(node, device);

        Ok(())
    }

    fn init_primary_renderer(&mut self, bluewm: &mut Bluewm) -> anyhow::Result<()> {
        debug!("initializing the primary renderer");

        let render_node = self.primary_render_node;
        let mut renderer = self
            .gpu_manager
            .single_renderer(&render_node)
            .context("error creating renderer")?;

        if let Err(err) = renderer.bind_wl_display(&bluewm.display_handle) {
            warn!("error binding wl-display in EGL: {err:?}");
        }

        let primary_formats = renderer.dmabuf_formats();
        let default_feedback = DmabufFeedbackBuilder::new(render_node.dev_id(), primary_formats)
            .build()
            .context("error building default dmabuf feedback")?;
        let dmabuf_global = bluewm
            .protocols
            .dmabuf
            .create_global_with_default_feedback::<State>(&bluewm.display_handle, &default_feedback);
        self.dmabuf_global = Some(dmabuf_global);

        Ok(())
    }

    /// Rescans the connectors of a device and announces changes to the session.
    pub(super) fn device_changed(&mut self, device_id: dev_t, bluewm: &mut Bluewm, cleanup: bool) {
        debug!("device changed: {device_id}");

        let Ok(node) = DrmNode::from_dev_id(device_id) else {
            warn!("error creating DrmNode");
            return;
        };

        let Some(device) = self.devices.get_mut(&node) else {
            warn!("unknown device {node}");
            return;
        };

        // DrmScanner will preserve any existing connector-CRTC mapping.
        let scan_result = match device.drm_scanner.scan_connectors(&device.drm) {
            Ok(x) => x,
            Err(err) => {
                warn!("error scanning connectors: {err:?}");
                return;
            }
        };

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for event in scan_result {
            match event {
                DrmScanEvent::Connected {
                    connector,
                    crtc: Some(crtc),
                } => added.push((connector, crtc)),
                DrmScanEvent::Connected { connector, crtc: None } => {
                    warn!(
                        "no free crtc for connector {}",
                        format_connector_name(&connector)
                    );
                }
                DrmScanEvent::Disconnected {
                    crtc: Some(crtc), ..
                } => removed.push(crtc),
                _ => (),
            }
        }

        for crtc in removed {
            self.connector_disconnected(bluewm, node, crtc);
        }

        if cleanup {
            if let Some(device) = self.devices.get_mut(&node) {
                if let Err(err) = device.cleanup_mismatching_resources() {
                    warn!("error cleaning up connectors: {err:?}");
                }

                for surface in device.surfaces.values_mut() {
                    // We aren't force-clearing the CRTCs, so we need to make the surfaces read the
                    // updated state after a session resume. This also causes a full damage for
                    // the next redraw.
                    if let Err(err) = surface.compositor.reset_state() {
                        warn!("error resetting DrmCompositor state: {err:?}");
                    }
                }
            }
        }

        for (connector, crtc) in added {
            if let Err(err) = self.connector_connected(bluewm, node, connector, crtc) {
                warn!("error connecting connector: {err:?}");
            }
        }
    }

    /// Announces a connected connector to the session.
    fn connector_connected(
        &mut self,
        bluewm: &mut Bluewm,
        node: DrmNode,
        connector: connector::Info,
        crtc: crtc::Handle,
    ) -> anyhow::Result<()> {
        let device = self.devices.get_mut(&node).context("missing device")?;

        let non_desktop = find_drm_property(&device.drm, connector.handle(), "non-desktop")
            .and_then(|(_, info, value)| info.value_type().convert_value(value).as_boolean())
            .unwrap_or(false);
        if non_desktop {
            debug!(
                "skipping non-desktop connector {}",
                format_connector_name(&connector)
            );
            return Ok(());
        }

        match ConnectorProperties::try_new(&device.drm, connector.handle()) {
            Ok(props) => {
                if let Err(err) = reset_hdr(&props) {
                    debug!("couldn't reset HDR properties: {err:?}");
                }
            }
            Err(err) => warn!("failed to get connector properties: {err:?}"),
        }

        let mut gamma_props = GammaProps::new(&device.drm, crtc)
            .map_err(|err| debug!("couldn't get gamma properties: {err:?}"))
            .ok();

        // Reset gamma in case it was set before.
        let res = match &mut gamma_props {
            Some(gamma_props) => gamma_props.set_gamma(&device.drm, None),
            None => set_gamma_for_crtc(&device.drm, crtc, None),
        };
        if let Err(err) = res {
            debug!("couldn't reset gamma: {err:?}");
        }

        let gamma_size = match &gamma_props {
            Some(gamma_props) => gamma_props.gamma_size(&device.drm).unwrap_or(0),
            None => legacy_gamma_size(&device.drm, crtc),
        };

        let (desc, modes) = describe_connector(&device.drm, &connector, gamma_size);
        debug!("connecting connector: {} ({} {})", desc.name, desc.make, desc.model);

        let id = OutputId::next();
        device.known_crtcs.insert(crtc, id);
        device.pending.insert(
            id,
            PendingConnector {
                name: desc.name.clone(),
                connector: connector.handle(),
                modes,
                gamma_props,
            },
        );
        self.outputs.insert(id, TtyOutputState { node, crtc });

        if let Err(err) = bluewm.add_output(id, desc, self) {
            warn!("error adding output: {err:?}");
            self.outputs.remove(&id);
            if let Some(device) = self.devices.get_mut(&node) {
                device.pending.remove(&id);
            }
        }

        Ok(())
    }

    fn connector_disconnected(&mut self, bluewm: &mut Bluewm, node: DrmNode, crtc: crtc::Handle) {
        let Some(device) = self.devices.get_mut(&node) else {
            error!("missing device for crtc {crtc:?}");
            return;
        };

        let Some(id) = device.known_crtcs.remove(&crtc) else {
            debug!("crtc {crtc:?} wasn't connected");
            return;
        };

        device.pending.remove(&id);
        if let Some(surface) = device.surfaces.remove(&crtc) {
            debug!("disconnecting connector: {}", surface.name);
        }
        self.outputs.remove(&id);

        bluewm.remove_output(id);
    }

    /// Forgets a device and every output on it.
    ///
    /// Returns the device fd for the caller to close through the session.
    pub(super) fn device_removed(
        &mut self,
        device_id: dev_t,
        bluewm: &mut Bluewm,
    ) -> Option<OwnedFd> {
        debug!("removing device: {device_id}");

        let Ok(node) = DrmNode::from_dev_id(device_id) else {
            warn!("error creating DrmNode");
            return None;
        };

        let Some(device) = self.devices.get(&node) else {
            warn!("unknown device");
            return None;
        };

        let crtcs: Vec<_> = device.known_crtcs.keys().copied().collect();
        for crtc in crtcs {
            self.connector_disconnected(bluewm, node, crtc);
        }

        let device = self.devices.remove(&node)?;
        let device_fd = device.drm.device_fd().device_fd();

        if let Some(render_node) = device.render_node {
            let was_last = !self
                .devices
                .values()
                .any(|device| device.render_node == Some(render_node));

            if was_last && render_node == self.primary_render_node {
                debug!("destroying the primary renderer");

                match self.gpu_manager.single_renderer(&render_node) {
                    Ok(mut renderer) => renderer.unbind_wl_display(),
                    Err(err) => warn!("error creating renderer during device removal: {err}"),
                }

                if let Some(global) = self.dmabuf_global.take() {
                    bluewm
                        .protocols
                        .dmabuf
                        .disable_global::<State>(&bluewm.display_handle, &global);
                    let res = bluewm.event_loop.insert_source(
                        Timer::from_duration(Duration::from_secs(10)),
                        move |_, _, state| {
                            state
                                .bluewm
                                .protocols
                                .dmabuf
                                .destroy_global::<State>(&state.bluewm.display_handle, global);
                            TimeoutAction::Drop
                        },
                    );
                    if let Err(err) = res {
                        warn!("error scheduling dmabuf global removal: {err}");
                    }
                }
            }

            if was_last {
                self.gpu_manager.as_mut().remove_node(&render_node);
                // Trigger re-enumeration in order to remove the device from gpu_manager.
                let _ = self.gpu_manager.devices();
            }
        }

        bluewm.event_loop.remove(device.token);

        drop(device);
        OwnedFd::try_from(device_fd).ok()
    }

    fn create_compositor(
        &mut self,
        state: TtyOutputState,
        mode: Mode,
        pending: &PendingConnector,
    ) -> anyhow::Result<GbmDrmCompositor> {
        let device = self.devices.get(&state.node).context("missing device")?;
        let render_node = device.render_node.unwrap_or(self.primary_render_node);
        let display_only = device.render_node.is_none();

        let render_formats = {
            let renderer = self.gpu_manager.single_renderer(&render_node)?;
            let egl_context = renderer.as_ref().egl_context();
            egl_context.dmabuf_render_formats().clone()
        };

        let device = self.devices.get_mut(&state.node).context("missing device")?;

        let drm_mode = pending
            .modes
            .iter()
            .find(|m| Mode::from(**m) == mode)
            .copied()
            .context("mode is not advertised by the connector")?;
        debug!("picking mode for {}: {drm_mode:?}", pending.name);

        // Filter out the CCS modifiers as they have increased bandwidth, causing some monitor
        // configurations to stop working. For display only devices, restrict to linear buffers
        // for best compatibility.
        let render_formats = render_formats
            .iter()
            .copied()
            .filter(|format| {
                if display_only {
                    return format.modifier == Modifier::Linear;
                }

                !matches!(
                    format.modifier,
                    Modifier::I915_y_tiled_ccs
                        | Modifier::I915_y_tiled_gen12_rc_ccs
                        | Modifier::I915_y_tiled_gen12_mc_ccs
                )
            })
            .collect::<FormatSet>();

        let make_compositor = |device: &mut OutputDevice, render_formats: FormatSet| {
            let surface = device
                .drm
                .create_surface(state.crtc, drm_mode, &[pending.connector])?;

            let mode_source = OutputModeSource::Static {
                size: mode.size,
                scale: Scale::from(1.),
                transform: Transform::Normal,
            };

            DrmCompositor::new(
                mode_source,
                surface,
                None,
                device.allocator.clone(),
                GbmFramebufferExporter::new(device.gbm.clone(), device.render_node.into()),
                SUPPORTED_COLOR_FORMATS.iter().copied(),
                render_formats,
                device.drm.cursor_size(),
                Some(device.gbm.clone()),
            )
            .context("error creating DRM compositor")
        };

        match make_compositor(device, render_formats.clone()) {
            Ok(compositor) => Ok(compositor),
            Err(err) => {
                warn!("error creating DRM compositor, will try with invalid modifier: {err:?}");

                let render_formats = render_formats
                    .iter()
                    .copied()
                    .filter(|format| format.modifier == Modifier::Invalid)
                    .collect::<FormatSet>();
                make_compositor(device, render_formats)
            }
        }
    }
}

impl OutputBackend for DeviceManager {
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()> {
        let state = self.output(output).context("unknown output")?;

        let pending = self
            .devices
            .get_mut(&state.node)
            .and_then(|device| device.pending.remove(&output))
            .context("output is not waiting for a mode")?;

        let compositor = self.create_compositor(state, mode, &pending)?;

        let name = pending.name;
        let surface = Surface {
            id: output,
            vblank_frame: None,
            vblank_frame_name: tracy_client::FrameName::new_leak(format!("vblank on {name}")),
            presentation_misprediction_plot_name: tracy_client::PlotName::new_leak(format!(
                "{name} presentation misprediction, ms"
            )),
            name,
            compositor,
            connector: pending.connector,
            gamma_props: pending.gamma_props,
            pending_gamma_change: None,
        };

        let device = self.devices.get_mut(&state.node).context("missing device")?;
        device.surfaces.insert(state.crtc, surface);

        Ok(())
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()> {
        let state = self.output(output).context("unknown output")?;
        let device = self.devices.get_mut(&state.node).context("missing device")?;
        let surface = device
            .surfaces
            .get_mut(&state.crtc)
            .context("output is not enabled")?;

        if !device.drm.is_active() {
            surface.pending_gamma_change = Some(ramp.to_vec());
            return Ok(());
        }

        match &mut surface.gamma_props {
            Some(gamma_props) => gamma_props.set_gamma(&device.drm, Some(ramp)),
            None => set_gamma_for_crtc(&device.drm, state.crtc, Some(ramp)),
        }
    }
}
