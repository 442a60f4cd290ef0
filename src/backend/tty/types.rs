//! Type definitions for the TTY backend.

use std::num::NonZeroU64;
use std::time::Duration;

use smithay::backend::allocator::gbm::GbmAllocator;
use smithay::backend::allocator::Fourcc;
use smithay::backend::drm::compositor::DrmCompositor;
use smithay::backend::drm::exporter::gbm::GbmFramebufferExporter;
use smithay::backend::drm::{DrmDevice, DrmDeviceFd, DrmNode};
use smithay::reexports::drm::control::{self, connector, crtc, property};

use crate::outputs::OutputId;

/// The frame data is the target presentation time of the queued frame.
pub(super) type GbmDrmCompositor = DrmCompositor<
    GbmAllocator<DrmDeviceFd>,
    GbmFramebufferExporter<DrmDeviceFd>,
    Duration,
    DrmDeviceFd,
>;

pub(super) const SUPPORTED_COLOR_FORMATS: [Fourcc; 4] = [
    Fourcc::Xrgb8888,
    Fourcc::Xbgr8888,
    Fourcc::Argb8888,
    Fourcc::Abgr8888,
];

/// Where an output lives on the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TtyOutputState {
    pub node: DrmNode,
    pub crtc: crtc::Handle,
}

/// A connector that was announced to the session but has no compositor yet.
///
/// The compositor is created once the session picks one of `modes`.
pub(super) struct PendingConnector {
    pub name: String,
    pub connector: connector::Handle,
    /// DRM modes, index-aligned with the modes in the output descriptor.
    pub modes: Vec<control::Mode>,
    pub gamma_props: Option<GammaProps>,
}

/// Surface state for an enabled CRTC.
pub(super) struct Surface {
    pub id: OutputId,
    pub name: String,
    pub compositor: GbmDrmCompositor,
    pub connector: connector::Handle,
    pub gamma_props: Option<GammaProps>,
    /// Gamma ramp to apply upon session resume.
    pub pending_gamma_change: Option<Vec<u16>>,
    /// Tracy frame that goes from vblank to vblank.
    pub vblank_frame: Option<tracy_client::Frame>,
    pub vblank_frame_name: tracy_client::FrameName,
    pub presentation_misprediction_plot_name: tracy_client::PlotName,
}

/// Atomic gamma LUT properties of a CRTC.
pub(super) struct GammaProps {
    pub crtc: crtc::Handle,
    pub gamma_lut: property::Handle,
    pub gamma_lut_size: property::Handle,
    pub previous_blob: Option<NonZeroU64>,
}

pub(super) struct ConnectorProperties<'a> {
    pub device: &'a DrmDevice,
    pub connector: connector::Handle,
    pub properties: Vec<(property::Info, property::RawValue)>,
}
