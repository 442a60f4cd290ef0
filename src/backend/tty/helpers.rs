//! Stateless helpers for the TTY backend.

use std::iter::zip;
use std::num::NonZeroU64;
use std::os::fd::AsFd;

use anyhow::{anyhow, bail, ensure, Context};
use bytemuck::cast_slice_mut;
use smithay::backend::drm::DrmDevice;
use smithay::output::Mode;
use smithay::reexports::drm::control::{
    self, connector, crtc, property, Device, ModeFlags, ModeTypeFlags, ResourceHandle,
};
use smithay::utils::Size;

use super::types::{ConnectorProperties, GammaProps};
use crate::outputs::OutputDescriptor;

pub(super) fn find_drm_property(
    drm: &DrmDevice,
    resource: impl ResourceHandle,
    name: &str,
) -> Option<(property::Handle, property::Info, property::RawValue)> {
    let props = match drm.get_properties(resource) {
        Ok(props) => props,
        Err(err) => {
            warn!("error getting properties: {err:?}");
            return None;
        }
    };

    props.into_iter().find_map(|(handle, value)| {
        let info = drm.get_property(handle).ok()?;
        let n = info.name().to_str().ok()?;

        (n == name).then_some((handle, info, value))
    })
}

pub(super) fn get_drm_property(
    drm: &DrmDevice,
    resource: impl ResourceHandle,
    prop: property::Handle,
) -> Option<property::RawValue> {
    let props = match drm.get_properties(resource) {
        Ok(props) => props,
        Err(err) => {
            warn!("error getting properties: {err:?}");
            return None;
        }
    };

    props
        .into_iter()
        .find_map(|(handle, value)| (handle == prop).then_some(value))
}

pub(super) fn format_connector_name(connector: &connector::Info) -> String {
    format!("{}-{}", connector.interface().as_str(), connector.interface_id())
}

fn get_edid_info(
    device: &DrmDevice,
    connector: connector::Handle,
) -> anyhow::Result<libdisplay_info::info::Info> {
    let (_, info, value) =
        find_drm_property(device, connector, "EDID").context("no EDID property")?;
    let blob = info
        .value_type()
        .convert_value(value)
        .as_blob()
        .context("EDID was not blob type")?;
    let data = device
        .get_property_blob(blob)
        .context("error getting EDID blob value")?;
    libdisplay_info::info::Info::parse_edid(&data).context("error parsing EDID")
}

/// Modes the output can be driven with, and the index of the preferred one.
///
/// Interlaced modes are dropped since they don't work. Among several preferred modes the one
/// with the highest refresh rate wins.
pub(super) fn usable_modes(modes: &[control::Mode]) -> (Vec<control::Mode>, Option<usize>) {
    let modes: Vec<_> = modes
        .iter()
        .filter(|m| !m.flags().contains(ModeFlags::INTERLACE))
        .copied()
        .collect();

    let mut preferred: Option<usize> = None;
    for (idx, m) in modes.iter().enumerate() {
        if !m.mode_type().contains(ModeTypeFlags::PREFERRED) {
            continue;
        }

        match preferred {
            Some(curr) if modes[curr].vrefresh() >= m.vrefresh() => (),
            _ => preferred = Some(idx),
        }
    }

    (modes, preferred)
}

/// Describes a connected connector to the output manager.
///
/// Returns the DRM modes index-aligned with the descriptor's modes.
pub(super) fn describe_connector(
    device: &DrmDevice,
    connector: &connector::Info,
    gamma_size: usize,
) -> (OutputDescriptor, Vec<control::Mode>) {
    let name = format_connector_name(connector);

    let info = get_edid_info(device, connector.handle())
        .map_err(|err| warn!("error getting EDID info for {name}: {err:?}"))
        .ok();
    let make = info.as_ref().and_then(|info| info.make());
    let model = info.as_ref().and_then(|info| info.model());

    let (drm_modes, preferred) = usable_modes(connector.modes());
    for m in &drm_modes {
        trace!("{m:?}");
    }

    let (w, h) = connector.size().unwrap_or((0, 0));
    let desc = OutputDescriptor {
        name,
        make: make.unwrap_or_else(|| String::from("Unknown")),
        model: model.unwrap_or_else(|| String::from("Unknown")),
        physical_size: Size::from((w as i32, h as i32)),
        modes: drm_modes.iter().map(|m| Mode::from(*m)).collect(),
        preferred,
        gamma_size,
    };

    (desc, drm_modes)
}

const DRM_MODE_COLORIMETRY_DEFAULT: u64 = 0;

/// Clears HDR metadata and colorspace left behind by a previous DRM master.
pub(super) fn reset_hdr(props: &ConnectorProperties) -> anyhow::Result<()> {
    let (info, value) = props.find(c"HDR_OUTPUT_METADATA")?;
    let property::ValueType::Blob = info.value_type() else {
        bail!("wrong property type")
    };

    if *value != 0 {
        props
            .device
            .set_property(props.connector, info.handle(), 0)
            .context("error setting property")?;
    }

    let (info, value) = props.find(c"Colorspace")?;
    let property::ValueType::Enum(_) = info.value_type() else {
        bail!("wrong property type")
    };
    if *value != DRM_MODE_COLORIMETRY_DEFAULT {
        props
            .device
            .set_property(props.connector, info.handle(), DRM_MODE_COLORIMETRY_DEFAULT)
            .context("error setting property")?;
    }

    Ok(())
}

/// Gamma ramp length of a CRTC through the legacy API, 0 if unsupported.
pub(super) fn legacy_gamma_size(device: &DrmDevice, crtc: crtc::Handle) -> usize {
    match device.get_crtc(crtc) {
        Ok(info) => info.gamma_length() as usize,
        Err(err) => {
            debug!("error getting crtc info: {err:?}");
            0
        }
    }
}

/// Sets gamma for a CRTC using the legacy API; `None` resets to linear.
pub(super) fn set_gamma_for_crtc(
    device: &DrmDevice,
    crtc: crtc::Handle,
    ramp: Option<&[u16]>,
) -> anyhow::Result<()> {
    let _span = tracy_client::span!("set_gamma_for_crtc");

    let gamma_length = legacy_gamma_size(device, crtc);
    ensure!(gamma_length != 0, "setting gamma is not supported");

    let temp;
    let ramp = if let Some(ramp) = ramp {
        ensure!(ramp.len() == gamma_length * 3, "wrong gamma length");
        ramp
    } else {
        // The legacy API provides no way to reset the gamma, so set a linear one manually.
        temp = linear_ramp(gamma_length);
        &temp
    };

    let (red, ramp) = ramp.split_at(gamma_length);
    let (green, blue) = ramp.split_at(gamma_length);

    device
        .set_gamma(crtc, red, green, blue)
        .context("error setting gamma")?;

    Ok(())
}

fn linear_ramp(gamma_length: usize) -> Vec<u16> {
    let denom = gamma_length.saturating_sub(1).max(1) as u64;
    let channel = (0..gamma_length).map(|i| (0xFFFFu64 * i as u64 / denom) as u16);
    channel.clone().chain(channel.clone()).chain(channel).collect()
}

impl GammaProps {
    pub(super) fn new(device: &DrmDevice, crtc: crtc::Handle) -> anyhow::Result<Self> {
        let mut gamma_lut = None;
        let mut gamma_lut_size = None;

        let props = device
            .get_properties(crtc)
            .context("error getting properties")?;
        for (prop, _) in props {
            let Ok(info) = device.get_property(prop) else {
                continue;
            };

            let Ok(name) = info.name().to_str() else {
                continue;
            };

            match name {
                "GAMMA_LUT" => {
                    ensure!(
                        matches!(info.value_type(), property::ValueType::Blob),
                        "wrong GAMMA_LUT value type"
                    );
                    gamma_lut = Some(prop);
                }
                "GAMMA_LUT_SIZE" => {
                    ensure!(
                        matches!(info.value_type(), property::ValueType::UnsignedRange(_, _)),
                        "wrong GAMMA_LUT_SIZE value type"
                    );
                    gamma_lut_size = Some(prop);
                }
                _ => (),
            }
        }

        let gamma_lut = gamma_lut.context("missing GAMMA_LUT property")?;
        let gamma_lut_size = gamma_lut_size.context("missing GAMMA_LUT_SIZE property")?;

        Ok(Self {
            crtc,
            gamma_lut,
            gamma_lut_size,
            previous_blob: None,
        })
    }

    pub(super) fn gamma_size(&self, device: &DrmDevice) -> anyhow::Result<usize> {
        let value = get_drm_property(device, self.crtc, self.gamma_lut_size)
            .context("missing GAMMA_LUT_SIZE property")?;
        Ok(value as usize)
    }

    /// Commits a ramp as a `drm_color_lut` blob; `None` disables the LUT.
    pub(super) fn set_gamma(
        &mut self,
        device: &DrmDevice,
        gamma: Option<&[u16]>,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("GammaProps::set_gamma");

        let blob = if let Some(gamma) = gamma {
            let gamma_size = self
                .gamma_size(device)
                .context("error getting gamma size")?;

            ensure!(gamma.len() == gamma_size * 3, "wrong gamma length");

            #[allow(non_camel_case_types)]
            #[repr(C)]
            #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
            pub struct drm_color_lut {
                pub red: u16,
                pub green: u16,
                pub blue: u16,
                pub reserved: u16,
            }

            let (red, rest) = gamma.split_at(gamma_size);
            let (green, blue) = rest.split_at(gamma_size);
            let mut data = zip(zip(red, green), blue)
                .map(|((&red, &green), &blue)| drm_color_lut {
                    red,
                    green,
                    blue,
                    reserved: 0,
                })
                .collect::<Vec<_>>();
            let data = cast_slice_mut(&mut data);

            let blob = drm_ffi::mode::create_property_blob(device.as_fd(), data)
                .context("error creating property blob")?;
            NonZeroU64::new(u64::from(blob.blob_id))
        } else {
            None
        };

        let raw = blob.map(NonZeroU64::get).unwrap_or(0);
        device
            .set_property(self.crtc, self.gamma_lut, property::Value::Blob(raw).into())
            .context("error setting GAMMA_LUT")
            .inspect_err(|_| {
                if raw != 0 {
                    if let Err(err) = device.destroy_property_blob(raw) {
                        warn!("error destroying GAMMA_LUT property blob: {err:?}");
                    }
                }
            })?;

        if let Some(previous) = std::mem::replace(&mut self.previous_blob, blob) {
            if let Err(err) = device.destroy_property_blob(previous.get()) {
                warn!("error destroying previous GAMMA_LUT blob: {err:?}");
            }
        }

        Ok(())
    }

    /// Re-commits the last blob after another DRM master had the device.
    pub(super) fn restore_gamma(&self, device: &DrmDevice) -> anyhow::Result<()> {
        let _span = tracy_client::span!("GammaProps::restore_gamma");

        let blob = self.previous_blob.map(NonZeroU64::get).unwrap_or(0);
        device
            .set_property(self.crtc, self.gamma_lut, property::Value::Blob(blob).into())
            .context("error setting GAMMA_LUT")?;

        Ok(())
    }
}

impl<'a> ConnectorProperties<'a> {
    pub(super) fn try_new(
        device: &'a DrmDevice,
        connector: connector::Handle,
    ) -> anyhow::Result<Self> {
        let prop_vals = device
            .get_properties(connector)
            .context("error getting properties")?;

        let mut properties = Vec::new();
        for (prop, value) in prop_vals {
            let info = device
                .get_property(prop)
                .context("error getting property")?;
            properties.push((info, value));
        }

        Ok(Self {
            device,
            connector,
            properties,
        })
    }

    fn find(&self, name: &std::ffi::CStr) -> anyhow::Result<&(property::Info, property::RawValue)> {
        self.properties
            .iter()
            .find(|(info, _)| info.name() == name)
            .ok_or_else(|| anyhow!("couldn't find property: {name:?}"))
    }
}
