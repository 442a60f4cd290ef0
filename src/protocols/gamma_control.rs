//! wlr-gamma-control: lets one client per output replace its gamma ramp.
//!
//! When the client destroys its control, or anything goes wrong with its ramp, the output falls
//! back to the curve of the global brightness.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};

use anyhow::{bail, Context};
use smithay::output::Output;
use smithay::reexports::wayland_protocols_wlr::gamma_control::v1::server::{
    zwlr_gamma_control_manager_v1, zwlr_gamma_control_v1,
};
use smithay::reexports::wayland_server::backend::ClientId;
use smithay::reexports::wayland_server::{
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};
use zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1;
use zwlr_gamma_control_v1::ZwlrGammaControlV1;

const VERSION: u32 = 1;

pub struct GammaControlManagerState {
    /// The active control of each output.
    gamma_controls: HashMap<Output, ZwlrGammaControlV1>,
}

pub struct GammaControlManagerGlobalData {
    filter: Box<dyn for<'c> Fn(&'c Client) -> bool + Send + Sync>,
}

pub trait GammaControlHandler {
    fn gamma_control_manager_state(&mut self) -> &mut GammaControlManagerState;

    /// Entries per channel, or `None` if the output has no gamma support.
    fn gamma_size(&mut self, output: &Output) -> Option<u32>;

    /// Commits a client ramp, or restores the brightness curve for `None`.
    fn set_gamma(&mut self, output: &Output, ramp: Option<Vec<u16>>) -> anyhow::Result<()>;
}

pub struct GammaControlState {
    gamma_size: Option<u32>,
}

impl GammaControlManagerState {
    pub fn new<D, F>(display: &DisplayHandle, filter: F) -> Self
    where
        D: GlobalDispatch<ZwlrGammaControlManagerV1, GammaControlManagerGlobalData>,
        D: Dispatch<ZwlrGammaControlManagerV1, ()>,
        D: 'static,
        F: for<'c> Fn(&'c Client) -> bool + Send + Sync + 'static,
    {
        let global_data = GammaControlManagerGlobalData {
            filter: Box::new(filter),
        };
        display.create_global::<D, ZwlrGammaControlManagerV1, _>(VERSION, global_data);

        Self {
            gamma_controls: HashMap::new(),
        }
    }

    /// Fails the control of an output that went away.
    pub fn output_removed(&mut self, output: &Output) {
        if let Some(gamma_control) = self.gamma_controls.remove(output) {
            gamma_control.failed();
        }
    }

    fn output_for(&self, resource: &ZwlrGammaControlV1) -> Option<Output> {
        self.gamma_controls
            .iter()
            .find(|(_, control)| *control == resource)
            .map(|(output, _)| output.clone())
    }
}

impl<D> GlobalDispatch<ZwlrGammaControlManagerV1, GammaControlManagerGlobalData, D>
    for GammaControlManagerState
where
    D: GlobalDispatch<ZwlrGammaControlManagerV1, GammaControlManagerGlobalData>,
    D: Dispatch<ZwlrGammaControlManagerV1, ()>,
    D: Dispatch<ZwlrGammaControlV1, GammaControlState>,
    D: GammaControlHandler,
    D: 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        manager: New<ZwlrGammaControlManagerV1>,
        _manager_state: &GammaControlManagerGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(manager, ());
    }

    fn can_view(client: Client, global_data: &GammaControlManagerGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ZwlrGammaControlManagerV1, (), D> for GammaControlManagerState
where
    D: Dispatch<ZwlrGammaControlManagerV1, ()>,
    D: Dispatch<ZwlrGammaControlV1, GammaControlState>,
    D: GammaControlHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        _resource: &ZwlrGammaControlManagerV1,
        request: zwlr_gamma_control_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zwlr_gamma_control_manager_v1::Request::GetGammaControl { id, output } => {
                let Some(output) = Output::from_resource(&output) else {
                    data_init
                        .init(id, GammaControlState { gamma_size: None })
                        .failed();
                    return;
                };

                let gamma_size = state.gamma_size(&output);
                let control = data_init.init(id, GammaControlState { gamma_size });

                let controls = &mut state.gamma_control_manager_state().gamma_controls;
                match gamma_size {
                    // Only one client may own the ramp of an output.
                    Some(size) if !controls.contains_key(&output) => {
                        control.gamma_size(size);
                        controls.insert(output, control);
                    }
                    _ => control.failed(),
                }
            }
            zwlr_gamma_control_manager_v1::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}

impl<D> Dispatch<ZwlrGammaControlV1, GammaControlState, D> for GammaControlManagerState
where
    D: Dispatch<ZwlrGammaControlV1, GammaControlState>,
    D: GammaControlHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        resource: &ZwlrGammaControlV1,
        request: zwlr_gamma_control_v1::Request,
        data: &GammaControlState,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        // Controls that already failed ignore everything.
        let Some(output) = state.gamma_control_manager_state().output_for(resource) else {
            return;
        };

        match request {
            zwlr_gamma_control_v1::Request::SetGamma { fd } => {
                let _span = tracy_client::span!("GammaControl::set_gamma");

                let Some(gamma_size) = data.gamma_size else {
                    return;
                };

                let res = read_ramp(&mut File::from(fd), gamma_size as usize)
                    .and_then(|ramp| state.set_gamma(&output, Some(ramp)));
                if let Err(err) = res {
                    warn!("error setting client gamma on {}: {err:?}", output.name());
                    resource.failed();
                    release(state, &output);
                }
            }
            zwlr_gamma_control_v1::Request::Destroy => release(state, &output),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        resource: &ZwlrGammaControlV1,
        _data: &GammaControlState,
    ) {
        if let Some(output) = state.gamma_control_manager_state().output_for(resource) {
            release(state, &output);
        }
    }
}

/// Drops the control of an output and restores its brightness curve.
fn release<D: GammaControlHandler>(state: &mut D, output: &Output) {
    state
        .gamma_control_manager_state()
        .gamma_controls
        .remove(output);

    if let Err(err) = state.set_gamma(output, None) {
        warn!("error restoring gamma on {}: {err:?}", output.name());
    }
}

/// Reads exactly one ramp of `gamma_size` entries per channel, in native byte order.
fn read_ramp(reader: &mut impl Read, gamma_size: usize) -> anyhow::Result<Vec<u16>> {
    let mut ramp = vec![0u16; gamma_size * 3];
    reader
        .read_exact(bytemuck::cast_slice_mut(&mut ramp))
        .context("error reading gamma ramp")?;

    // The client must not send more than one ramp.
    let mut extra = [0u8];
    loop {
        match reader.read(&mut extra) {
            Ok(0) => return Ok(ramp),
            Ok(_) => bail!("gamma ramp is longer than {gamma_size} entries per channel"),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("error reading past the gamma ramp"),
        }
    }
}

#[macro_export]
macro_rules! delegate_gamma_control {
    ($ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($ty: [
            smithay::reexports::wayland_protocols_wlr::gamma_control::v1::server::zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1: $crate::protocols::gamma_control::GammaControlManagerGlobalData
        ] => $crate::protocols::gamma_control::GammaControlManagerState);

        smithay::reexports::wayland_server::delegate_dispatch!($ty: [
            smithay::reexports::wayland_protocols_wlr::gamma_control::v1::server::zwlr_gamma_control_manager_v1::ZwlrGammaControlManagerV1: ()
        ] => $crate::protocols::gamma_control::GammaControlManagerState);

        smithay::reexports::wayland_server::delegate_dispatch!($ty: [
            smithay::reexports::wayland_protocols_wlr::gamma_control::v1::server::zwlr_gamma_control_v1::ZwlrGammaControlV1: $crate::protocols::gamma_control::GammaControlState
        ] => $crate::protocols::gamma_control::GammaControlManagerState);
    };
}
