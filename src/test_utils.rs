//! Test doubles shared by the unit tests.

use std::collections::HashMap;

use smithay::output::Mode;
use smithay::utils::Size;

use crate::outputs::{OutputBackend, OutputDescriptor, OutputId};

/// Records what the output manager asked the hardware to do.
#[derive(Debug, Default)]
pub struct TestBackend {
    pub fail_init: bool,
    pub fail_gamma: Vec<OutputId>,
    pub modes: HashMap<OutputId, Mode>,
    pub gamma: HashMap<OutputId, Vec<u16>>,
}

impl OutputBackend for TestBackend {
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_init, "no renderer");
        self.modes.insert(output, mode);
        Ok(())
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_gamma.contains(&output), "gamma failed");
        self.gamma.insert(output, ramp.to_vec());
        Ok(())
    }
}

pub fn mode(w: i32, h: i32) -> Mode {
    Mode {
        size: Size::from((w, h)),
        refresh: 60_000,
    }
}

pub fn desc(
    name: &str,
    modes: Vec<Mode>,
    preferred: Option<usize>,
    gamma_size: usize,
) -> OutputDescriptor {
    OutputDescriptor {
        name: name.to_owned(),
        make: String::from("Unknown"),
        model: String::from("Unknown"),
        physical_size: Size::from((0, 0)),
        modes,
        preferred,
        gamma_size,
    }
}
