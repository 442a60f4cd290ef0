//! Headless backend for offline operation and tests.
//!
//! Outputs are virtual: nothing is rendered, the frame clock is a timer at the output's refresh
//! rate and gamma ramps are only validated and stored.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{ensure, Context};
use smithay::output::Mode;
use smithay::utils::Size;

use super::RenderResult;
use crate::bluewm::Bluewm;
use crate::outputs::{OutputBackend, OutputDescriptor, OutputId};

const MODE: Mode = Mode {
    size: Size::new(1920, 1080),
    refresh: 60_000,
};

pub struct Headless {
    output_count: u8,
    gamma_size: usize,
    modes: HashMap<OutputId, Mode>,
    gamma: HashMap<OutputId, Vec<u16>>,
}

impl Headless {
    pub fn new(config: &bluewm_config::Config) -> Self {
        Self {
            output_count: config.headless.outputs,
            gamma_size: config.headless.gamma_size as usize,
            modes: HashMap::new(),
            gamma: HashMap::new(),
        }
    }

    /// Brings up the virtual outputs.
    ///
    /// They are the only presentation targets, so failing to render to any of them is fatal.
    pub fn init(&mut self, bluewm: &mut Bluewm) -> anyhow::Result<()> {
        for desc in self.descriptors() {
            let name = desc.name.clone();
            bluewm
                .add_output(OutputId::next(), desc, self)
                .with_context(|| format!("error adding headless output {name}"))?;
        }
        Ok(())
    }

    fn descriptors(&self) -> Vec<OutputDescriptor> {
        (1..=self.output_count)
            .map(|idx| OutputDescriptor {
                name: format!("HEADLESS-{idx}"),
                make: String::from("bluewm"),
                model: String::from("Headless"),
                physical_size: Size::from((0, 0)),
                modes: vec![MODE],
                preferred: Some(0),
                gamma_size: self.gamma_size,
            })
            .collect()
    }

    pub fn seat_name(&self) -> String {
        "headless".to_owned()
    }

    pub fn render(
        &mut self,
        bluewm: &mut Bluewm,
        output: OutputId,
        target_presentation_time: Duration,
    ) -> RenderResult {
        if !self.modes.contains_key(&output) {
            return RenderResult::Skipped;
        }

        bluewm.queue_estimated_vblank_timer(output, target_presentation_time);
        RenderResult::NoDamage
    }

    pub fn mode(&self, output: OutputId) -> Option<Mode> {
        self.modes.get(&output).copied()
    }

    pub fn gamma(&self, output: OutputId) -> Option<&[u16]> {
        self.gamma.get(&output).map(Vec::as_slice)
    }
}

impl OutputBackend for Headless {
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()> {
        self.modes.insert(output, mode);
        Ok(())
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()> {
        ensure!(self.modes.contains_key(&output), "unknown output");
        ensure!(
            ramp.len() == self.gamma_size * 3,
            "wrong gamma length: expected {}, got {}",
            self.gamma_size * 3,
            ramp.len()
        );

        self.gamma.insert(output, ramp.to_vec());
        Ok(())
    }
}
