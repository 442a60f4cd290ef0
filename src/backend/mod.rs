use std::time::Duration;

use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::output::Mode;

use crate::bluewm::Bluewm;
use crate::outputs::{OutputBackend, OutputId};
use crate::scene::SceneElement;

pub mod tty;
pub use tty::Tty;

pub mod headless;
pub use headless::Headless;

#[allow(clippy::large_enum_variant)]
pub enum Backend {
    Tty(Tty),
    Headless(Headless),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderResult {
    /// The frame was submitted to the backend for presentation.
    Submitted,
    /// Rendering succeeded, but there was no damage.
    NoDamage,
    /// The frame was not rendered and submitted, due to an error or otherwise.
    Skipped,
}

impl Backend {
    pub fn init(&mut self, bluewm: &mut Bluewm) -> anyhow::Result<()> {
        let _span = tracy_client::span!("Backend::init");
        match self {
            Backend::Tty(tty) => tty.init(bluewm),
            Backend::Headless(headless) => headless.init(bluewm),
        }
    }

    pub fn seat_name(&self) -> String {
        match self {
            Backend::Tty(tty) => tty.seat_name(),
            Backend::Headless(headless) => headless.seat_name(),
        }
    }

    pub fn render(
        &mut self,
        bluewm: &mut Bluewm,
        output: OutputId,
        frame: &[SceneElement],
        target_presentation_time: Duration,
    ) -> RenderResult {
        match self {
            Backend::Tty(tty) => tty.render(bluewm, output, frame, target_presentation_time),
            Backend::Headless(headless) => {
                headless.render(bluewm, output, target_presentation_time)
            }
        }
    }

    pub fn change_vt(&mut self, vt: i32) {
        match self {
            Backend::Tty(tty) => tty.change_vt(vt),
            Backend::Headless(_) => (),
        }
    }

    pub fn import_dmabuf(&mut self, dmabuf: &Dmabuf) -> bool {
        match self {
            Backend::Tty(tty) => tty.import_dmabuf(dmabuf),
            Backend::Headless(_) => false,
        }
    }

    pub fn tty(&mut self) -> &mut Tty {
        if let Self::Tty(v) = self {
            v
        } else {
            panic!("backend is not Tty");
        }
    }
}

impl OutputBackend for Backend {
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()> {
        match self {
            Backend::Tty(tty) => tty.init_render(output, mode),
            Backend::Headless(headless) => headless.init_render(output, mode),
        }
    }

    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()> {
        match self {
            Backend::Tty(tty) => tty.set_gamma(output, ramp),
            Backend::Headless(headless) => headless.set_gamma(output, ramp),
        }
    }
}
