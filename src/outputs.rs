//! Output management.
//!
//! OWNS:
//! - the set of connected outputs and their current modes
//! - the global output layout (auto-placement left to right)
//! - the global brightness and the gamma ramps derived from it
//!
//! Hardware access goes through [`OutputBackend`], implemented by every backend.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, ensure, Context};
use smithay::output::Mode;
use smithay::utils::{Logical, Physical, Point, Rectangle, Size};

use crate::scene::{SceneElement, SceneGraph};
use crate::utils::id::IdCounter;

static OUTPUT_ID_COUNTER: IdCounter = IdCounter::new();

pub const MIN_BRIGHTNESS: f64 = 0.1;
pub const MAX_BRIGHTNESS: f64 = 1.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

impl OutputId {
    pub fn next() -> OutputId {
        OutputId(OUTPUT_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a backend knows about a newly connected output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    /// Connector name, for example `DP-1`.
    pub name: String,
    pub make: String,
    pub model: String,
    /// Physical size in millimeters.
    pub physical_size: Size<i32, Physical>,
    pub modes: Vec<Mode>,
    /// Index into `modes`.
    pub preferred: Option<usize>,
    /// Gamma ramp length per channel, 0 if unsupported.
    pub gamma_size: usize,
}

impl OutputDescriptor {
    /// The preferred mode, falling back to the first one.
    pub fn pick_mode(&self) -> Option<Mode> {
        self.preferred
            .and_then(|idx| self.modes.get(idx))
            .or_else(|| self.modes.first())
            .copied()
    }
}

/// Hardware side of an output.
pub trait OutputBackend {
    /// Prepares the output for presentation with the given mode and commits the mode.
    fn init_render(&mut self, output: OutputId, mode: Mode) -> anyhow::Result<()>;

    /// Commits a gamma ramp: the red, green and blue channels one after another.
    fn set_gamma(&mut self, output: OutputId, ramp: &[u16]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagedOutput {
    id: OutputId,
    name: String,
    mode: Mode,
    loc: Point<i32, Logical>,
    gamma_size: usize,
    /// A client owns the gamma ramp; brightness changes wait until it lets go.
    client_gamma: bool,
}

impl ManagedOutput {
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        // Outputs always use scale 1 and no transform.
        let size = self.mode.size;
        Rectangle::new(self.loc, Size::from((size.w, size.h)))
    }

    pub fn supports_gamma(&self) -> bool {
        self.gamma_size >= 2
    }

    /// Entries per channel, if the output supports gamma.
    pub fn gamma_size(&self) -> Option<usize> {
        self.supports_gamma().then_some(self.gamma_size)
    }

    fn to_ipc(&self) -> bluewm_ipc::Output {
        let geometry = self.geometry();
        bluewm_ipc::Output {
            name: self.name.clone(),
            x: geometry.loc.x,
            y: geometry.loc.y,
            width: self.mode.size.w,
            height: self.mode.size.h,
            refresh: self.mode.refresh,
            gamma_size: self
                .supports_gamma()
                .then(|| u32::try_from(self.gamma_size).unwrap_or(u32::MAX)),
        }
    }
}

pub type IpcOutputs = Arc<Mutex<Vec<bluewm_ipc::Output>>>;

pub struct OutputManager {
    /// Outputs in layout order, left to right.
    outputs: Vec<ManagedOutput>,
    brightness: f64,
    /// Snapshot for IPC readers on other threads.
    ipc_outputs: IpcOutputs,
}

impl OutputManager {
    pub fn new(brightness: f64) -> Self {
        Self {
            outputs: Vec::new(),
            brightness: clamp_brightness(brightness),
            ipc_outputs: Arc::default(),
        }
    }

    pub fn ipc_outputs(&self) -> IpcOutputs {
        self.ipc_outputs.clone()
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedOutput> + '_ {
        self.outputs.iter()
    }

    pub fn get(&self, id: OutputId) -> Option<&ManagedOutput> {
        self.outputs.iter().find(|o| o.id == id)
    }

    /// Brings up a new output and places it to the right of the existing ones.
    ///
    /// On error the output is not tracked at all.
    pub fn on_output_added(
        &mut self,
        id: OutputId,
        desc: OutputDescriptor,
        backend: &mut dyn OutputBackend,
        scene: &mut SceneGraph,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("OutputManager::on_output_added");

        let mode = desc
            .pick_mode()
            .ok_or_else(|| anyhow!("output {} has no modes", desc.name))?;

        backend
            .init_render(id, mode)
            .with_context(|| format!("error creating the render target for {}", desc.name))?;

        let x = self
            .outputs
            .iter()
            .map(|o| o.geometry())
            .map(|geo| geo.loc.x + geo.size.w)
            .max()
            .unwrap_or(0);

        let output = ManagedOutput {
            id,
            name: desc.name,
            mode,
            loc: Point::from((x, 0)),
            gamma_size: desc.gamma_size,
            client_gamma: false,
        };

        debug!(
            "added output {} at {:?}: {}x{}@{:.3}, gamma size {}",
            output.name,
            output.loc,
            mode.size.w,
            mode.size.h,
            mode.refresh as f64 / 1000.,
            output.gamma_size,
        );

        scene.add_output(id, output.geometry());

        if self.brightness != MAX_BRIGHTNESS {
            if let Err(err) = apply_brightness(&output, self.brightness, backend) {
                warn!("error setting brightness on {}: {err:?}", output.name);
            }
        }

        self.outputs.push(output);
        self.refresh_ipc_outputs();
        Ok(())
    }

    /// Removes an output and re-packs the remaining ones.
    pub fn on_output_removed(&mut self, id: OutputId, scene: &mut SceneGraph) -> bool {
        let Some(idx) = self.outputs.iter().position(|o| o.id == id) else {
            return false;
        };

        scene.remove_output(id);
        let output = self.outputs.remove(idx);
        debug!("removed output {}", output.name);

        let mut x = 0;
        for output in &mut self.outputs {
            output.loc = Point::from((x, 0));
            x += output.mode.size.w;
            scene.add_output(output.id, output.geometry());
        }

        self.refresh_ipc_outputs();
        true
    }

    /// Returns what should be shown on the output this frame, back to front.
    ///
    /// `None` means the output has no presentation target and nothing should be drawn.
    pub fn present_frame(&self, id: OutputId, scene: &SceneGraph) -> Option<Vec<SceneElement>> {
        let _span = tracy_client::span!("OutputManager::present_frame");

        self.get(id)?;
        scene.elements_for_output(id)
    }

    /// Sets the brightness of every output that supports gamma.
    ///
    /// Returns the clamped value that was applied.
    pub fn set_brightness(&mut self, value: f64, backend: &mut dyn OutputBackend) -> f64 {
        let value = clamp_brightness(value);
        self.brightness = value;

        for output in self.outputs.iter().filter(|o| !o.client_gamma) {
            if let Err(err) = apply_brightness(output, value, backend) {
                warn!("error setting brightness on {}: {err:?}", output.name);
            }
        }

        value
    }

    /// Commits a ramp supplied by a client, or gives the output back to the brightness curve.
    pub fn set_client_gamma(
        &mut self,
        id: OutputId,
        ramp: Option<Vec<u16>>,
        backend: &mut dyn OutputBackend,
    ) -> anyhow::Result<()> {
        let brightness = self.brightness;
        let output = self
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .context("unknown output")?;

        let Some(ramp) = ramp else {
            output.client_gamma = false;
            return apply_brightness(output, brightness, backend);
        };

        let size = output
            .gamma_size()
            .with_context(|| format!("output {} has no gamma support", output.name))?;
        ensure!(
            ramp.len() == size * 3,
            "wrong gamma length: expected {}, got {}",
            size * 3,
            ramp.len()
        );

        backend
            .set_gamma(id, &ramp)
            .with_context(|| format!("error committing client gamma ramp on {}", output.name))?;
        output.client_gamma = true;
        Ok(())
    }

    /// The bounding box of all outputs.
    pub fn layout_bounds(&self) -> Option<Rectangle<i32, Logical>> {
        self.outputs
            .iter()
            .map(ManagedOutput::geometry)
            .reduce(|a, b| a.merge(b))
    }

    pub fn output_under(&self, pos: Point<f64, Logical>) -> Option<&ManagedOutput> {
        self.outputs
            .iter()
            .find(|o| o.geometry().to_f64().contains(pos))
    }

    /// Returns the point closest to `pos` that lies on some output.
    pub fn clamp_to_layout(&self, pos: Point<f64, Logical>) -> Point<f64, Logical> {
        if self.output_under(pos).is_some() {
            return pos;
        }

        self.outputs
            .iter()
            .map(|o| clamp_to_rect(pos, o.geometry()))
            .min_by(|a, b| {
                let da = distance_squared(pos, *a);
                let db = distance_squared(pos, *b);
                da.total_cmp(&db)
            })
            .unwrap_or(pos)
    }

    fn refresh_ipc_outputs(&self) {
        let snapshot = self.outputs.iter().map(ManagedOutput::to_ipc).collect();
        match self.ipc_outputs.lock() {
            Ok(mut guard) => *guard = snapshot,
            Err(err) => warn!("IPC output snapshot is poisoned: {err}"),
        }
    }
}

fn apply_brightness(
    output: &ManagedOutput,
    value: f64,
    backend: &mut dyn OutputBackend,
) -> anyhow::Result<()> {
    let Some(ramp) = brightness_curve(output.gamma_size, value) else {
        trace!("output {} has no gamma support, skipping", output.name);
        return Ok(());
    };

    backend
        .set_gamma(output.id, &ramp)
        .with_context(|| format!("error committing gamma ramp of size {}", output.gamma_size))
}

pub fn clamp_brightness(value: f64) -> f64 {
    if value.is_nan() {
        return MAX_BRIGHTNESS;
    }
    value.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS)
}

/// Computes a linear gamma ramp for `len` entries per channel.
///
/// The result holds the red, green and blue channels one after another, all identical. Returns
/// `None` if `len` is too small to hold a ramp.
pub fn brightness_curve(len: usize, value: f64) -> Option<Vec<u16>> {
    if len < 2 {
        return None;
    }

    let value = clamp_brightness(value);
    let max = (len - 1) as f64;
    let channel = (0..len).map(|i| (65535. * value * (i as f64 / max)).round() as u16);

    let mut ramp = Vec::with_capacity(len * 3);
    ramp.extend(channel);
    ramp.extend_from_within(..len);
    ramp.extend_from_within(..len);
    Some(ramp)
}

fn clamp_to_rect(pos: Point<f64, Logical>, rect: Rectangle<i32, Logical>) -> Point<f64, Logical> {
    let rect = rect.to_f64();
    // Keep the point strictly inside so that it maps back onto the output.
    let max_x = rect.loc.x + (rect.size.w - 1.).max(0.);
    let max_y = rect.loc.y + (rect.size.h - 1.).max(0.);
    Point::from((pos.x.clamp(rect.loc.x, max_x), pos.y.clamp(rect.loc.y, max_y)))
}

fn distance_squared(a: Point<f64, Logical>, b: Point<f64, Logical>) -> f64 {
    let d = a - b;
    d.x * d.x + d.y * d.y
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::test_utils::{desc, mode, TestBackend};

    struct Fixture {
        backend: TestBackend,
        scene: SceneGraph,
        manager: OutputManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: TestBackend::default(),
                scene: SceneGraph::new(),
                manager: OutputManager::new(1.),
            }
        }

        fn add(&mut self, desc: OutputDescriptor) -> Option<OutputId> {
            let id = OutputId::next();
            self.manager
                .on_output_added(id, desc, &mut self.backend, &mut self.scene)
                .ok()
                .map(|()| id)
        }

        fn remove(&mut self, id: OutputId) -> bool {
            self.manager.on_output_removed(id, &mut self.scene)
        }
    }

    #[test]
    fn curve_scenario_half_brightness() {
        let ramp = brightness_curve(256, 0.5).unwrap();
        assert_eq!(ramp.len(), 768);
        let expected = (65535. * 0.5 * 128. / 255.).round() as i32;
        assert_eq!(expected, 16448);
        assert!((i32::from(ramp[128]) - expected).abs() <= 1);

        // All channels are identical.
        assert_eq!(ramp[..256], ramp[256..512]);
        assert_eq!(ramp[..256], ramp[512..]);
    }

    #[test]
    fn brightness_is_clamped() {
        assert_abs_diff_eq!(clamp_brightness(-5.), 0.1);
        assert_abs_diff_eq!(clamp_brightness(3.), 1.);
        assert_abs_diff_eq!(clamp_brightness(0.4), 0.4);
        assert_eq!(brightness_curve(16, -5.), brightness_curve(16, 0.1));
        assert_eq!(brightness_curve(16, 3.), brightness_curve(16, 1.));
    }

    #[test]
    fn tiny_gamma_is_unsupported() {
        assert_eq!(brightness_curve(0, 1.), None);
        assert_eq!(brightness_curve(1, 1.), None);
        assert_eq!(brightness_curve(2, 1.), Some(vec![0, 65535, 0, 65535, 0, 65535]));
    }

    #[test]
    fn two_outputs_are_placed_side_by_side() {
        let mut f = Fixture::new();
        let a = f.add(desc("DP-1", vec![mode(1920, 1080)], Some(0), 256)).unwrap();
        let b = f.add(desc("DP-2", vec![mode(1280, 1024)], Some(0), 0)).unwrap();

        let first = f.manager.get(a).unwrap().geometry();
        let second = f.manager.get(b).unwrap().geometry();
        assert_eq!(first, Rectangle::new((0, 0).into(), (1920, 1080).into()));
        assert!(second.loc.x >= first.loc.x + first.size.w);
        assert!(!first.overlaps(second));

        assert_eq!(f.scene.outputs().len(), 2);
        assert_eq!(f.manager.ipc_outputs().lock().unwrap().len(), 2);
        assert_eq!(
            f.manager.layout_bounds(),
            Some(Rectangle::new((0, 0).into(), (3200, 1080).into()))
        );
    }

    #[test]
    fn preferred_mode_falls_back_to_first() {
        let modes = vec![mode(800, 600), mode(1024, 768)];
        let pick = |preferred| desc("a", modes.clone(), preferred, 0).pick_mode();
        assert_eq!(pick(Some(1)), Some(mode(1024, 768)));
        assert_eq!(pick(None), Some(mode(800, 600)));
        assert_eq!(pick(Some(7)), Some(mode(800, 600)));
        assert_eq!(desc("a", vec![], None, 0).pick_mode(), None);
    }

    #[test]
    fn unusable_outputs_are_skipped() {
        let mut f = Fixture::new();
        assert_eq!(f.add(desc("a", vec![], None, 0)), None);

        f.backend.fail_init = true;
        let b = desc("b", vec![mode(10, 10)], None, 0);
        let err = f
            .manager
            .on_output_added(OutputId::next(), b, &mut f.backend, &mut f.scene)
            .unwrap_err();
        assert!(format!("{err:?}").contains("no renderer"));

        assert!(f.manager.is_empty());
        assert!(f.scene.outputs().is_empty());
    }

    #[test]
    fn removal_repacks_layout() {
        let mut f = Fixture::new();
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let name = format!("HDMI-A-{i}");
                f.add(desc(&name, vec![mode(1000, 500)], None, 0)).unwrap()
            })
            .collect();

        assert!(f.remove(ids[0]));
        assert!(!f.remove(ids[0]));

        let loc = |f: &Fixture, id| f.manager.get(id).unwrap().geometry().loc;
        assert_eq!(loc(&f, ids[1]), Point::from((0, 0)));
        assert_eq!(loc(&f, ids[2]), Point::from((1000, 0)));
        assert_eq!(f.scene.output(ids[2]).unwrap().geometry.loc, Point::from((1000, 0)));
        assert!(f.scene.output(ids[0]).is_none());
        assert!(f.manager.present_frame(ids[0], &f.scene).is_none());
        assert!(f.manager.present_frame(ids[1], &f.scene).is_some());
    }

    #[test]
    fn brightness_skips_outputs_without_gamma() {
        let mut f = Fixture::new();
        let with = f.add(desc("a", vec![mode(10, 10)], None, 256)).unwrap();
        let without = f.add(desc("b", vec![mode(10, 10)], None, 0)).unwrap();
        let failing = f.add(desc("c", vec![mode(10, 10)], None, 4)).unwrap();
        f.backend.fail_gamma.push(failing);

        let applied = f.manager.set_brightness(0.5, &mut f.backend);
        assert_abs_diff_eq!(applied, 0.5);
        assert_eq!(f.backend.gamma[&with].len(), 768);
        assert!(!f.backend.gamma.contains_key(&without));
        assert!(!f.backend.gamma.contains_key(&failing));
    }

    #[test]
    fn new_output_receives_current_brightness() {
        let mut f = Fixture::new();
        f.manager.set_brightness(0.5, &mut f.backend);

        let id = f.add(desc("a", vec![mode(10, 10)], None, 256)).unwrap();
        assert_eq!(f.backend.gamma[&id], brightness_curve(256, 0.5).unwrap());
    }

    #[test]
    fn client_gamma_holds_until_released() {
        let mut f = Fixture::new();
        let id = f.add(desc("a", vec![mode(10, 10)], None, 4)).unwrap();
        let night = vec![65535, 40000, 20000, 0, 65535, 30000, 10000, 0, 0, 0, 0, 0];

        f.manager
            .set_client_gamma(id, Some(night.clone()), &mut f.backend)
            .unwrap();
        assert_eq!(f.backend.gamma[&id], night);

        // Brightness is remembered but the client ramp stays.
        f.manager.set_brightness(0.5, &mut f.backend);
        assert_eq!(f.backend.gamma[&id], night);

        f.manager.set_client_gamma(id, None, &mut f.backend).unwrap();
        assert_eq!(f.backend.gamma[&id], brightness_curve(4, 0.5).unwrap());
    }

    #[test]
    fn client_gamma_is_validated() {
        let mut f = Fixture::new();
        let id = f.add(desc("a", vec![mode(10, 10)], None, 4)).unwrap();
        let flat = f.add(desc("b", vec![mode(10, 10)], None, 0)).unwrap();

        let err = f
            .manager
            .set_client_gamma(id, Some(vec![0; 6]), &mut f.backend)
            .unwrap_err();
        assert!(err.to_string().contains("expected 12, got 6"));
        assert!(f
            .manager
            .set_client_gamma(flat, Some(vec![]), &mut f.backend)
            .is_err());
        assert!(f
            .manager
            .set_client_gamma(OutputId::next(), None, &mut f.backend)
            .is_err());
        assert!(f.backend.gamma.is_empty());
    }

    #[test]
    fn pointer_is_clamped_to_outputs() {
        let mut f = Fixture::new();
        f.add(desc("a", vec![mode(100, 100)], None, 0)).unwrap();
        f.add(desc("b", vec![mode(50, 50)], None, 0)).unwrap();
        let m = &f.manager;

        let inside = Point::from((10., 10.));
        assert_eq!(m.clamp_to_layout(inside), inside);
        assert_eq!(m.clamp_to_layout(Point::from((-5., -5.))), Point::from((0., 0.)));
        // Below the shorter second output, closer to the first one.
        assert_eq!(m.clamp_to_layout(Point::from((120., 90.))), Point::from((99., 90.)));
        assert_eq!(m.clamp_to_layout(Point::from((500., 10.))), Point::from((149., 10.)));
    }

    proptest! {
        #[test]
        fn curve_endpoints_and_monotonic(len in 2usize..4096, value in -10f64..10.) {
            let ramp = brightness_curve(len, value).unwrap();
            let v = clamp_brightness(value);

            prop_assert_eq!(ramp.len(), len * 3);
            prop_assert_eq!(ramp[0], 0);
            prop_assert_eq!(ramp[len - 1], (65535. * v).round() as u16);
            for pair in ramp[..len].windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }
}
