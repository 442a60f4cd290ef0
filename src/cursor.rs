use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::Read;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use smithay::backend::allocator::Fourcc;
use smithay::backend::renderer::element::memory::MemoryRenderBuffer;
use smithay::input::pointer::{CursorIcon, CursorImageStatus, CursorImageSurfaceData};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{IsAlive, Logical, Physical, Point, Transform};
use smithay::wayland::compositor::with_states;
use xcursor::parser::{parse_xcursor, Image};
use xcursor::CursorTheme;

/// Edge of the built-in arrow used when the theme has no usable cursor.
const FALLBACK_SIZE: u32 = 24;

pub struct CursorManager {
    theme: CursorTheme,
    size: u8,
    current_cursor: CursorImageStatus,
    named_cursor_cache: RefCell<HashMap<CursorIcon, Option<Rc<XCursor>>>>,
    texture_cache: RefCell<HashMap<(CursorIcon, usize), MemoryRenderBuffer>>,
}

impl CursorManager {
    pub fn new(theme: &str, size: u8) -> Self {
        Self::ensure_env(theme, size);

        let theme = CursorTheme::load(theme);

        Self {
            theme,
            size,
            current_cursor: CursorImageStatus::default_named(),
            named_cursor_cache: Default::default(),
            texture_cache: Default::default(),
        }
    }

    /// Checks if the cursor WlSurface is alive, and if not, cleans it up.
    pub fn check_cursor_image_alive(&mut self) {
        if let CursorImageStatus::Surface(surface) = &self.current_cursor {
            if !surface.alive() {
                self.current_cursor = CursorImageStatus::default_named();
            }
        }
    }

    pub fn get_render_cursor(&self) -> RenderCursor {
        match self.current_cursor.clone() {
            CursorImageStatus::Hidden => RenderCursor::Hidden,
            CursorImageStatus::Surface(surface) => {
                let hotspot = with_states(&surface, |states| {
                    states
                        .data_map
                        .get::<CursorImageSurfaceData>()
                        .and_then(|data| data.lock().ok().map(|attrs| attrs.hotspot))
                        .unwrap_or_default()
                });

                RenderCursor::Surface { hotspot, surface }
            }
            CursorImageStatus::Named(icon) => self.get_render_cursor_named(icon),
        }
    }

    fn get_render_cursor_named(&self, icon: CursorIcon) -> RenderCursor {
        let cursor = self
            .get_cursor_with_name(icon)
            .or_else(|| self.get_cursor_with_name(CursorIcon::Default))
            .unwrap_or_else(|| self.fallback_cursor());

        RenderCursor::Named { icon, cursor }
    }

    /// Looks up a cursor icon in the theme, caching the result including misses.
    pub fn get_cursor_with_name(&self, icon: CursorIcon) -> Option<Rc<XCursor>> {
        self.named_cursor_cache
            .borrow_mut()
            .entry(icon)
            .or_insert_with(|| {
                let mut cursor = Self::load_xcursor(&self.theme, icon.name(), self.size as i32);

                // Check alternative names to account for non-compliant themes.
                if cursor.is_err() {
                    for name in icon.alt_names() {
                        cursor = Self::load_xcursor(&self.theme, name, self.size as i32);
                        if cursor.is_ok() {
                            break;
                        }
                    }
                }

                if let Err(err) = &cursor {
                    warn!("error loading xcursor {}: {err:?}", icon.name());
                }

                cursor.ok().map(Rc::new)
            })
            .clone()
    }

    fn fallback_cursor(&self) -> Rc<XCursor> {
        Rc::new(XCursor::fallback())
    }

    /// Currently used cursor_image as a cursor provider.
    pub fn cursor_image(&self) -> &CursorImageStatus {
        &self.current_cursor
    }

    pub fn set_cursor_image(&mut self, cursor: CursorImageStatus) {
        self.current_cursor = cursor;
    }

    /// Returns the buffer for one frame of a named cursor, importing it on first use.
    pub fn texture(&self, icon: CursorIcon, cursor: &XCursor, idx: usize) -> MemoryRenderBuffer {
        self.texture_cache
            .borrow_mut()
            .entry((icon, idx))
            .or_insert_with(|| {
                let frame = &cursor.frames()[idx];
                MemoryRenderBuffer::from_slice(
                    &frame.pixels_rgba,
                    Fourcc::Argb8888,
                    (frame.width as i32, frame.height as i32),
                    1,
                    Transform::Normal,
                    None,
                )
            })
            .clone()
    }

    /// Loads the xcursor named `name` at the image size closest to `size`.
    fn load_xcursor(theme: &CursorTheme, name: &str, size: i32) -> anyhow::Result<XCursor> {
        let _span = tracy_client::span!("load_xcursor");

        let path = theme
            .load_icon(name)
            .ok_or_else(|| anyhow!("no default cursor in theme"))?;
        let mut file = File::open(&path).with_context(|| format!("error opening {path:?}"))?;
        let mut cursor_data = Vec::new();
        file.read_to_end(&mut cursor_data)
            .with_context(|| format!("error reading {path:?}"))?;

        let images =
            parse_xcursor(&cursor_data).ok_or_else(|| anyhow!("error parsing XCursor file"))?;
        XCursor::from_images(images, size)
    }

    /// Sets the cursor theme environment variables for spawned clients.
    fn ensure_env(theme: &str, size: u8) {
        env::set_var("XCURSOR_THEME", theme);
        env::set_var("XCURSOR_SIZE", size.to_string());
    }
}

/// The cursor to draw for the current frame.
pub enum RenderCursor {
    Hidden,
    Surface {
        hotspot: Point<i32, Logical>,
        surface: WlSurface,
    },
    Named {
        icon: CursorIcon,
        cursor: Rc<XCursor>,
    },
}

/// A loaded xcursor: every frame of one nominal size.
#[derive(Debug)]
pub struct XCursor {
    images: Vec<Image>,
    animation_duration: u32,
}

impl XCursor {
    /// Keeps the frames whose dimensions are nearest to `size`.
    fn from_images(mut images: Vec<Image>, size: i32) -> anyhow::Result<Self> {
        let (width, height) = images
            .iter()
            .min_by_key(|image| (size - image.size as i32).abs())
            .map(|image| (image.width, image.height))
            .ok_or_else(|| anyhow!("XCursor file has no images"))?;

        images.retain(move |image| image.width == width && image.height == height);

        let animation_duration = images.iter().fold(0, |acc, image| acc + image.delay);

        Ok(Self {
            images,
            animation_duration,
        })
    }

    /// A plain arrow, used when the theme has nothing to offer.
    fn fallback() -> Self {
        let size = FALLBACK_SIZE;
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let inside = x <= y && y < size - 4;
                let border = inside && (x == 0 || x == y || y == size - 5);
                let pixel: [u8; 4] = match (inside, border) {
                    (true, true) => [0, 0, 0, 255],
                    (true, false) => [255, 255, 255, 255],
                    _ => [0, 0, 0, 0],
                };
                pixels.extend_from_slice(&pixel);
            }
        }

        Self {
            images: vec![Image {
                size,
                width: size,
                height: size,
                xhot: 1,
                yhot: 1,
                delay: 0,
                pixels_argb: pixels.clone(),
                pixels_rgba: pixels,
            }],
            animation_duration: 0,
        }
    }

    /// Gets the current frame for the animated cursor.
    pub fn frame(&self, mut millis: u32) -> (usize, &Image) {
        if self.is_static() {
            return (0, &self.images[0]);
        }

        millis %= self.animation_duration;

        let mut res = 0;
        for (i, img) in self.images.iter().enumerate() {
            if millis < img.delay {
                res = i;
                break;
            }
            millis -= img.delay;
        }

        (res, &self.images[res])
    }

    pub fn frames(&self) -> &[Image] {
        &self.images
    }

    /// Whether the cursor is static or animated.
    pub fn is_static(&self) -> bool {
        self.animation_duration == 0
    }

    pub fn hotspot(image: &Image) -> Point<i32, Physical> {
        (image.xhot as i32, image.yhot as i32).into()
    }
}
