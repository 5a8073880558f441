//! Preview rendering support

use super::FrameBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Map a flat buffer to one color per pixel; a trailing partial triple is ignored
pub fn color_patches(buffer: &[u8]) -> Vec<Rgb> {
    buffer
        .chunks_exact(3)
        .map(|c| Rgb {
            r: c[0],
            g: c[1],
            b: c[2],
        })
        .collect()
}

/// One filled rectangle of the preview strip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    pub x: f32,
    pub width: f32,
    pub color: Rgb,
}

/// A fixed-height strip that redraws from the last known buffer
#[derive(Debug, Clone)]
pub struct PreviewSurface {
    width: u32,
    active: bool,
    last: Option<FrameBuffer>,
    patches: Vec<Patch>,
}

impl PreviewSurface {
    pub fn new(width: u32) -> Self {
        let mut surface = Self {
            width,
            active: true,
            last: None,
            patches: Vec::new(),
        };
        surface.redraw();
        surface
    }

    /// Store a new buffer and redraw
    pub fn draw(&mut self, buffer: Option<FrameBuffer>) {
        self.last = buffer;
        self.redraw();
    }

    /// Change the surface width, redrawing the last buffer immediately
    pub fn resize(&mut self, width: u32) {
        if width != self.width {
            self.width = width;
            self.redraw();
        }
    }

    /// Inactive virtuals render blank regardless of the buffer
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.redraw();
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn redraw(&mut self) {
        let colors = match (&self.last, self.active) {
            (Some(buffer), true) => color_patches(buffer),
            _ => Vec::new(),
        };

        let width = self.width as f32;
        self.patches = if colors.is_empty() {
            // Blank: one black patch across the surface
            vec![Patch {
                x: 0.0,
                width,
                color: Rgb::default(),
            }]
        } else {
            let led_width = width / colors.len() as f32;
            colors
                .into_iter()
                .enumerate()
                .map(|(i, color)| Patch {
                    x: i as f32 * led_width,
                    width: led_width,
                    color,
                })
                .collect()
        };
    }
}
