//! Default dot icons: one pre-rendered, outlined disc per work status.

use std::collections::HashMap;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::source::DotIconProvider;

/// Work status keys and their fill colours
const STATUS_COLORS: [(&str, [u8; 3]); 14] = [
    ("unknown", [0x00, 0x00, 0x00]),
    ("open_unassigned", [0xD0, 0x02, 0x1B]),
    ("open_assigned", [0xF0, 0xC0, 0x43]),
    ("open_partially_completed", [0x00, 0x54, 0xBB]),
    ("open_needs_follow_up", [0xEA, 0x51, 0xEB]),
    ("open_unresponsive", [0x78, 0x78, 0x78]),
    ("closed_completed", [0x0F, 0xA3, 0x55]),
    ("closed_incomplete", [0x00, 0x54, 0xBB]),
    ("closed_out_of_scope", [0x78, 0x78, 0x78]),
    ("closed_done_by_others", [0x0F, 0xA3, 0x55]),
    ("closed_no_help_wanted", [0x78, 0x78, 0x78]),
    ("closed_rejected", [0x78, 0x78, 0x78]),
    ("closed_duplicate", [0x78, 0x78, 0x78]),
    ("closed_marked_for_deletion", [0xD0, 0x02, 0x1B]),
];

const OUTLINE: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Dot icons keyed by work status
pub struct StatusDotIcons {
    icons: HashMap<&'static str, Arc<RgbaImage>>,
}

impl StatusDotIcons {
    /// Render all status icons with a diameter of `size_px` device pixels.
    pub fn new(size_px: u32) -> Self {
        let outline = (size_px as f32 / 12.0).max(1.0);
        let icons = STATUS_COLORS
            .iter()
            .map(|(status, color)| (*status, Arc::new(render_dot(size_px, *color, outline))))
            .collect();
        Self { icons }
    }

    /// Status keys with an icon
    pub fn statuses() -> impl Iterator<Item = &'static str> {
        STATUS_COLORS.iter().map(|(status, _)| *status)
    }
}

impl DotIconProvider for StatusDotIcons {
    fn dot_bitmap(&self, status: &str) -> Option<Arc<RgbaImage>> {
        self.icons.get(status).cloned()
    }
}

/// Anti-aliased filled disc with a light outline.
fn render_dot(size: u32, fill: [u8; 3], outline_width: f32) -> RgbaImage {
    let radius = size as f32 / 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        let distance = (dx * dx + dy * dy).sqrt();

        let coverage = (radius - distance + 0.5).clamp(0.0, 1.0);
        if coverage <= 0.0 {
            return Rgba([0, 0, 0, 0]);
        }

        let [r, g, b] = if distance > radius - outline_width {
            OUTLINE
        } else {
            fill
        };
        Rgba([r, g, b, (coverage * 255.0).round() as u8])
    })
}
