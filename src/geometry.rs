use serde::{Deserialize, Serialize};

/// Axis-aligned box with a top-left origin, in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Signed horizontal overlap extent; negative when the boxes are apart.
    pub fn overlap_x(&self, other: &Rect) -> f32 {
        self.right().min(other.right()) - self.x.max(other.x)
    }

    /// Signed vertical overlap extent; negative when the boxes are apart.
    pub fn overlap_y(&self, other: &Rect) -> f32 {
        self.bottom().min(other.bottom()) - self.y.max(other.y)
    }

    /// Horizontal gap between box edges, zero when they touch or overlap.
    pub fn gap_x(&self, other: &Rect) -> f32 {
        (-self.overlap_x(other)).max(0.0)
    }

    /// Vertical gap between box edges, zero when they touch or overlap.
    pub fn gap_y(&self, other: &Rect) -> f32 {
        (-self.overlap_y(other)).max(0.0)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.overlap_x(other) > 0.0 && self.overlap_y(other) > 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// One raw OCR detection. Symbol metrics are the average glyph box the
/// recognizer measured inside this detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub rect: Rect,
    pub angle: f32,
    pub text: String,
    pub sym_width: f32,
    pub sym_height: f32,
}

fn default_true() -> bool {
    true
}

/// A merged, logically complete text region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub rect: Rect,
    pub angle: f32,
    pub text: String,
    #[serde(default)]
    pub translation: String,
    pub sym_width: f32,
    pub sym_height: f32,
    /// False for noise (URLs, credits, degenerate boxes); the block keeps
    /// participating in geometry but is never sent to a backend.
    #[serde(skip, default = "default_true")]
    pub translatable: bool,
}

impl Block {
    pub fn from_fragment(fragment: &Fragment) -> Self {
        Self {
            rect: fragment.rect,
            angle: fragment.angle,
            text: fragment.text.trim().to_string(),
            translation: String::new(),
            sym_width: fragment.sym_width,
            sym_height: fragment.sym_height,
            translatable: true,
        }
    }

    pub fn text_len(&self) -> usize {
        self.text.chars().count().max(1)
    }

    pub fn is_finite(&self) -> bool {
        self.rect.is_finite()
            && self.angle.is_finite()
            && self.sym_width.is_finite()
            && self.sym_height.is_finite()
    }
}

/// All blocks of one page plus the page's pixel dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageBlocks {
    pub img_width: f32,
    pub img_height: f32,
    pub blocks: Vec<Block>,
}
