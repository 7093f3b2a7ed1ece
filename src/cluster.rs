//! Groups raw OCR fragments into logical text blocks.
//!
//! Merging is single-linkage clustering over a proximity graph: every pass
//! evaluates the symmetric merge predicate over all current block pairs,
//! unions connected blocks, and folds each component into one block. Passes
//! repeat until none of them merges anything, so re-clustering the output is
//! always a no-op and a page of n fragments performs at most n merges.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::geometry::{Block, Fragment};

static NOISE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(https?://\S+|www\.\S+|discord\.gg\S*|\S+\.(com|net|org|co|io|me|cc|tv|info|link))",
    )
    .expect("noise pattern")
});

/// Text-flow convention of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// Tall, continuously scrolling page; read left to right.
    Scrolling,
    /// Discrete panels; read right to left.
    Paneled,
}

impl LayoutMode {
    pub fn classify(page_width: f32, page_height: f32, config: &ClusterConfig) -> Self {
        if page_height > config.scroll_height || page_height > page_width * config.scroll_aspect {
            LayoutMode::Scrolling
        } else {
            LayoutMode::Paneled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Horizontal,
    Vertical,
}

/// Merge coefficients. Gap multipliers are expressed in glyph widths or
/// heights ("columns"/"rows") of the larger fragment of a pair, so the same
/// defaults work across resolutions once page scaling is applied.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Pages taller than this are scrolling layouts.
    pub scroll_height: f32,
    /// Pages taller than width times this are scrolling layouts.
    pub scroll_aspect: f32,
    /// Maximum baseline angle difference (mod 180) for any merge.
    pub angle_tolerance: f32,
    /// |angle| range classified as vertical glyph runs.
    pub vertical_angle_min: f32,
    pub vertical_angle_max: f32,
    /// Resolution the gap multipliers were tuned at.
    pub reference_width: f32,
    pub reference_height: f32,
    /// Ceiling for the per-page threshold scale factors.
    pub width_scale_cap: f32,
    pub height_scale_cap: f32,
    /// Floor applied to symbol metrics before scaling thresholds.
    pub min_symbol_size: f32,
    /// Boxes at or below this size are kept but never translated.
    pub min_fragment_size: f32,
    /// Vertical branch: origin distance limits (columnar text).
    pub origin_row_gap: f32,
    pub origin_col_gap: f32,
    /// Vertical branch: side-by-side column gap.
    pub side_col_gap: f32,
    /// Vertical branch: minimum vertical overlap fraction and its gap limit.
    pub column_overlap_min: f32,
    pub column_col_gap: f32,
    /// Horizontal branch: stacked short lines.
    pub stack_center_frac: f32,
    pub stack_row_gap: f32,
    /// Horizontal branch: overlapping lines of one bubble.
    pub overlap_width_frac: f32,
    pub overlap_row_gap: f32,
    /// Horizontal branch: inline word continuation.
    pub inline_col_gap: f32,
    pub inline_overlap_min: f32,
    /// Vertical offset (in glyph heights) above which two horizontal
    /// fragments count as separate lines when ordering a merge.
    pub line_split_frac: f32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            scroll_height: 2300.0,
            scroll_aspect: 2.0,
            angle_tolerance: 10.0,
            vertical_angle_min: 70.0,
            vertical_angle_max: 110.0,
            reference_width: 1200.0,
            reference_height: 2000.0,
            width_scale_cap: 3.5,
            height_scale_cap: 2.6,
            min_symbol_size: 12.0,
            min_fragment_size: 2.0,
            origin_row_gap: 2.2,
            origin_col_gap: 4.5,
            side_col_gap: 2.5,
            column_overlap_min: 0.15,
            column_col_gap: 2.2,
            stack_center_frac: 0.45,
            stack_row_gap: 0.5,
            overlap_width_frac: 0.2,
            overlap_row_gap: 0.4,
            inline_col_gap: 1.5,
            inline_overlap_min: 0.5,
            line_split_frac: 0.5,
        }
    }
}

/// Per-page thresholds: the configured multipliers scaled by the page's
/// ratio to the reference resolution, clamped to [1.0, cap].
struct Thresholds<'a> {
    config: &'a ClusterConfig,
    scale_x: f32,
    scale_y: f32,
}

impl<'a> Thresholds<'a> {
    fn new(config: &'a ClusterConfig, page_width: f32, page_height: f32) -> Self {
        let scale_x = (page_width / config.reference_width).clamp(1.0, config.width_scale_cap);
        let scale_y = (page_height / config.reference_height).clamp(1.0, config.height_scale_cap);
        Self {
            config,
            scale_x,
            scale_y,
        }
    }

    fn sym_width(&self, a: &Block, b: &Block) -> f32 {
        a.sym_width.max(b.sym_width).max(self.config.min_symbol_size)
    }

    fn sym_height(&self, a: &Block, b: &Block) -> f32 {
        a.sym_height
            .max(b.sym_height)
            .max(self.config.min_symbol_size)
    }

    /// Horizontal gap threshold of `cols` glyph widths.
    fn cols(&self, a: &Block, b: &Block, cols: f32) -> f32 {
        self.sym_width(a, b) * cols * self.scale_x
    }

    /// Vertical gap threshold of `rows` glyph heights.
    fn rows(&self, a: &Block, b: &Block, rows: f32) -> f32 {
        self.sym_height(a, b) * rows * self.scale_y
    }
}

fn is_vertical(angle: f32, config: &ClusterConfig) -> bool {
    let a = angle.abs();
    a >= config.vertical_angle_min && a <= config.vertical_angle_max
}

/// The predicate branch is vertical only when both fragments are vertical,
/// which keeps the predicate symmetric for mixed pairs near the boundary.
fn pair_orientation(a: &Block, b: &Block, config: &ClusterConfig) -> Orientation {
    if is_vertical(a.angle, config) && is_vertical(b.angle, config) {
        Orientation::Vertical
    } else {
        Orientation::Horizontal
    }
}

fn angles_aligned(a: f32, b: f32, tolerance: f32) -> bool {
    let diff = (a - b).abs() % 180.0;
    diff < tolerance || (180.0 - diff) < tolerance
}

/// Symmetric merge test. Non-finite geometry never merges.
fn should_merge(a: &Block, b: &Block, t: &Thresholds<'_>) -> bool {
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let config = t.config;
    if !angles_aligned(a.angle, b.angle, config.angle_tolerance) {
        return false;
    }

    match pair_orientation(a, b, config) {
        Orientation::Vertical => {
            let dx = (a.rect.x - b.rect.x).abs();
            let dy = (a.rect.y - b.rect.y).abs();
            let h_gap = a.rect.gap_x(&b.rect);
            let v_overlap = a.rect.overlap_y(&b.rect);

            let origins_close = dy < t.rows(a, b, config.origin_row_gap)
                && dx < t.cols(a, b, config.origin_col_gap);
            let side_by_side = h_gap < t.cols(a, b, config.side_col_gap)
                && dy < t.rows(a, b, config.origin_row_gap);
            let aligned = v_overlap > t.sym_height(a, b) * config.column_overlap_min
                && h_gap < t.cols(a, b, config.column_col_gap);

            origins_close || side_by_side || aligned
        }
        Orientation::Horizontal => {
            let v_gap = a.rect.gap_y(&b.rect);
            let h_gap = a.rect.gap_x(&b.rect);
            let h_overlap = a.rect.overlap_x(&b.rect);
            let v_overlap = a.rect.overlap_y(&b.rect);
            let center_diff = (a.rect.center_x() - b.rect.center_x()).abs();

            let stacked = center_diff
                < a.rect.width.max(b.rect.width) * config.stack_center_frac
                && v_gap < t.rows(a, b, config.stack_row_gap);
            let overlapped = h_overlap
                > a.rect.width.min(b.rect.width) * config.overlap_width_frac
                && v_gap < t.rows(a, b, config.overlap_row_gap);
            let inline = h_gap < t.cols(a, b, config.inline_col_gap)
                && v_overlap > t.sym_height(a, b) * config.inline_overlap_min;

            stacked || overlapped || inline
        }
    }
}

fn join_texts(first: &str, second: &str) -> String {
    let first = first.trim();
    let second = second.trim();
    if first.is_empty() {
        second.to_string()
    } else if second.is_empty() {
        first.to_string()
    } else {
        format!("{} {}", first, second)
    }
}

/// Combine two blocks: union box, mode-specific reading order for the text
/// join, length-weighted symbol metrics, and the angle of the longer text.
fn merge(a: &Block, b: &Block, mode: LayoutMode, config: &ClusterConfig) -> Block {
    let rect = a.rect.union(&b.rect);
    let sym_height = a.sym_height.max(b.sym_height).max(config.min_symbol_size);
    let sym_width = a.sym_width.max(b.sym_width).max(config.min_symbol_size);

    let a_first = match pair_orientation(a, b, config) {
        // Columns read right to left; within one column, top to bottom.
        Orientation::Vertical => {
            if (a.rect.x - b.rect.x).abs() > sym_width * config.line_split_frac {
                a.rect.x > b.rect.x
            } else {
                a.rect.y <= b.rect.y
            }
        }
        Orientation::Horizontal => {
            if (a.rect.y - b.rect.y).abs() > sym_height * config.line_split_frac {
                a.rect.y < b.rect.y
            } else {
                match mode {
                    LayoutMode::Scrolling => a.rect.x <= b.rect.x,
                    LayoutMode::Paneled => a.rect.x > b.rect.x,
                }
            }
        }
    };
    let (first, second) = if a_first { (a, b) } else { (b, a) };

    let len_a = a.text_len() as f32;
    let len_b = b.text_len() as f32;
    let total = len_a + len_b;
    let angle = if a.text_len() > b.text_len() {
        a.angle
    } else if b.text_len() > a.text_len() {
        b.angle
    } else if a.angle.abs() <= b.angle.abs() {
        a.angle
    } else {
        b.angle
    };

    Block {
        rect,
        angle,
        text: join_texts(&first.text, &second.text),
        translation: join_texts(&first.translation, &second.translation),
        sym_width: (a.sym_width * len_a + b.sym_width * len_b) / total,
        sym_height: (a.sym_height * len_a + b.sym_height * len_b) / total,
        translatable: a.translatable || b.translatable,
    }
}

fn mark_noise(block: &mut Block, config: &ClusterConfig) {
    if NOISE_PATTERN.is_match(&block.text)
        || block.rect.width <= config.min_fragment_size
        || block.rect.height <= config.min_fragment_size
    {
        block.translatable = false;
    }
}

fn sort_reading_order(blocks: &mut [Block], mode: LayoutMode) {
    match mode {
        LayoutMode::Scrolling => blocks.sort_by(|a, b| {
            a.rect
                .y
                .total_cmp(&b.rect.y)
                .then(a.rect.x.total_cmp(&b.rect.x))
        }),
        LayoutMode::Paneled => blocks.sort_by(|a, b| {
            a.rect
                .y
                .total_cmp(&b.rect.y)
                .then(b.rect.x.total_cmp(&a.rect.x))
        }),
    }
}

struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    /// The smaller root wins, keeping component folding deterministic.
    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Cluster one page of fragments into reading-ordered blocks.
pub fn cluster(
    fragments: &[Fragment],
    page_width: f32,
    page_height: f32,
    config: &ClusterConfig,
) -> Vec<Block> {
    let mode = LayoutMode::classify(page_width, page_height, config);
    let mut blocks: Vec<Block> = fragments
        .iter()
        .filter(|fragment| !fragment.text.trim().is_empty())
        .map(Block::from_fragment)
        .collect();
    for block in &mut blocks {
        mark_noise(block, config);
    }
    sort_reading_order(&mut blocks, mode);

    let thresholds = Thresholds::new(config, page_width, page_height);
    loop {
        let len = blocks.len();
        if len < 2 {
            break;
        }
        let mut dsu = Dsu::new(len);
        let mut merged_any = false;
        for i in 0..len {
            for j in (i + 1)..len {
                if dsu.find(i) != dsu.find(j) && should_merge(&blocks[i], &blocks[j], &thresholds) {
                    dsu.union(i, j);
                    merged_any = true;
                }
            }
        }
        if !merged_any {
            break;
        }

        let mut components: Vec<Option<Block>> = vec![None; len];
        for (index, block) in blocks.iter().enumerate() {
            let root = dsu.find(index);
            components[root] = Some(match components[root].take() {
                Some(acc) => merge(&acc, block, mode, config),
                None => block.clone(),
            });
        }
        blocks = components.into_iter().flatten().collect();
        sort_reading_order(&mut blocks, mode);
    }

    blocks
}
