//! Post-translation box growth and collision resolution.
//!
//! Translated text is usually longer than the source and small glyphs need
//! to be re-rendered at a legible size, so every block may grow a bounded
//! amount around its center. Grown boxes are clamped to the page, then any
//! remaining overlaps are split between the two blocks along the axis of
//! smaller overlap.

use serde::Deserialize;

use crate::geometry::Block;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Hard ceiling on the growth factor.
    pub max_scale: f32,
    /// Ceiling on translated/source length ratio before the square root.
    pub text_ratio_cap: f32,
    /// Glyphs below this height get extra room to re-render legibly.
    pub min_legible_height: f32,
    /// Floor applied to the measured glyph height in the font ratio.
    pub min_symbol_height: f32,
    /// Blocks are never shrunk below this size during collision resolution.
    pub min_block_size: f32,
    /// Growth factors at or below this are not applied.
    pub growth_threshold: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_scale: 1.25,
            text_ratio_cap: 1.25,
            min_legible_height: 25.0,
            min_symbol_height: 10.0,
            min_block_size: 10.0,
            growth_threshold: 1.02,
        }
    }
}

fn grow(mut block: Block, page_width: f32, page_height: f32, config: &LayoutConfig) -> Block {
    block.text = block.text.replace('\n', " ").trim().to_string();
    block.translation = block.translation.replace('\n', " ").trim().to_string();

    let source_len = block.text.chars().count().max(1) as f32;
    let translated_len = block.translation.chars().count() as f32;
    let text_ratio = (translated_len / source_len).clamp(1.0, config.text_ratio_cap);
    let font_ratio =
        (config.min_legible_height / block.sym_height.max(config.min_symbol_height)).max(1.0);
    let scale = (text_ratio * font_ratio).sqrt().min(config.max_scale);
    if scale <= config.growth_threshold {
        return block;
    }

    let width = (block.rect.width * scale).min(page_width);
    let height = (block.rect.height * scale).min(page_height);
    let x = block.rect.x - (width - block.rect.width) / 2.0;
    let y = block.rect.y - (height - block.rect.height) / 2.0;
    block.rect.x = x.clamp(0.0, (page_width - width).max(0.0));
    block.rect.y = y.clamp(0.0, (page_height - height).max(0.0));
    block.rect.width = width;
    block.rect.height = height;
    block
}

fn resolve_collisions(blocks: &mut [Block], config: &LayoutConfig) {
    for i in 0..blocks.len() {
        for j in (i + 1)..blocks.len() {
            let a = blocks[i].rect;
            let b = blocks[j].rect;
            if !a.intersects(&b) {
                continue;
            }
            let overlap_x = a.overlap_x(&b);
            let overlap_y = a.overlap_y(&b);
            if overlap_x < overlap_y {
                let shift = overlap_x / 2.0 + 1.0;
                if a.x < b.x {
                    blocks[i].rect.width = (a.width - shift).max(config.min_block_size);
                    blocks[j].rect.width = (b.width - shift).max(config.min_block_size);
                    blocks[j].rect.x = b.x + shift;
                } else {
                    blocks[i].rect.width = (a.width - shift).max(config.min_block_size);
                    blocks[i].rect.x = a.x + shift;
                    blocks[j].rect.width = (b.width - shift).max(config.min_block_size);
                }
            } else {
                let shift = overlap_y / 2.0 + 1.0;
                if a.y < b.y {
                    blocks[i].rect.height = (a.height - shift).max(config.min_block_size);
                    blocks[j].rect.height = (b.height - shift).max(config.min_block_size);
                    blocks[j].rect.y = b.y + shift;
                } else {
                    blocks[i].rect.height = (a.height - shift).max(config.min_block_size);
                    blocks[i].rect.y = a.y + shift;
                    blocks[j].rect.height = (b.height - shift).max(config.min_block_size);
                }
            }
        }
    }
}

/// Grow blocks for their translated text and resolve any overlaps.
pub fn adjust(
    blocks: Vec<Block>,
    page_width: f32,
    page_height: f32,
    config: &LayoutConfig,
) -> Vec<Block> {
    let mut adjusted: Vec<Block> = blocks
        .into_iter()
        .map(|block| grow(block, page_width, page_height, config))
        .collect();
    resolve_collisions(&mut adjusted, config);
    adjusted
}
