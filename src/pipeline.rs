//! Per-job worker: OCR every page, cluster, translate the whole chapter,
//! re-layout, persist. Cancellation is task abort and is observed between
//! pages and at every engine call; a cancelled worker never reaches the
//! queue bookkeeping below, so it can never mark its job failed.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::GenericImageView;
use tracing::{error, info};

use crate::artifact::{ArtifactStore, ChapterArtifact};
use crate::backends::WATERMARK_SENTINEL;
use crate::cluster::{ClusterConfig, cluster};
use crate::engine::{EngineHandle, PageTexts};
use crate::geometry::PageBlocks;
use crate::layout::{LayoutConfig, adjust};
use crate::pages::PageSource;
use crate::queue::{Job, TranslationQueue};

/// Everything a worker needs; shared by all workers of one orchestrator.
pub struct WorkerContext {
    pub queue: Arc<TranslationQueue>,
    pub engines: Arc<EngineHandle>,
    pub pages: Arc<dyn PageSource>,
    pub store: Arc<dyn ArtifactStore>,
    pub cluster: ClusterConfig,
    pub layout: LayoutConfig,
}

pub async fn run_job(ctx: Arc<WorkerContext>, job: Job) {
    match translate_chapter(&ctx, &job).await {
        Ok(()) => {
            info!("translated {}", job.chapter);
            ctx.queue.finish(&job.chapter);
        }
        Err(err) => {
            error!("translation failed for {}: {:#}", job.chapter, err);
            ctx.queue.fail(&job.chapter);
        }
    }
}

async fn translate_chapter(ctx: &WorkerContext, job: &Job) -> Result<()> {
    ctx.engines.ensure_languages(&job.languages).await?;

    let chapter_pages = ctx.pages.chapter_pages(&job.chapter)?;
    let mut pages = ChapterArtifact::new();
    for page in chapter_pages {
        // Cancellation point between pages.
        tokio::task::yield_now().await;

        let (width, height) = image::load_from_memory(&page.bytes)
            .with_context(|| format!("failed to decode page {}", page.name))?
            .dimensions();
        let mut fragments = ctx.engines.recognize(&page.bytes).await?;
        fragments.retain(|fragment| fragment.text.trim().chars().count() > 1);

        let blocks = cluster(&fragments, width as f32, height as f32, &ctx.cluster);
        if blocks.is_empty() {
            continue;
        }
        pages.insert(
            page.name,
            PageBlocks {
                img_width: width as f32,
                img_height: height as f32,
                blocks,
            },
        );
    }

    let request = page_texts(&pages);
    if !request.is_empty() {
        let response = ctx.engines.translate(&request).await?;
        apply_translations(&mut pages, &response);
    }

    for page in pages.values_mut() {
        let blocks = std::mem::take(&mut page.blocks);
        page.blocks = adjust(blocks, page.img_width, page.img_height, &ctx.layout);
    }

    ctx.store.save(&job.chapter, &pages)?;
    Ok(())
}

/// Source texts for the backend: every block of every page, in order, so
/// the response aligns by index.
pub fn page_texts(pages: &ChapterArtifact) -> PageTexts {
    pages
        .iter()
        .map(|(name, page)| {
            let texts = page
                .blocks
                .iter()
                .map(|block| block.text.replace('\n', " ").trim().to_string())
                .collect();
            (name.clone(), texts)
        })
        .collect()
}

/// Attach backend output to the blocks. Missing pages, short arrays, and
/// empty entries fall back to the source text; the watermark sentinel
/// clears the translation; noise blocks never receive one.
pub fn apply_translations(pages: &mut ChapterArtifact, response: &PageTexts) {
    for (name, page) in pages.iter_mut() {
        let translated = response.get(name);
        for (index, block) in page.blocks.iter_mut().enumerate() {
            if !block.translatable {
                block.translation.clear();
                continue;
            }
            let entry = translated
                .and_then(|texts| texts.get(index))
                .map(|text| text.trim());
            block.translation = match entry {
                Some(WATERMARK_SENTINEL) => String::new(),
                Some(text) if !text.is_empty() => text.to_string(),
                _ => block.text.clone(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Block, Rect};

    fn block(text: &str, translatable: bool) -> Block {
        Block {
            rect: Rect::new(0.0, 0.0, 100.0, 30.0),
            angle: 0.0,
            text: text.to_string(),
            translation: String::new(),
            sym_width: 12.0,
            sym_height: 16.0,
            translatable,
        }
    }

    fn chapter(blocks: Vec<Block>) -> ChapterArtifact {
        let mut pages = ChapterArtifact::new();
        pages.insert(
            "p1.png".to_string(),
            PageBlocks {
                img_width: 800.0,
                img_height: 1200.0,
                blocks,
            },
        );
        pages
    }

    #[test]
    fn aligned_responses_are_applied() {
        let mut pages = chapter(vec![block("konnichiwa", true), block("sayounara", true)]);
        let mut response = PageTexts::new();
        response.insert(
            "p1.png".to_string(),
            vec!["hello".to_string(), "goodbye".to_string()],
        );
        apply_translations(&mut pages, &response);
        let blocks = &pages.get("p1.png").unwrap().blocks;
        assert_eq!(blocks[0].translation, "hello");
        assert_eq!(blocks[1].translation, "goodbye");
    }

    #[test]
    fn short_or_missing_arrays_fall_back_to_source_text() {
        let mut pages = chapter(vec![block("one", true), block("two", true)]);
        let mut response = PageTexts::new();
        response.insert("p1.png".to_string(), vec!["uno".to_string()]);
        apply_translations(&mut pages, &response);
        let blocks = &pages.get("p1.png").unwrap().blocks;
        assert_eq!(blocks[0].translation, "uno");
        assert_eq!(blocks[1].translation, "two");

        let mut missing = chapter(vec![block("three", true)]);
        apply_translations(&mut missing, &PageTexts::new());
        assert_eq!(missing.get("p1.png").unwrap().blocks[0].translation, "three");
    }

    #[test]
    fn sentinel_and_noise_blocks_stay_untranslated() {
        let mut pages = chapter(vec![block("credit", true), block("scans.example.com", false)]);
        let mut response = PageTexts::new();
        response.insert(
            "p1.png".to_string(),
            vec![WATERMARK_SENTINEL.to_string(), "ignored".to_string()],
        );
        apply_translations(&mut pages, &response);
        let blocks = &pages.get("p1.png").unwrap().blocks;
        assert_eq!(blocks[0].translation, "");
        assert_eq!(blocks[1].translation, "");
    }

    #[test]
    fn request_covers_every_block_in_order() {
        let pages = chapter(vec![block("first\nline", true), block("second", false)]);
        let request = page_texts(&pages);
        assert_eq!(
            request.get("p1.png").unwrap(),
            &vec!["first line".to_string(), "second".to_string()]
        );
    }
}
