//! Orchestrator behavior with mock engines: admission caps, pause/resume,
//! and the fail-fast shutdown.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::time::sleep;

use manga_translator_rust::artifact::{ArtifactStore, ChapterArtifact};
use manga_translator_rust::engine::{
    BoxFuture, EngineFactory, EngineHandle, Engines, PageTexts, Recognizer, TranslationBackend,
};
use manga_translator_rust::geometry::{Fragment, Rect};
use manga_translator_rust::pages::{ChapterPage, PageSource};
use manga_translator_rust::pipeline::WorkerContext;
use manga_translator_rust::queue::{ChapterRef, JobState, TranslationQueue};
use manga_translator_rust::{
    ClusterConfig, LanguagePair, LayoutConfig, Orchestrator, OrchestratorConfig, ScriptLanguage,
};

fn png_page(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode test page");
    bytes
}

struct SlowRecognizer {
    delay: Duration,
}

impl Recognizer for SlowRecognizer {
    fn language(&self) -> ScriptLanguage {
        ScriptLanguage::Japanese
    }

    fn recognize<'a>(&'a self, _image: &'a [u8]) -> BoxFuture<'a, Result<Vec<Fragment>>> {
        Box::pin(async move {
            sleep(self.delay).await;
            Ok(vec![
                Fragment {
                    rect: Rect::new(100.0, 500.0, 80.0, 24.0),
                    angle: 0.0,
                    text: "hello".to_string(),
                    sym_width: 20.0,
                    sym_height: 20.0,
                },
                Fragment {
                    rect: Rect::new(190.0, 500.0, 90.0, 24.0),
                    angle: 0.0,
                    text: "there".to_string(),
                    sym_width: 20.0,
                    sym_height: 20.0,
                },
            ])
        })
    }
}

struct UppercaseBackend {
    languages: LanguagePair,
}

impl TranslationBackend for UppercaseBackend {
    fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    fn translate<'a>(&'a self, pages: &'a PageTexts) -> BoxFuture<'a, Result<PageTexts>> {
        Box::pin(async move {
            sleep(Duration::from_millis(10)).await;
            Ok(pages
                .iter()
                .map(|(name, texts)| {
                    let upper = texts.iter().map(|text| text.to_uppercase()).collect();
                    (name.clone(), upper)
                })
                .collect())
        })
    }
}

struct MockFactory {
    recognize_delay: Duration,
}

impl EngineFactory for MockFactory {
    fn build<'a>(&'a self, languages: &'a LanguagePair) -> BoxFuture<'a, Result<Engines>> {
        Box::pin(async move {
            Ok(Engines {
                recognizer: Box::new(SlowRecognizer {
                    delay: self.recognize_delay,
                }),
                translator: Box::new(UppercaseBackend {
                    languages: languages.clone(),
                }),
            })
        })
    }
}

struct StaticPages {
    pages_per_chapter: usize,
    page_bytes: Vec<u8>,
    poisoned: Option<ChapterRef>,
}

impl PageSource for StaticPages {
    fn chapter_pages(&self, chapter: &ChapterRef) -> Result<Vec<ChapterPage>> {
        if self.poisoned.as_ref() == Some(chapter) {
            return Err(anyhow!("chapter directory vanished: {}", chapter));
        }
        Ok((1..=self.pages_per_chapter)
            .map(|index| ChapterPage {
                name: format!("p{}.png", index),
                bytes: self.page_bytes.clone(),
            })
            .collect())
    }
}

#[derive(Default)]
struct MemoryStore {
    saved: Mutex<HashMap<ChapterRef, ChapterArtifact>>,
}

impl MemoryStore {
    fn saved_chapters(&self) -> Vec<ChapterRef> {
        self.saved.lock().unwrap().keys().cloned().collect()
    }
}

impl ArtifactStore for MemoryStore {
    fn exists(&self, chapter: &ChapterRef) -> bool {
        self.saved.lock().unwrap().contains_key(chapter)
    }

    fn save(&self, chapter: &ChapterRef, pages: &ChapterArtifact) -> Result<()> {
        self.saved
            .lock()
            .unwrap()
            .insert(chapter.clone(), pages.clone());
        Ok(())
    }

    fn load(&self, chapter: &ChapterRef) -> Result<ChapterArtifact> {
        self.saved
            .lock()
            .unwrap()
            .get(chapter)
            .cloned()
            .ok_or_else(|| anyhow!("no artifact for {}", chapter))
    }
}

fn pair() -> LanguagePair {
    LanguagePair::new(ScriptLanguage::Japanese, "en").unwrap()
}

async fn build_orchestrator(
    pages: StaticPages,
    config: OrchestratorConfig,
    recognize_delay: Duration,
) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let engines = EngineHandle::new(Box::new(MockFactory { recognize_delay }), &pair())
        .await
        .unwrap();
    let ctx = WorkerContext {
        queue: Arc::new(TranslationQueue::new()),
        engines: Arc::new(engines),
        pages: Arc::new(pages),
        store: store.clone(),
        cluster: ClusterConfig::default(),
        layout: LayoutConfig::default(),
    };
    (Orchestrator::new(ctx, config), store)
}

/// Watches queue snapshots and records the worst concurrency seen.
fn spawn_concurrency_observer(
    queue: Arc<manga_translator_rust::TranslationQueue>,
) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let max_running = Arc::new(AtomicUsize::new(0));
    let max_per_source = Arc::new(AtomicUsize::new(0));
    let running = max_running.clone();
    let per_source = max_per_source.clone();
    tokio::spawn(async move {
        let mut rx = queue.subscribe();
        loop {
            let snapshot = queue.snapshot();
            let active: Vec<_> = snapshot
                .iter()
                .filter(|job| job.state == JobState::Running)
                .collect();
            running.fetch_max(active.len(), Ordering::SeqCst);
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for job in &active {
                *counts.entry(job.chapter.source.as_str()).or_default() += 1;
            }
            if let Some(worst) = counts.values().max() {
                per_source.fetch_max(*worst, Ordering::SeqCst);
            }
            if snapshot.is_empty() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });
    (max_running, max_per_source)
}

#[tokio::test]
async fn per_source_cap_limits_concurrency() {
    let pages = StaticPages {
        pages_per_chapter: 2,
        page_bytes: png_page(1000, 1500),
        poisoned: None,
    };
    let (orchestrator, store) =
        build_orchestrator(pages, OrchestratorConfig::default(), Duration::from_millis(20)).await;

    // 7 chapters over 3 sources; at most one job per source may run.
    let chapters = [
        ("alpha", "ch1"),
        ("alpha", "ch2"),
        ("alpha", "ch3"),
        ("beta", "ch1"),
        ("beta", "ch2"),
        ("gamma", "ch1"),
        ("gamma", "ch2"),
    ];
    for (source, chapter) in chapters {
        assert!(orchestrator.enqueue(ChapterRef::new(source, "series", chapter), pair()));
    }

    let (max_running, max_per_source) = spawn_concurrency_observer(orchestrator.queue());
    assert!(orchestrator.start());
    orchestrator.join().await;

    assert!(orchestrator.queue().snapshot().is_empty());
    assert_eq!(store.saved_chapters().len(), 7);
    let observed = max_running.load(Ordering::SeqCst);
    assert!((1..=3).contains(&observed), "saw {} running jobs", observed);
    assert!(max_per_source.load(Ordering::SeqCst) <= 1);

    // The translation landed on the merged block.
    let artifact = store
        .load(&ChapterRef::new("alpha", "series", "ch1"))
        .unwrap();
    let page = artifact.get("p1.png").unwrap();
    assert_eq!(page.blocks.len(), 1);
    assert_eq!(page.blocks[0].translation, "THERE HELLO");
}

#[tokio::test]
async fn pause_requeues_running_jobs_and_resume_completes() {
    let pages = StaticPages {
        pages_per_chapter: 3,
        page_bytes: png_page(1000, 1500),
        poisoned: None,
    };
    let (orchestrator, store) =
        build_orchestrator(pages, OrchestratorConfig::default(), Duration::from_millis(50)).await;

    orchestrator.enqueue(ChapterRef::new("alpha", "series", "ch1"), pair());
    orchestrator.enqueue(ChapterRef::new("alpha", "series", "ch2"), pair());

    assert!(orchestrator.start());
    sleep(Duration::from_millis(40)).await;
    assert!(orchestrator
        .queue()
        .snapshot()
        .iter()
        .any(|job| job.state == JobState::Running));

    orchestrator.pause();
    let paused = orchestrator.queue().snapshot();
    assert_eq!(paused.len(), 2);
    assert!(paused.iter().all(|job| job.state == JobState::Queued));
    // The interrupted worker left nothing half-written behind.
    assert!(store.saved_chapters().is_empty());

    assert!(orchestrator.start());
    orchestrator.join().await;
    assert!(orchestrator.queue().snapshot().is_empty());
    assert_eq!(store.saved_chapters().len(), 2);
}

#[tokio::test]
async fn one_failed_job_stops_the_whole_run() {
    let poisoned = ChapterRef::new("beta", "series", "ch1");
    let pages = StaticPages {
        pages_per_chapter: 2,
        page_bytes: png_page(1000, 1500),
        poisoned: Some(poisoned.clone()),
    };
    let (orchestrator, store) =
        build_orchestrator(pages, OrchestratorConfig::default(), Duration::from_millis(50)).await;

    orchestrator.enqueue(ChapterRef::new("alpha", "series", "ch1"), pair());
    orchestrator.enqueue(poisoned.clone(), pair());
    orchestrator.enqueue(ChapterRef::new("gamma", "series", "ch1"), pair());

    assert!(orchestrator.start());
    orchestrator.join().await;

    let snapshot = orchestrator.queue().snapshot();
    assert!(!orchestrator.is_running());
    assert!(snapshot
        .iter()
        .any(|job| job.chapter == poisoned && job.state == JobState::Failed));
    // Nothing is left running and the poisoned chapter produced no artifact.
    assert!(snapshot.iter().all(|job| job.state != JobState::Running));
    assert!(!store.saved_chapters().contains(&poisoned));
}

#[tokio::test]
async fn enqueue_skips_duplicates_and_existing_artifacts() {
    let pages = StaticPages {
        pages_per_chapter: 1,
        page_bytes: png_page(1000, 1500),
        poisoned: None,
    };
    let (orchestrator, store) =
        build_orchestrator(pages, OrchestratorConfig::default(), Duration::from_millis(1)).await;

    let translated = ChapterRef::new("alpha", "series", "done");
    store.save(&translated, &ChapterArtifact::new()).unwrap();
    assert!(!orchestrator.enqueue(translated, pair()));

    let fresh = ChapterRef::new("alpha", "series", "new");
    assert!(orchestrator.enqueue(fresh.clone(), pair()));
    assert!(!orchestrator.enqueue(fresh, pair()));
}

#[tokio::test]
async fn clear_queue_empties_everything() {
    let pages = StaticPages {
        pages_per_chapter: 3,
        page_bytes: png_page(1000, 1500),
        poisoned: None,
    };
    let (orchestrator, _store) =
        build_orchestrator(pages, OrchestratorConfig::default(), Duration::from_millis(50)).await;

    orchestrator.enqueue(ChapterRef::new("alpha", "series", "ch1"), pair());
    orchestrator.enqueue(ChapterRef::new("beta", "series", "ch1"), pair());
    orchestrator.start();
    sleep(Duration::from_millis(30)).await;

    orchestrator.clear_queue();
    assert!(orchestrator.queue().is_empty());
    assert!(!orchestrator.start());
}
