//! Recognition and translation engine seams, plus the shared handle that
//! swaps both when a job needs a different language pair.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::info;

use crate::geometry::Fragment;
use crate::lang::{LanguagePair, ScriptLanguage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-page source texts keyed by page filename, one entry per block.
pub type PageTexts = BTreeMap<String, Vec<String>>;

/// OCR capability: one page image in, raw fragments out.
pub trait Recognizer: Send + Sync {
    fn language(&self) -> ScriptLanguage;
    fn recognize<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<Vec<Fragment>>>;
}

/// Translation capability over a whole chapter. Implementations must return
/// the same key set with arrays of the same length; the pipeline falls back
/// to the source text wherever they do not.
pub trait TranslationBackend: Send + Sync {
    fn languages(&self) -> &LanguagePair;
    fn translate<'a>(&'a self, pages: &'a PageTexts) -> BoxFuture<'a, Result<PageTexts>>;
}

/// Builds a recognizer/backend pair for a language pair. Building may
/// download models and is a cancellable suspension point.
pub trait EngineFactory: Send + Sync {
    fn build<'a>(&'a self, languages: &'a LanguagePair) -> BoxFuture<'a, Result<Engines>>;
}

pub struct Engines {
    pub recognizer: Box<dyn Recognizer>,
    pub translator: Box<dyn TranslationBackend>,
}

impl Engines {
    fn matches(&self, languages: &LanguagePair) -> bool {
        self.recognizer.language() == languages.from && self.translator.languages() == languages
    }
}

/// Shared engine slot. Recognize/translate calls hold the read lock, so a
/// language swap (write lock) waits for every in-flight call and blocks new
/// ones until the new engines are ready.
pub struct EngineHandle {
    factory: Box<dyn EngineFactory>,
    slot: RwLock<Engines>,
}

impl EngineHandle {
    pub async fn new(factory: Box<dyn EngineFactory>, languages: &LanguagePair) -> Result<Self> {
        let engines = factory.build(languages).await?;
        Ok(Self {
            factory,
            slot: RwLock::new(engines),
        })
    }

    /// Swap the loaded engines if they do not serve `languages` yet.
    pub async fn ensure_languages(&self, languages: &LanguagePair) -> Result<()> {
        {
            let engines = self.slot.read().await;
            if engines.matches(languages) {
                return Ok(());
            }
        }
        let mut engines = self.slot.write().await;
        // Another worker may have swapped while we waited for the lock.
        if !engines.matches(languages) {
            info!(
                "reinitializing engines for {:?} -> {}",
                languages.from, languages.to
            );
            *engines = self.factory.build(languages).await?;
        }
        Ok(())
    }

    pub async fn recognize(&self, image: &[u8]) -> Result<Vec<Fragment>> {
        self.slot.read().await.recognizer.recognize(image).await
    }

    pub async fn translate(&self, pages: &PageTexts) -> Result<PageTexts> {
        self.slot.read().await.translator.translate(pages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullRecognizer {
        language: ScriptLanguage,
    }

    impl Recognizer for NullRecognizer {
        fn language(&self) -> ScriptLanguage {
            self.language
        }

        fn recognize<'a>(&'a self, _image: &'a [u8]) -> BoxFuture<'a, Result<Vec<Fragment>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    struct EchoBackend {
        languages: LanguagePair,
    }

    impl TranslationBackend for EchoBackend {
        fn languages(&self) -> &LanguagePair {
            &self.languages
        }

        fn translate<'a>(&'a self, pages: &'a PageTexts) -> BoxFuture<'a, Result<PageTexts>> {
            Box::pin(async move { Ok(pages.clone()) })
        }
    }

    struct CountingFactory {
        builds: Arc<AtomicUsize>,
    }

    impl EngineFactory for CountingFactory {
        fn build<'a>(&'a self, languages: &'a LanguagePair) -> BoxFuture<'a, Result<Engines>> {
            Box::pin(async move {
                self.builds.fetch_add(1, Ordering::SeqCst);
                Ok(Engines {
                    recognizer: Box::new(NullRecognizer {
                        language: languages.from,
                    }),
                    translator: Box::new(EchoBackend {
                        languages: languages.clone(),
                    }),
                })
            })
        }
    }

    #[tokio::test]
    async fn engines_rebuild_only_on_language_change() {
        let builds = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            builds: builds.clone(),
        };
        let ja_en = LanguagePair::new(ScriptLanguage::Japanese, "en").unwrap();
        let ko_en = LanguagePair::new(ScriptLanguage::Korean, "en").unwrap();

        let handle = EngineHandle::new(Box::new(factory), &ja_en).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        handle.ensure_languages(&ja_en).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        handle.ensure_languages(&ko_en).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        handle.ensure_languages(&ko_en).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
