use anyhow::{Result, anyhow};

use crate::engine::{BoxFuture, EngineFactory, Engines};
use crate::lang::LanguagePair;
use crate::recognizer::TesseractRecognizer;

mod cloud;
mod retry;
mod statistical;

pub use cloud::{CloudTranslator, system_instruction};
pub use statistical::StatisticalTranslator;

/// Sentinel the cloud backend returns for watermarks and scan credits;
/// mapped to an empty translation when responses are applied.
pub const WATERMARK_SENTINEL: &str = "RTMTH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Cloud,
    Statistical,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Cloud => "cloud",
            EngineKind::Statistical => "statistical",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "cloud" | "llm" => Ok(EngineKind::Cloud),
            "statistical" | "mt" => Ok(EngineKind::Statistical),
            other => Err(anyhow!(
                "unknown translation engine '{}' (expected cloud or statistical)",
                other
            )),
        }
    }
}

pub fn resolve_key(kind: EngineKind, override_key: Option<&str>) -> Result<Option<String>> {
    if let Some(key) = override_key
        && !key.trim().is_empty()
    {
        return Ok(Some(key.to_string()));
    }
    match kind {
        EngineKind::Cloud => get_env("GEMINI_API_KEY")
            .or_else(|| get_env("GOOGLE_API_KEY"))
            .map(Some)
            .ok_or_else(|| {
                anyhow!("API key not found for cloud engine (checked GEMINI_API_KEY, GOOGLE_API_KEY)")
            }),
        EngineKind::Statistical => Ok(None),
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Builds the tesseract recognizer plus the configured backend.
pub struct DefaultEngineFactory {
    pub kind: EngineKind,
    pub key: Option<String>,
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl EngineFactory for DefaultEngineFactory {
    fn build<'a>(&'a self, languages: &'a LanguagePair) -> BoxFuture<'a, Result<Engines>> {
        Box::pin(async move {
            let recognizer = Box::new(TesseractRecognizer::new(languages.from));
            let translator: Box<dyn crate::engine::TranslationBackend> = match self.kind {
                EngineKind::Cloud => {
                    let key = resolve_key(EngineKind::Cloud, self.key.as_deref())?
                        .ok_or_else(|| anyhow!("cloud engine requires an API key"))?;
                    Box::new(CloudTranslator::new(
                        languages.clone(),
                        key,
                        self.model.as_deref(),
                        self.max_output_tokens,
                        self.temperature,
                    ))
                }
                EngineKind::Statistical => {
                    Box::new(StatisticalTranslator::new(languages.clone()))
                }
            };
            Ok(Engines {
                recognizer,
                translator,
            })
        })
    }
}
