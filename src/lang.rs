use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Script family the recognition engine is initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Latin,
    Chinese,
    Japanese,
    Korean,
}

impl ScriptLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            ScriptLanguage::Latin => "en",
            ScriptLanguage::Chinese => "zh",
            ScriptLanguage::Japanese => "ja",
            ScriptLanguage::Korean => "ko",
        }
    }

    /// Tesseract traineddata names for this script.
    pub fn tesseract_langs(&self) -> &'static str {
        match self {
            ScriptLanguage::Latin => "eng",
            ScriptLanguage::Chinese => "chi_sim+chi_sim_vert",
            ScriptLanguage::Japanese => "jpn+jpn_vert",
            ScriptLanguage::Korean => "kor+kor_vert",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "latin" | "en" | "eng" => Ok(ScriptLanguage::Latin),
            "chinese" | "zh" | "zho" => Ok(ScriptLanguage::Chinese),
            "japanese" | "ja" | "jpn" => Ok(ScriptLanguage::Japanese),
            "korean" | "ko" | "kor" => Ok(ScriptLanguage::Korean),
            other => Err(anyhow!(
                "unknown recognizer script '{}' (expected latin, chinese, japanese, korean)",
                other
            )),
        }
    }
}

/// Source script plus target language code of one translation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub from: ScriptLanguage,
    pub to: String,
}

impl LanguagePair {
    pub fn new(from: ScriptLanguage, to: &str) -> Result<Self> {
        let to = to.trim().to_lowercase();
        if !(2..=3).contains(&to.len()) || !to.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(anyhow!(
                "invalid target language code '{}' (expected ISO 639-1/2/3 code)",
                to
            ));
        }
        Ok(Self { from, to })
    }
}
