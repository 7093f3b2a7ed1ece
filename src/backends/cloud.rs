//! LLM translation backend speaking the Gemini `generateContent` API in
//! strict-JSON mode: the whole chapter goes out as one JSON object and must
//! come back with the same keys and array lengths.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::WATERMARK_SENTINEL;
use super::retry::{Backoff, is_rate_limited};
use crate::engine::{BoxFuture, PageTexts, TranslationBackend};
use crate::lang::LanguagePair;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Strict-JSON comic translation instruction for one target language.
pub fn system_instruction(target: &str) -> String {
    format!(
        "You are an AI translator specialized in manhwa, manga, and manhua OCR text.\n\
         Input is a JSON object: keys are image filenames, values are arrays of strings.\n\
         Translate each string independently into the language with ISO code \"{target}\".\n\
         If a string is a watermark, URL, or scan credit, replace it with \"{WATERMARK_SENTINEL}\".\n\
         Do not merge, split, reorder, infer, or expand text.\n\
         Output MUST be valid JSON only, same structure, same lengths.\n\
         No explanations. No comments. No extra text."
    )
}

pub struct CloudTranslator {
    languages: LanguagePair,
    key: String,
    model: String,
    max_output_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl CloudTranslator {
    pub fn new(
        languages: LanguagePair,
        key: String,
        model: Option<&str>,
        max_output_tokens: u32,
        temperature: f32,
    ) -> Self {
        let model = model
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        Self {
            languages,
            key,
            model,
            max_output_tokens,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, pages: &PageTexts) -> Result<String> {
        let url = format!("{}/{}:generateContent", BASE_URL, self.model);
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": serde_json::to_string(pages)?}]
            }],
            "systemInstruction": {
                "parts": [{"text": system_instruction(&self.languages.to)}]
            },
            "generationConfig": {
                "topK": 30,
                "topP": 0.5,
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json"
            },
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"}
            ]
        });

        let mut backoff = Backoff::new("cloud");
        loop {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", self.key.clone())
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_candidate_text(&text);
            }
            if is_rate_limited(status, &text) && backoff.wait(&headers).await {
                continue;
            }
            return Err(anyhow!("cloud backend error ({}): {}", status, text));
        }
    }
}

impl TranslationBackend for CloudTranslator {
    fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    fn translate<'a>(&'a self, pages: &'a PageTexts) -> BoxFuture<'a, Result<PageTexts>> {
        Box::pin(async move {
            let raw = self.call(pages).await?;
            Ok(parse_translations(&raw))
        })
    }
}

fn extract_candidate_text(body: &str) -> Result<String> {
    let payload: GenerateResponse = serde_json::from_str(body)
        .map_err(|err| anyhow!("failed to parse cloud response JSON: {}", err))?;
    let parts = payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or_else(|| anyhow!("no candidate returned from cloud backend"))?;
    let text = parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(anyhow!("cloud backend returned an empty candidate"));
    }
    Ok(text)
}

/// Pull the translation object out of the model text. Anything that does
/// not parse leaves the map empty or short; the pipeline falls back to the
/// source text for every position it cannot find.
fn parse_translations(raw: &str) -> PageTexts {
    let Some(start) = raw.find('{') else {
        warn!("cloud response carries no JSON object");
        return PageTexts::new();
    };
    let Some(end) = raw.rfind('}') else {
        warn!("cloud response carries no JSON object");
        return PageTexts::new();
    };
    if end <= start {
        return PageTexts::new();
    }
    let value: Value = match serde_json::from_str(&raw[start..=end]) {
        Ok(value) => value,
        Err(err) => {
            warn!("cloud response JSON parse error: {}", err);
            return PageTexts::new();
        }
    };
    let Value::Object(map) = value else {
        return PageTexts::new();
    };

    let mut pages = PageTexts::new();
    for (key, entry) in map {
        let Value::Array(items) = entry else {
            continue;
        };
        let texts = items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect();
        pages.insert(key, texts);
    }
    pages
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}
