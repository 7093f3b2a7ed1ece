//! Statistical MT backend against the public `translate_a/single` endpoint.
//! Texts are packed into length-bounded batches joined by a separator the
//! endpoint reliably keeps as a sentence boundary, and every request carries
//! the endpoint's shift-mix request token.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::warn;

use crate::engine::{BoxFuture, PageTexts, TranslationBackend};
use crate::lang::LanguagePair;

const BASE_URL: &str = "https://translate.google.com/translate_a/single";
const CLIENT: &str = "gtx";
/// Separator that survives translation as a sentence break.
const SAFE_SEPARATOR: &str = " . ";
const MAX_BATCH_CHARS: usize = 2000;

pub struct StatisticalTranslator {
    languages: LanguagePair,
    client: reqwest::Client,
}

impl StatisticalTranslator {
    pub fn new(languages: LanguagePair) -> Self {
        Self {
            languages,
            client: reqwest::Client::new(),
        }
    }

    async fn translate_batch(&self, text: &str) -> Result<String> {
        let token = request_token(text);
        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("client", CLIENT),
                ("sl", "auto"),
                ("tl", self.languages.to.as_str()),
                ("dt", "t"),
                ("tk", token.as_str()),
                ("q", text),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("statistical backend error ({})", status));
        }
        parse_batch_response(&body)
    }
}

impl TranslationBackend for StatisticalTranslator {
    fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    fn translate<'a>(&'a self, pages: &'a PageTexts) -> BoxFuture<'a, Result<PageTexts>> {
        Box::pin(async move {
            // Start from the source texts so untranslated positions fall
            // back without any bookkeeping.
            let mut result = pages.clone();
            let slots: Vec<(String, usize, String)> = pages
                .iter()
                .flat_map(|(page, texts)| {
                    texts.iter().enumerate().map(move |(index, text)| {
                        (page.clone(), index, text.replace('\n', " ").trim().to_string())
                    })
                })
                .filter(|(_, _, text)| !text.is_empty())
                .collect();
            if slots.is_empty() {
                return Ok(result);
            }

            let batches = pack_batches(&slots);
            let total = batches.len();
            let mut failed = 0usize;
            for batch in batches {
                let joined = batch
                    .iter()
                    .map(|slot| format!("{}{}", slots[*slot].2, SAFE_SEPARATOR))
                    .collect::<Vec<_>>()
                    .join("\n");
                let translated = match self.translate_batch(&joined).await {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("statistical batch failed: {:#}", err);
                        failed += 1;
                        continue;
                    }
                };
                let lines: Vec<&str> = translated
                    .split('\n')
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect();
                for (position, slot) in batch.iter().enumerate() {
                    let Some(line) = lines.get(position) else {
                        break;
                    };
                    let (page, index, _) = &slots[*slot];
                    if let Some(texts) = result.get_mut(page)
                        && let Some(entry) = texts.get_mut(*index)
                    {
                        *entry = line
                            .trim_end_matches('.')
                            .trim_end_matches(" .")
                            .trim()
                            .to_string();
                    }
                }
            }
            if failed == total {
                return Err(anyhow!("all {} translation batches failed", total));
            }
            Ok(result)
        })
    }
}

/// Greedily pack slot indices into batches under the character budget.
fn pack_batches(slots: &[(String, usize, String)]) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut length = 0usize;
    for (slot, (_, _, text)) in slots.iter().enumerate() {
        let addition = text.chars().count() + SAFE_SEPARATOR.len() + 1;
        if length + addition > MAX_BATCH_CHARS && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            length = 0;
        }
        current.push(slot);
        length += addition;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// The endpoint nests translated sentences in arrays of arrays; the first
/// element of each sentence entry is the translated text.
fn parse_batch_response(body: &str) -> Result<String> {
    let root: Value = serde_json::from_str(body).with_context(|| "invalid translation response")?;
    let sentences = root
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("translation response has no sentence list"))?;
    let mut result = String::new();
    for sentence in sentences {
        if let Some(text) = sentence.get(0).and_then(Value::as_str) {
            result.push_str(text);
        }
    }
    Ok(result)
}

/// Request token the endpoint expects; a pair of shift-mix rounds over the
/// UTF-8 bytes of the query.
fn request_token(text: &str) -> String {
    let mut acc: u64 = 406_644;
    for byte in text.bytes() {
        acc = shift_mix(acc + byte as u64, "+-a^+6");
    }
    let token = shift_mix(acc, "+-3^+b+-f") ^ 3_293_161_072;
    let token = token % 1_000_000;
    format!("{}.{}", token, 406_644 ^ token)
}

fn shift_mix(mut value: u64, ops: &str) -> u64 {
    let ops: Vec<char> = ops.chars().collect();
    let mut i = 0;
    while i + 2 < ops.len() {
        let amount = if ops[i + 2].is_ascii_lowercase() {
            ops[i + 2] as u32 - 'W' as u32
        } else {
            ops[i + 2].to_digit(10).unwrap_or(0)
        };
        let shifted = if ops[i + 1] == '+' {
            value >> amount
        } else {
            value << amount
        };
        value = if ops[i] == '+' {
            (value + shifted) & 0xFFFF_FFFF
        } else {
            value ^ shifted
        };
        i += 3;
    }
    value
}
