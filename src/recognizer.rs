//! Default OCR capability shelling out to the tesseract CLI.
//!
//! Tesseract's TSV output lists word boxes grouped by block/paragraph/line;
//! each line becomes one fragment whose symbol metrics come from the word
//! boxes. TSV carries no baseline angle, so fragments report 0 degrees and
//! vertical-script handling depends on the recognizer's `*_vert` models.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;

use crate::engine::{BoxFuture, Recognizer};
use crate::geometry::{Fragment, Rect};
use crate::lang::ScriptLanguage;

pub struct TesseractRecognizer {
    language: ScriptLanguage,
}

impl TesseractRecognizer {
    pub fn new(language: ScriptLanguage) -> Self {
        Self { language }
    }
}

impl Recognizer for TesseractRecognizer {
    fn language(&self) -> ScriptLanguage {
        self.language
    }

    fn recognize<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<Vec<Fragment>>> {
        Box::pin(async move {
            let mut tmp = tempfile::NamedTempFile::new()
                .with_context(|| "failed to create temp file for OCR")?;
            tmp.write_all(image)
                .with_context(|| "failed to write temp image for OCR")?;
            tmp.flush().ok();

            let output = Command::new("tesseract")
                .arg(tmp.path())
                .arg("stdout")
                .arg("-l")
                .arg(self.language.tesseract_langs())
                .arg("--oem")
                .arg("1")
                .arg("--psm")
                .arg("11")
                .arg("tsv")
                .output()
                .await
                .with_context(|| "failed to run tesseract (is it installed?)")?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(anyhow!("tesseract failed: {}", stderr.trim()));
            }

            let tsv = String::from_utf8_lossy(&output.stdout);
            Ok(parse_tsv_fragments(&tsv))
        })
    }
}

struct WordToken {
    text: String,
    rect: Rect,
}

fn parse_tsv_fragments(tsv: &str) -> Vec<Fragment> {
    let mut lines: BTreeMap<(i32, i32, i32, i32), Vec<WordToken>> = BTreeMap::new();

    for (index, row) in tsv.lines().enumerate() {
        if index == 0 {
            continue;
        }
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let page: i32 = cols[1].parse().unwrap_or(0);
        let block: i32 = cols[2].parse().unwrap_or(0);
        let paragraph: i32 = cols[3].parse().unwrap_or(0);
        let line: i32 = cols[4].parse().unwrap_or(0);
        let left: f32 = cols[6].parse().unwrap_or(0.0);
        let top: f32 = cols[7].parse().unwrap_or(0.0);
        let width: f32 = cols[8].parse().unwrap_or(0.0);
        let height: f32 = cols[9].parse().unwrap_or(0.0);
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 || width <= 0.0 || height <= 0.0 {
            continue;
        }
        lines
            .entry((page, block, paragraph, line))
            .or_default()
            .push(WordToken {
                text: text.to_string(),
                rect: Rect::new(left, top, width, height),
            });
    }

    lines
        .into_values()
        .filter_map(|mut words| {
            words.sort_by(|a, b| a.rect.x.total_cmp(&b.rect.x));
            build_fragment(&words)
        })
        .collect()
}

fn build_fragment(words: &[WordToken]) -> Option<Fragment> {
    let first = words.first()?;
    let mut rect = first.rect;
    let mut chars = 0usize;
    let mut glyph_width = 0.0f32;
    let mut glyph_height = 0.0f32;
    let mut texts = Vec::with_capacity(words.len());
    for word in words {
        rect = rect.union(&word.rect);
        let len = word.text.chars().count().max(1);
        chars += len;
        glyph_width += word.rect.width;
        glyph_height = glyph_height.max(word.rect.height);
        texts.push(word.text.as_str());
    }
    Some(Fragment {
        rect,
        angle: 0.0,
        text: texts.join(" "),
        sym_width: glyph_width / chars.max(1) as f32,
        sym_height: glyph_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn words_of_one_line_become_one_fragment() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t100\t50\t40\t20\t91.0\thello\n\
             5\t1\t1\t1\t1\t2\t150\t50\t50\t20\t88.5\tworld\n"
        );
        let fragments = parse_tsv_fragments(&tsv);
        assert_eq!(fragments.len(), 1);
        let fragment = &fragments[0];
        assert_eq!(fragment.text, "hello world");
        assert_eq!(fragment.rect, Rect::new(100.0, 50.0, 100.0, 20.0));
        assert!((fragment.sym_width - 9.0).abs() < 1e-3);
        assert_eq!(fragment.sym_height, 20.0);
    }

    #[test]
    fn separate_lines_stay_separate() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t100\t50\t40\t20\t91.0\tfirst\n\
             5\t1\t1\t1\t2\t1\t100\t80\t40\t20\t90.0\tsecond\n\
             5\t1\t2\t1\t1\t1\t400\t500\t40\t20\t89.0\telsewhere\n"
        );
        let fragments = parse_tsv_fragments(&tsv);
        assert_eq!(fragments.len(), 3);
    }

    #[test]
    fn low_confidence_and_structural_rows_are_skipped() {
        let tsv = format!(
            "{HEADER}\n\
             4\t1\t1\t1\t1\t0\t100\t50\t200\t20\t-1\t\n\
             5\t1\t1\t1\t1\t1\t100\t50\t40\t20\t-1\tghost\n\
             5\t1\t1\t1\t1\t2\t150\t50\t0\t20\t95.0\tempty\n"
        );
        let fragments = parse_tsv_fragments(&tsv);
        assert!(fragments.is_empty());
    }
}
