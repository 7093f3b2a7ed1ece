//! Durable chapter artifacts: one JSON file per chapter mapping page
//! filenames to their blocks. Files are written to a temp file first and
//! persisted atomically so a cancelled worker never leaves a partial
//! artifact behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::geometry::PageBlocks;
use crate::queue::ChapterRef;

pub type ChapterArtifact = BTreeMap<String, PageBlocks>;

pub trait ArtifactStore: Send + Sync {
    fn exists(&self, chapter: &ChapterRef) -> bool;
    fn save(&self, chapter: &ChapterRef, pages: &ChapterArtifact) -> Result<()>;
    fn load(&self, chapter: &ChapterRef) -> Result<ChapterArtifact>;
}

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, chapter: &ChapterRef) -> PathBuf {
        self.root
            .join(sanitize_component(&chapter.source))
            .join(sanitize_component(&chapter.manga))
            .join(format!("{}.json", sanitize_component(&chapter.chapter)))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, chapter: &ChapterRef) -> bool {
        self.artifact_path(chapter).is_file()
    }

    fn save(&self, chapter: &ChapterRef, pages: &ChapterArtifact) -> Result<()> {
        let path = self.artifact_path(chapter);
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create artifact dir: {}", dir.display()))?;
        let tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp artifact in {}", dir.display()))?;
        serde_json::to_writer_pretty(&tmp, pages)
            .with_context(|| format!("failed to encode artifact for {}", chapter))?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist artifact: {}", path.display()))?;
        Ok(())
    }

    fn load(&self, chapter: &ChapterRef) -> Result<ChapterArtifact> {
        let path = self.artifact_path(chapter);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read artifact: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse artifact: {}", path.display()))
    }
}

fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' ') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
