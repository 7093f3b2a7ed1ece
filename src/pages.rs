//! Chapter page sources: a library directory tree or a `.cbz` archive per
//! chapter. Pages come back in case-insensitive natural order so `page2`
//! sorts before `page10`.

use std::cmp::Ordering;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::queue::ChapterRef;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "avif"];

#[derive(Debug, Clone)]
pub struct ChapterPage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Yields the ordered page images of a chapter.
pub trait PageSource: Send + Sync {
    fn chapter_pages(&self, chapter: &ChapterRef) -> Result<Vec<ChapterPage>>;
}

/// Library tree layout: `<root>/<source>/<manga>/<chapter>/` holding image
/// files, or `<root>/<source>/<manga>/<chapter>.cbz`.
pub struct LibraryPageSource {
    root: PathBuf,
}

impl LibraryPageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn chapter_dir(&self, chapter: &ChapterRef) -> PathBuf {
        self.root
            .join(&chapter.source)
            .join(&chapter.manga)
            .join(&chapter.chapter)
    }

    /// Every chapter under the library root, in natural order.
    pub fn list_chapters(&self) -> Result<Vec<ChapterRef>> {
        let mut chapters = Vec::new();
        for source in sorted_dirs(&self.root)? {
            let source_name = dir_name(&source);
            for manga in sorted_dirs(&source)? {
                let manga_name = dir_name(&manga);
                let mut entries = fs::read_dir(&manga)
                    .with_context(|| format!("failed to list {}", manga.display()))?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .collect::<Vec<_>>();
                entries.sort_by(|a, b| natural_cmp(&dir_name(a), &dir_name(b)));
                for entry in entries {
                    let name = dir_name(&entry);
                    if entry.is_dir() {
                        chapters.push(ChapterRef::new(&source_name, &manga_name, &name));
                    } else if is_archive_name(&name) {
                        let stem = name
                            .rsplit_once('.')
                            .map(|(stem, _)| stem.to_string())
                            .unwrap_or(name);
                        chapters.push(ChapterRef::new(&source_name, &manga_name, &stem));
                    }
                }
            }
        }
        Ok(chapters)
    }

    fn read_directory(&self, dir: &Path) -> Result<Vec<ChapterPage>> {
        let mut pages = Vec::new();
        for entry in
            fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let name = dir_name(&path);
            if !path.is_file() || !is_image_name(&name) {
                continue;
            }
            let bytes = fs::read(&path)
                .with_context(|| format!("failed to read page {}", path.display()))?;
            pages.push(ChapterPage { name, bytes });
        }
        pages.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Ok(pages)
    }

    fn read_archive(&self, path: &Path) -> Result<Vec<ChapterPage>> {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open archive {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("failed to read archive {}", path.display()))?;

        let mut names: Vec<String> = (0..archive.len())
            .filter_map(|index| {
                let entry = archive.by_index(index).ok()?;
                let name = entry.name().to_string();
                (entry.is_file() && is_image_name(&name)).then_some(name)
            })
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));

        let mut pages = Vec::with_capacity(names.len());
        for name in names {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("missing archive entry {}", name))?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("failed to read archive entry {}", name))?;
            pages.push(ChapterPage { name, bytes });
        }
        Ok(pages)
    }
}

impl PageSource for LibraryPageSource {
    fn chapter_pages(&self, chapter: &ChapterRef) -> Result<Vec<ChapterPage>> {
        let dir = self.chapter_dir(chapter);
        if dir.is_dir() {
            return self.read_directory(&dir);
        }
        for extension in ["cbz", "zip"] {
            // Not with_extension: chapter names may contain dots.
            let archive = dir.with_file_name(format!("{}.{}", chapter.chapter, extension));
            if archive.is_file() {
                return self.read_archive(&archive);
            }
        }
        Err(anyhow!("chapter not found: {}", chapter))
    }
}

fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = fs::read_dir(path)
        .with_context(|| format!("failed to list {}", path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort_by(|a, b| natural_cmp(&dir_name(a), &dir_name(b)));
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, extension)| {
            IMAGE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

fn is_archive_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, extension)| matches!(extension.to_ascii_lowercase().as_str(), "cbz" | "zip"))
        .unwrap_or(false)
}

/// Case-insensitive comparison treating digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().flat_map(char::to_lowercase).peekable();
    let mut right = b.chars().flat_map(char::to_lowercase).peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lc), Some(rc)) => {
                if lc.is_ascii_digit() && rc.is_ascii_digit() {
                    let ln = take_number(&mut left);
                    let rn = take_number(&mut right);
                    match ln.cmp(&rn) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                match lc.cmp(&rc) {
                    Ordering::Equal => {
                        left.next();
                        right.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<impl Iterator<Item = char>>) -> u64 {
    let mut value = 0u64;
    while let Some(ch) = chars.peek().copied() {
        let Some(digit) = ch.to_digit(10) else {
            break;
        };
        value = value.saturating_mul(10).saturating_add(digit as u64);
        chars.next();
    }
    value
}
