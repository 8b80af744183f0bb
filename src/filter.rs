//! Selection of the files a batch run should touch.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Suffix every generated file carries
pub const NORMALIZED_SUFFIX: &str = "_normalized.mp3";

/// Case-insensitive file-name extension allow list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    /// Lowercase, with a leading dot
    suffixes: Vec<String>,
}

impl ExtensionFilter {
    /// Parses a comma separated list such as `mp3, .WAV`. Blank entries are ignored.
    pub fn parse(csv: &str) -> Self {
        let suffixes = csv
            .split(',')
            .map(|e| e.trim().trim_start_matches('.'))
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{}", e.to_lowercase()))
            .collect();
        ExtensionFilter { suffixes }
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Whether a file name qualifies for processing.
    ///
    /// Earlier outputs are always rejected, whatever the allow list says.
    pub fn accepts(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        if name.ends_with(NORMALIZED_SUFFIX) {
            return false;
        }
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::parse("mp3")
    }
}

/// Resolves a path to an absolute one, following symlinks when it exists
pub(crate) fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Recursively lists the files under `input_dir` accepted by `filter`, in file-name order.
///
/// Subdirectories at or below `output_dir` are not entered. The walk root itself is
/// always read, so output written next to the inputs is only excluded by its name.
/// When `output_dir` is `input_dir` every subdirectory is skipped and only the top
/// level is listed.
pub fn find_audio_files(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    filter: &ExtensionFilter,
) -> Vec<PathBuf> {
    let output_dir = resolve(output_dir.as_ref());
    let mut audio_files = Vec::new();

    let walker = WalkDir::new(input_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_inside_output(e, &output_dir));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if filter.accepts(&entry.file_name().to_string_lossy()) {
            audio_files.push(entry.into_path());
        }
    }
    audio_files
}

fn is_inside_output(entry: &DirEntry, output_dir: &Path) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && resolve(entry.path()).starts_with(output_dir)
}
