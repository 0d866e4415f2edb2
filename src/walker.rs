//! Repository walk with ignore rules.
//!
//! Enumerates candidate source files under a canonical root, honoring
//! cumulative `.gitignore` rules with Git's pattern semantics (negation,
//! directory anchors, leading `**`) via the `ignore` crate, plus built-in
//! excludes, a binary probe, and a size cap.

use ignore::WalkBuilder;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Directories never indexed regardless of ignore files.
pub const BUILTIN_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    ".venv",
    "target",
    ".xtrc",
];

/// Files larger than this are skipped.
pub const MAX_FILE_BYTES: u64 = 1_048_576;

/// Bytes probed for a NUL marker to detect binary content.
const BINARY_PROBE_BYTES: usize = 8 * 1024;

/// A candidate file produced by the walk.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub path: PathBuf,
    /// Repo-relative path with forward slashes.
    pub relative_path: String,
    pub language: String,
    pub size_bytes: u64,
}

/// Map a file extension to its language tag. Unknown extensions are skipped
/// by the walk.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "py" => Some("python"),
        "js" | "jsx" => Some("javascript"),
        "ts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// Walk all indexable source files under `root`.
///
/// Unreadable entries are skipped with a warning; they are not errors.
pub fn walk_source_files(root: &Path) -> Vec<WalkedFile> {
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .require_git(false)
        .filter_entry(|entry| {
            // depth 0 is the walk root itself; only descendants are excluded.
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !BUILTIN_EXCLUDES.contains(&name.as_ref())
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let Some(language) = detect_language(path) else {
            continue;
        };

        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::warn!("Skipping {}: {err}", path.display());
                continue;
            }
        };
        if size_bytes > MAX_FILE_BYTES {
            tracing::debug!(
                "Skipping {} ({size_bytes} bytes exceeds cap)",
                path.display()
            );
            continue;
        }

        if is_probably_binary(path) {
            continue;
        }

        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        files.push(WalkedFile {
            path: path.to_path_buf(),
            relative_path,
            language: language.to_string(),
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

/// NUL-byte probe within the first 8 KiB.
fn is_probably_binary(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return true;
    };
    let mut buf = [0u8; BINARY_PROBE_BYTES];
    match file.read(&mut buf) {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => true,
    }
}
