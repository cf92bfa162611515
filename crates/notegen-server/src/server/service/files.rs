//! Rooted, path-confined file access for the static and resource endpoints.
//!
//! Every path coming from a client is treated as relative to a configured
//! root. [`resolve_confined`] rejects anything that could name a file outside
//! that root, both lexically and after symlinks are resolved. Rejections are
//! reported as [`Error::PathTraversal`], which renders exactly like a missing
//! file.

use axum::{body::Body, extract::Request, response::Response};
use notegen_core::{Error, Result};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    io,
    path::{Component, Path, PathBuf},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use walkdir::WalkDir;

/// Extensions recognised as MIDI files in the default asset listing.
const MIDI_EXTENSIONS: [&str; 2] = ["mid", "midi"];

/// Contents of one directory, as returned by the listing endpoints.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

impl Listing {
    fn sort(&mut self) {
        self.files.sort();
        self.dirs.sort();
    }
}

fn io_error(e: &io::Error, context: &str) -> Error {
    if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) {
        Error::NotFound
    } else {
        Error::Io {
            context: format!("{context}: {e}"),
        }
    }
}

/// Resolves `relative` beneath `root`, refusing to leave it.
///
/// The relative path must consist only of normal segments (`.` is ignored).
/// Absolute paths, `..`, drive prefixes and backslash-separated segments are
/// rejected before touching the filesystem. The result is canonicalised and
/// checked again, so a symlink pointing out of the root is rejected too.
///
/// # Errors
///
/// - [`Error::PathTraversal`] if the path escapes `root`.
/// - [`Error::NotFound`] if `root` or the target does not exist.
pub fn resolve_confined(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.contains('\\') || relative.contains('\0') {
        return Err(Error::PathTraversal);
    }

    let relative = Path::new(relative);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal);
            }
        }
    }

    let root = root.canonicalize().map_err(|_| Error::NotFound)?;
    let resolved = root
        .join(relative)
        .canonicalize()
        .map_err(|e| io_error(&e, "resolving path"))?;

    if !resolved.starts_with(&root) {
        #[cfg(feature = "tracing")]
        tracing::warn!("Rejected path escaping its root");
        return Err(Error::PathTraversal);
    }

    Ok(resolved)
}

/// Serves a regular file under `root`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the resolved path is not a regular file.
pub async fn serve_confined(root: &Path, relative: &str, request: Request) -> Result<Response> {
    let path = resolve_confined(root, relative)?;
    if !path.is_file() {
        return Err(Error::NotFound);
    }
    Ok(serve_file(path, request).await)
}

/// Serves a file through [`ServeFile`], which takes care of content type,
/// conditional requests and ranges.
pub async fn serve_file(path: PathBuf, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(infallible) => match infallible {},
    }
}

/// Lists the immediate children of `relative` under `root`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the path does not name a directory.
pub async fn list_dir(root: &Path, relative: &str) -> Result<Listing> {
    let dir = resolve_confined(root, relative)?;
    if !dir.is_dir() {
        return Err(Error::NotFound);
    }

    let mut listing = Listing::default();
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| io_error(&e, "reading directory"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error(&e, "reading directory entry"))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| io_error(&e, "reading file type"))?;
        if file_type.is_dir() {
            listing.dirs.push(name);
        } else {
            listing.files.push(name);
        }
    }

    listing.sort();
    Ok(listing)
}

/// Names of the MIDI files directly inside `dir`, sorted.
///
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory exists but cannot be read.
pub async fn list_midi_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(&e, "reading assets")),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error(&e, "reading assets"))?
    {
        let path = entry.path();
        let is_midi = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MIDI_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)));
        if is_midi && path.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

/// Walks the whole tree under `root` and returns one [`Listing`] per
/// directory, keyed by its `/`-separated path relative to `root` (the root
/// itself is `""`).
///
/// Symlinks are not followed.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if `root` does not exist.
pub fn index_tree(root: &Path) -> Result<BTreeMap<String, Listing>> {
    let root = root.canonicalize().map_err(|_| Error::NotFound)?;
    let mut index: BTreeMap<String, Listing> = BTreeMap::new();
    index.insert(String::new(), Listing::default());

    for entry in WalkDir::new(&root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io {
            context: format!("walking resources: {e}"),
        })?;

        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let parent = relative.parent().map(slash_path).unwrap_or_default();
        let name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type().is_dir() {
            index.entry(slash_path(relative)).or_default();
            index.entry(parent).or_default().dirs.push(name);
        } else {
            index.entry(parent).or_default().files.push(name);
        }
    }

    index.values_mut().for_each(Listing::sort);
    Ok(index)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
