use std::borrow::Cow;

use crate::fs::{Fd, FsError, Result};

use log::warn;
use url::Url;

/// The identity and working directory of whoever is making a call. Every
/// engine operation takes one; nothing is read from ambient process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
    pub cwd: String,
}

impl Context {
    pub fn new<S: Into<String>>(uid: u32, gid: u32, cwd: S) -> Self {
        Self {
            uid,
            gid,
            cwd: cwd.into(),
        }
    }

    /// uid 0, gid 0, working in `/`.
    pub fn root() -> Self {
        Self::new(0, 0, "/")
    }
}

/// The ways a caller may name a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathArg {
    Text(String),
    /// UTF-8 encoded path bytes.
    Bytes(Vec<u8>),
    /// A `file:` URL.
    Url(Url),
    /// An open descriptor, standing in for the path it was opened with.
    Descriptor(Fd),
}

impl PathArg {
    /// The textual form of every variant except `Descriptor`, which only the
    /// descriptor table can answer for.
    pub(crate) fn text(&self) -> Result<Cow<'_, str>> {
        match self {
            PathArg::Text(text) => Ok(Cow::Borrowed(text)),
            PathArg::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| FsError::InvalidArgument(format!("path is not utf-8: {}", e))),
            PathArg::Url(url) => {
                if url.scheme() != "file" {
                    return Err(FsError::InvalidArgument(format!("invalid file URL: {}", url)));
                }
                urlencoding::decode(url.path())
                    .map(|decoded| Cow::Owned(decoded.into_owned()))
                    .map_err(|e| FsError::InvalidArgument(format!("invalid file URL: {}", e)))
            }
            PathArg::Descriptor(fd) => Err(FsError::BadFileDescriptor(*fd)),
        }
    }
}

impl From<&str> for PathArg {
    fn from(text: &str) -> Self {
        PathArg::Text(text.to_string())
    }
}

impl From<String> for PathArg {
    fn from(text: String) -> Self {
        PathArg::Text(text)
    }
}

impl From<&String> for PathArg {
    fn from(text: &String) -> Self {
        PathArg::Text(text.clone())
    }
}

impl From<Vec<u8>> for PathArg {
    fn from(bytes: Vec<u8>) -> Self {
        PathArg::Bytes(bytes)
    }
}

impl From<&[u8]> for PathArg {
    fn from(bytes: &[u8]) -> Self {
        PathArg::Bytes(bytes.to_vec())
    }
}

impl From<Url> for PathArg {
    fn from(url: Url) -> Self {
        PathArg::Url(url)
    }
}

impl From<&PathArg> for PathArg {
    fn from(arg: &PathArg) -> Self {
        arg.clone()
    }
}

/// Collapses `.`, `..` and repeated separators. An absolute input stays
/// absolute; a relative one that collapses to nothing becomes `.`.
///
/// `..` pops whatever precedes it without checking that anything does, so
/// leading `..` segments of a relative path are silently dropped:
/// `normalize("../a")` is `"a"`.
pub fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if out.pop().is_none() && !path.starts_with('/') {
                    warn!("dropping leading \"..\" from relative path {:?}", path);
                }
            }
            _ => out.push(segment),
        }
    }

    let joined = out.join("/");
    if path.starts_with('/') {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Makes `path` absolute against `cwd`, then normalizes it. A relative
/// `cwd` is taken from the root, so the result always starts with `/`.
pub fn resolve(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else if cwd.starts_with('/') {
        normalize(&format!("{}/{}", cwd, path))
    } else {
        normalize(&format!("/{}/{}", cwd, path))
    }
}

/// The non-empty components of a normalized path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty() && *segment != ".")
}

/// Splits a resolved path into its parent directory and final name.
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) if idx + 1 < trimmed.len() => {
            let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
            Ok((parent, &trimmed[idx + 1..]))
        }
        _ => Err(FsError::InvalidArgument(format!(
            "path has no final component: {:?}",
            path
        ))),
    }
}
