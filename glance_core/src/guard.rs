use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use git2::{Repository as GitRepository, RepositoryOpenFlags};
use glance_api::ErrorKind;
use tracing::{debug, warn};

const REPOSITORY_MARKER: &str = ".git";

/// Errors produced by path confinement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path is relative, contains NUL bytes, or is not valid UTF-8.
    #[error("path is not a usable absolute path")]
    InvalidPath,
    /// Resolved path lies outside every approved root.
    #[error("path is outside the approved roots")]
    PathNotAllowed,
    /// Resolved path is missing, not a directory, or not a repository.
    #[error("path is not a repository")]
    NotARepository,
}

impl PathError {
    /// Stable public classification of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath => ErrorKind::InvalidPath,
            Self::PathNotAllowed => ErrorKind::PathNotAllowed,
            Self::NotARepository => ErrorKind::NotARepository,
        }
    }
}

/// A repository path that passed confinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confined {
    path: Utf8PathBuf,
    root: Utf8PathBuf,
}

impl Confined {
    /// Canonical repository path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Canonical approved root containing the repository.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path relative to its root, rendered as `~` or `~/sub/dir`.
    #[must_use]
    pub fn display_path(&self) -> String {
        match self.path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_str().is_empty() => "~".to_owned(),
            Ok(relative) => format!("~/{relative}"),
            Err(_) => "~".to_owned(),
        }
    }
}

/// Supplier of the approved roots, consulted on every check.
pub trait RootSource: Send + Sync + fmt::Debug {
    /// Roots currently in force.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the roots cannot be read. The guard then
    /// allows nothing.
    fn roots(&self) -> io::Result<Vec<PathBuf>>;
}

/// Roots fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct FixedRoots(Arc<[PathBuf]>);

impl FixedRoots {
    /// Roots from an iterator of paths.
    #[must_use]
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self(roots.into_iter().collect())
    }
}

impl RootSource for FixedRoots {
    fn roots(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.0.to_vec())
    }
}

/// Roots listed in a file that is re-read on every check.
///
/// One absolute path per line; blank lines and `#` comments are ignored.
#[derive(Debug, Clone)]
pub struct RootsFile {
    path: PathBuf,
}

impl RootsFile {
    /// Roots read from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the roots file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Vec<PathBuf> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let root = PathBuf::from(line);
                if root.is_absolute() {
                    Some(root)
                } else {
                    warn!(file = %self.path.display(), entry = line, "ignoring relative approved root");
                    None
                }
            })
            .collect()
    }
}

impl RootSource for RootsFile {
    fn roots(&self) -> io::Result<Vec<PathBuf>> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(self.parse(&contents))
    }
}

/// Approved-root policy shared by every request.
#[derive(Debug, Clone)]
pub struct PathGuard {
    source: Arc<dyn RootSource>,
}

impl PathGuard {
    /// Guard over fixed roots. Roots are canonicalized on each check.
    #[must_use]
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self::from_source(Arc::new(FixedRoots::new(roots)))
    }

    /// Guard that asks `source` for the roots on every check.
    #[must_use]
    pub fn from_source(source: Arc<dyn RootSource>) -> Self {
        Self { source }
    }

    /// Roots in force right now; empty when they cannot be read.
    #[must_use]
    pub fn roots(&self) -> Vec<PathBuf> {
        self.source.roots().unwrap_or_else(|err| {
            warn!(source = ?self.source, error = %err, "approved roots are unavailable; denying all paths");
            Vec::new()
        })
    }

    /// Confine `path` to the roots in force.
    ///
    /// # Errors
    ///
    /// See [`confine`].
    pub fn confine(&self, path: impl AsRef<Path>) -> Result<Confined, PathError> {
        confine(path, &self.roots())
    }
}

/// Resolve `path` and confirm it is a repository inside one of `approved_roots`.
///
/// # Errors
///
/// - [`PathError::InvalidPath`] for relative, NUL-containing or non-UTF-8 paths.
/// - [`PathError::PathNotAllowed`] when the resolved path escapes every root.
/// - [`PathError::NotARepository`] when it is missing, not a directory, has
///   no `.git` marker, or is a bare repository.
pub fn confine(path: impl AsRef<Path>, approved_roots: &[PathBuf]) -> Result<Confined, PathError> {
    let path = path.as_ref();
    if !path.is_absolute() || path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(PathError::InvalidPath);
    }

    let (resolved, exists) = resolve(path);

    let roots: Vec<PathBuf> = approved_roots
        .iter()
        .filter_map(|root| match fs::canonicalize(root) {
            Ok(canonical) => Some(canonical),
            Err(err) => {
                debug!(root = %root.display(), error = %err, "approved root is unavailable");
                None
            }
        })
        .collect();
    // `Path::starts_with` compares whole components, so `/repos-evil` is not under `/repos`.
    let root = roots
        .iter()
        .find(|root| resolved.starts_with(root))
        .cloned()
        .ok_or(PathError::PathNotAllowed)?;

    if !exists || !resolved.is_dir() {
        return Err(PathError::NotARepository);
    }
    let repo = open_repository(&resolved)?;

    // A `.git` symlink or `gitdir:` file can move the repository data elsewhere.
    for git_dir in [repo.path(), repo.commondir()] {
        let git_dir = fs::canonicalize(git_dir).map_err(|_| PathError::NotARepository)?;
        if !roots.iter().any(|root| git_dir.starts_with(root)) {
            debug!(git_dir = %git_dir.display(), "repository data lies outside the approved roots");
            return Err(PathError::PathNotAllowed);
        }
    }

    let path = Utf8PathBuf::from_path_buf(resolved).map_err(|_| PathError::InvalidPath)?;
    let root = Utf8PathBuf::from_path_buf(root).map_err(|_| PathError::InvalidPath)?;
    Ok(Confined { path, root })
}

/// Canonicalize `path`; for missing paths, canonicalize the deepest existing
/// ancestor and apply the remaining components lexically.
fn resolve(path: &Path) -> (PathBuf, bool) {
    if let Ok(canonical) = fs::canonicalize(path) {
        return (canonical, true);
    }

    let mut resolved = PathBuf::new();
    let mut exists = true;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                if exists {
                    match fs::canonicalize(&resolved) {
                        Ok(canonical) => resolved = canonical,
                        Err(_) => exists = false,
                    }
                }
            }
        }
    }

    (resolved, false)
}

fn open_repository(path: &Path) -> Result<GitRepository, PathError> {
    if fs::symlink_metadata(path.join(REPOSITORY_MARKER)).is_err() {
        return Err(PathError::NotARepository);
    }

    let repo = GitRepository::open_ext(path, RepositoryOpenFlags::NO_SEARCH, &[] as &[&OsStr])
        .map_err(|err| {
            debug!(error = %err, "repository marker present but repository failed to open");
            PathError::NotARepository
        })?;
    if repo.is_bare() {
        return Err(PathError::NotARepository);
    }
    Ok(repo)
}
