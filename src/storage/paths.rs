use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ModuleIdentity;

pub const TAR_ARCHIVE_NAME: &str = "source.tar.gz";
pub const ZIP_ARCHIVE_NAME: &str = "source.zip";

const MODULES_DIR: &str = "modules";
const PROVIDERS_DIR: &str = "providers";
const UPLOAD_DIR: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 2] = [ArchiveKind::TarGz, ArchiveKind::Zip];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::TarGz => TAR_ARCHIVE_NAME,
            Self::Zip => ZIP_ARCHIVE_NAME,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::TarGz => "application/gzip",
            Self::Zip => "application/zip",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            TAR_ARCHIVE_NAME => Some(Self::TarGz),
            ZIP_ARCHIVE_NAME => Some(Self::Zip),
            _ => None,
        }
    }
}

/// Which tree an archive directory lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTree {
    /// Canonical location served to clients (published versions).
    Modules,
    /// Staging location for unpublished versions.
    Upload,
}

/// Lexically normalise `path`, resolving `.` and `..` without touching the
/// filesystem. Fails when `..` would climb above the first component.
pub fn normalize_lexically(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::PathTraversal(format!(
                        "'{}' escapes its root",
                        path.display()
                    )));
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(segment) => {
                out.push(segment);
                depth += 1;
            }
        }
    }

    Ok(out)
}

/// Join relative `parts` onto `base`, rejecting any input whose lexical
/// normalisation leaves `base`.
pub fn safe_join<S: AsRef<str>>(base: &Path, parts: &[S]) -> Result<PathBuf> {
    let base = normalize_lexically(base)?;
    let mut joined = base.clone();

    for part in parts {
        let part = part.as_ref();
        if part.contains('\0') {
            return Err(Error::InvalidPath("path contains a NUL byte".into()));
        }
        let candidate = Path::new(part);
        if candidate.has_root() || candidate.is_absolute() || part.starts_with('\\') {
            return Err(Error::PathTraversal(format!("'{part}' is absolute")));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(segment) => joined.push(segment),
                Component::CurDir => {}
                Component::ParentDir => {
                    if joined == base || !joined.pop() {
                        return Err(Error::PathTraversal(format!("'{part}' escapes base")));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::PathTraversal(format!("'{part}' is absolute")));
                }
            }
        }
    }

    if !joined.starts_with(&base) {
        return Err(Error::PathTraversal("joined path escapes base".into()));
    }
    Ok(joined)
}

/// Normalise a user supplied relative path (e.g. `modules/private/`) into
/// forward-slash form, rejecting traversal.
pub fn normalize_relative(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let joined = safe_join(Path::new("/"), &[trimmed])?;
    let relative = joined
        .strip_prefix("/")
        .map_err(|_| Error::InvalidPath(path.to_string()))?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

fn single_segment(value: &str) -> Result<&str> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidPath(format!("'{value}' is not a path segment")));
    }
    Ok(value)
}

/// Derives every on-disk location from identities and versions.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    base: PathBuf,
    temp_root: PathBuf,
}

impl PathBuilder {
    pub fn new(base: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            temp_root: temp_root.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn modules_root(&self) -> PathBuf {
        self.base.join(MODULES_DIR)
    }

    pub fn providers_root(&self) -> PathBuf {
        self.base.join(PROVIDERS_DIR)
    }

    pub fn upload_root(&self) -> PathBuf {
        self.base.join(UPLOAD_DIR)
    }

    pub fn tree_root(&self, tree: ArchiveTree) -> PathBuf {
        match tree {
            ArchiveTree::Modules => self.modules_root(),
            ArchiveTree::Upload => self.upload_root(),
        }
    }

    pub fn namespace_dir(&self, tree: ArchiveTree, namespace: &str) -> Result<PathBuf> {
        safe_join(&self.tree_root(tree), &[single_segment(namespace)?])
    }

    pub fn module_provider_dir(&self, tree: ArchiveTree, id: &ModuleIdentity) -> Result<PathBuf> {
        safe_join(
            &self.tree_root(tree),
            &[
                single_segment(&id.namespace)?,
                single_segment(&id.module)?,
                single_segment(&id.provider)?,
            ],
        )
    }

    pub fn version_dir(
        &self,
        tree: ArchiveTree,
        id: &ModuleIdentity,
        version: &str,
    ) -> Result<PathBuf> {
        let dir = self.module_provider_dir(tree, id)?;
        safe_join(&dir, &[single_segment(version)?])
    }

    /// Canonical archive location `<base>/modules/<ns>/<module>/<provider>/<version>/<name>`.
    pub fn archive_path(
        &self,
        id: &ModuleIdentity,
        version: &str,
        kind: ArchiveKind,
    ) -> Result<PathBuf> {
        Ok(self
            .version_dir(ArchiveTree::Modules, id, version)?
            .join(kind.file_name()))
    }

    pub fn staged_archive_path(
        &self,
        id: &ModuleIdentity,
        version: &str,
        kind: ArchiveKind,
    ) -> Result<PathBuf> {
        Ok(self
            .version_dir(ArchiveTree::Upload, id, version)?
            .join(kind.file_name()))
    }

    /// True when `path` lies lexically inside the base or temp root.
    pub fn contains(&self, path: &Path) -> bool {
        let Ok(normalized) = normalize_lexically(path) else {
            return false;
        };
        [&self.base, &self.temp_root].iter().any(|root| {
            normalize_lexically(root)
                .map(|root| normalized.starts_with(root))
                .unwrap_or(false)
        })
    }

    pub fn ensure_contained(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }
        if !self.contains(path) {
            return Err(Error::PathTraversal(format!(
                "'{}' is outside the storage roots",
                path.display()
            )));
        }
        Ok(())
    }

    /// Classifies `path` as an archive under the modules or upload tree,
    /// returning its tree, identity, version and archive kind.
    pub fn classify_archive(
        &self,
        path: &Path,
    ) -> Option<(ArchiveTree, ModuleIdentity, String, ArchiveKind)> {
        let normalized = normalize_lexically(path).ok()?;
        for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
            let root = normalize_lexically(&self.tree_root(tree)).ok()?;
            let Ok(rest) = normalized.strip_prefix(&root) else {
                continue;
            };
            let parts: Vec<&str> = rest
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()?;
            if let [namespace, module, provider, version, file] = parts.as_slice() {
                let kind = ArchiveKind::from_file_name(file)?;
                return Some((
                    tree,
                    ModuleIdentity::new(*namespace, *module, *provider),
                    (*version).to_string(),
                    kind,
                ));
            }
        }
        None
    }

    pub fn is_archive_path(&self, path: &Path) -> bool {
        self.classify_archive(path).is_some()
    }

    /// The archive file name of `path`, when it is an archive path.
    pub fn archive_filename<'a>(&self, path: &'a Path) -> Option<&'a str> {
        self.classify_archive(path)?;
        path.file_name().and_then(|n| n.to_str())
    }
}
