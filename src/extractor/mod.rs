//! Module Extractor: analyses a module working tree into normalised records
//! for the root module, its submodules and its examples.

mod analyzer;
mod record;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use analyzer::{AnalyzeFuture, ModuleAnalyzer, TerraformDocsAnalyzer};
pub use record::{
    ModuleCall, ModuleInput, ModuleOutput, ModuleRecord, ModuleResource, ProviderRequirement,
    TerraformDocs,
};

use crate::error::{Error, Result};
use crate::storage::{StorageEngine, safe_join};

const METADATA_FILES: [&str; 2] = ["terrareg.json", ".terrareg.json"];

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub modules_directory: String,
    pub examples_directory: String,
    /// Extensions, without the dot, of example files kept for rendering.
    pub example_file_extensions: Vec<String>,
    /// Glob patterns of root files stored as module-version files.
    pub additional_files: Vec<String>,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            modules_directory: "modules".to_string(),
            examples_directory: "examples".to_string(),
            example_file_extensions: ["tf", "tfvars", "sh", "json"].map(String::from).to_vec(),
            additional_files: ["LICENSE", "CHANGELOG.md"].map(String::from).to_vec(),
        }
    }
}

/// One analysed directory: the normalised record plus the raw analyzer
/// report that is persisted as module details.
#[derive(Debug, Clone)]
pub struct AnalyzedModule {
    pub record: ModuleRecord,
    pub terraform_docs: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedSubmodule {
    /// Forward-slash path relative to the module root.
    pub path: String,
    pub module: AnalyzedModule,
}

#[derive(Debug, Clone)]
pub struct ExtractedExample {
    pub path: String,
    pub module: AnalyzedModule,
    /// (path relative to the module root, content)
    pub files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Optional `terrareg.json` metadata shipped in the module root.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variable_template: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ExtractedModule {
    pub root: AnalyzedModule,
    pub submodules: Vec<ExtractedSubmodule>,
    pub examples: Vec<ExtractedExample>,
    pub metadata: ModuleMetadata,
    pub additional_files: Vec<ExtractedFile>,
}

impl ExtractedModule {
    /// Nothing to publish: the root has no Terraform files and, unless
    /// empty roots are allowed, nothing else counts.
    #[must_use]
    pub fn is_rejected_as_empty(&self, allow_empty_root: bool) -> bool {
        if !self.root.record.empty {
            return false;
        }
        !(allow_empty_root && (!self.submodules.is_empty() || !self.examples.is_empty()))
    }
}

#[derive(Clone)]
pub struct ModuleExtractor {
    storage: StorageEngine,
    analyzer: Arc<dyn ModuleAnalyzer>,
    settings: ExtractorSettings,
}

impl ModuleExtractor {
    pub fn new(
        storage: StorageEngine,
        analyzer: Arc<dyn ModuleAnalyzer>,
        settings: ExtractorSettings,
    ) -> Self {
        Self {
            storage,
            analyzer,
            settings,
        }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Analyse the module rooted at `root`.
    pub async fn extract(&self, root: &Path, cancel: &CancellationToken) -> Result<ExtractedModule> {
        info!("Extracting module metadata with {}", self.analyzer.name());
        let root_module = self.analyze_dir(root, cancel).await?;

        let mut submodules = Vec::new();
        for (path, dir) in self.child_dirs(root, &self.settings.modules_directory)? {
            let module = self.analyze_dir(&dir, cancel).await?;
            submodules.push(ExtractedSubmodule { path, module });
        }

        let mut examples = Vec::new();
        for (path, dir) in self.child_dirs(root, &self.settings.examples_directory)? {
            let module = self.analyze_dir(&dir, cancel).await?;
            let files = self.example_files(&dir, &path)?;
            examples.push(ExtractedExample {
                path,
                module,
                files,
            });
        }

        debug!(
            "Extracted {} submodules and {} examples",
            submodules.len(),
            examples.len()
        );

        Ok(ExtractedModule {
            root: root_module,
            submodules,
            examples,
            metadata: self.read_metadata(root)?,
            additional_files: self.additional_files(root)?,
        })
    }

    async fn analyze_dir(&self, dir: &Path, cancel: &CancellationToken) -> Result<AnalyzedModule> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let entries = self.storage.list_dir(dir)?;
        let empty = !entries
            .iter()
            .any(|e| !e.is_dir && e.name.ends_with(".tf"));
        let readme = match entries
            .iter()
            .find(|e| !e.is_dir && e.name.eq_ignore_ascii_case("readme.md"))
        {
            Some(entry) => Some(self.storage.read_file(&entry.path)?),
            None => None,
        };

        let (docs, raw) = if empty {
            let docs = TerraformDocs::default();
            let raw = serde_json::to_string(&docs)
                .map_err(|e| Error::extraction(e.to_string(), ""))?;
            (docs, raw)
        } else {
            let raw = self.analyzer.analyze(dir, cancel).await?;
            (TerraformDocs::parse(&raw)?, raw)
        };

        Ok(AnalyzedModule {
            record: docs.to_record(readme, empty),
            terraform_docs: raw,
        })
    }

    /// Directories one level below `root/<parent>`, as (relative path, absolute path).
    fn child_dirs(&self, root: &Path, parent: &str) -> Result<Vec<(String, std::path::PathBuf)>> {
        let parent = parent.trim_matches('/');
        if parent.is_empty() {
            return Ok(Vec::new());
        }
        let dir = safe_join(root, &[parent])?;
        Ok(self
            .storage
            .list_dir(&dir)?
            .into_iter()
            .filter(|e| e.is_dir && !e.is_symlink && !e.name.starts_with('.'))
            .map(|e| (format!("{parent}/{}", e.name), e.path))
            .collect())
    }

    fn example_files(&self, dir: &Path, relative: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let patterns = compile_patterns(
            self.settings
                .example_file_extensions
                .iter()
                .map(|ext| format!("*.{}", ext.trim_start_matches('.'))),
        );

        let mut files = Vec::new();
        for entry in self.storage.list_dir(dir)? {
            if entry.is_dir || entry.is_symlink {
                continue;
            }
            if patterns.iter().any(|p| p.matches(&entry.name)) {
                let content = self.storage.read_file(&entry.path)?;
                files.push((format!("{relative}/{}", entry.name), content));
            }
        }
        Ok(files)
    }

    fn read_metadata(&self, root: &Path) -> Result<ModuleMetadata> {
        for name in METADATA_FILES {
            let path = root.join(name);
            if !self.storage.file_exists(&path)? {
                continue;
            }
            let raw = self.storage.read_to_string(&path)?;
            return serde_json::from_str(&raw)
                .map_err(|e| Error::extraction(format!("invalid {name}: {e}"), ""));
        }
        Ok(ModuleMetadata::default())
    }

    fn additional_files(&self, root: &Path) -> Result<Vec<ExtractedFile>> {
        let patterns = compile_patterns(self.settings.additional_files.iter().cloned());
        let mut files = Vec::new();
        for entry in self.storage.list_dir(root)? {
            if entry.is_dir || entry.is_symlink || !patterns.iter().any(|p| p.matches(&entry.name)) {
                continue;
            }
            files.push(ExtractedFile {
                content: self.storage.read_file(&entry.path)?,
                content_type: guess_content_type(&entry.name).to_string(),
                path: entry.name,
            });
        }
        Ok(files)
    }
}

fn compile_patterns(patterns: impl Iterator<Item = String>) -> Vec<glob::Pattern> {
    patterns
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| glob::Pattern::new(p.trim()).ok())
        .collect()
}

/// Content type served for stored module files.
#[must_use]
pub fn guess_content_type(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("md") => "text/markdown; charset=utf-8",
        Some("json") => "application/json",
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("yaml" | "yml") => "application/yaml",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        _ => "text/plain; charset=utf-8",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Stands in for terraform-docs: reports `docs.json` from the analysed
    /// directory when present, otherwise an empty analysis.
    pub struct FileAnalyzer;

    impl ModuleAnalyzer for FileAnalyzer {
        fn name(&self) -> &str {
            "file-analyzer"
        }

        fn analyze<'a>(
            &'a self,
            module_dir: &'a Path,
            _cancel: &'a CancellationToken,
        ) -> AnalyzeFuture<'a> {
            Box::pin(async move {
                match tokio::fs::read_to_string(module_dir.join("docs.json")).await {
                    Ok(raw) => Ok(raw),
                    Err(_) => Ok("{}".to_string()),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::testing::FileAnalyzer;
    use super::*;
    use crate::storage::PathBuilder;

    fn extractor(temp: &TempDir) -> ModuleExtractor {
        ModuleExtractor::new(
            StorageEngine::new(PathBuilder::new(temp.path().join("data"), temp.path().join("tmp"))),
            Arc::new(FileAnalyzer),
            ExtractorSettings::default(),
        )
    }

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[tokio::test]
    async fn test_extract_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tmp/job");
        write(&root, "main.tf", "variable \"name\" {}");
        write(&root, "README.md", "# VPC");
        write(
            &root,
            "docs.json",
            r#"{"inputs": [{"name": "name", "type": "string", "required": true}]}"#,
        );
        write(&root, "LICENSE", "MIT");
        write(&root, "terrareg.json", r#"{"owner": "platform", "description": "Network"}"#);
        write(&root, "modules/private/main.tf", "output \"id\" {}");
        write(&root, "modules/docs-only/README.md", "nothing");
        write(&root, "examples/basic/main.tf", "module \"vpc\" { source = \"../..\" }");
        write(&root, "examples/basic/terraform.tfvars", "name = \"x\"");
        write(&root, "examples/basic/notes.txt", "ignored");

        let extracted = extractor(&temp)
            .extract(&root, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!extracted.root.record.empty);
        assert_eq!(extracted.root.record.inputs[0].name, "name");
        assert_eq!(extracted.root.record.readme.as_deref(), Some(b"# VPC".as_slice()));
        assert_eq!(extracted.metadata.owner.as_deref(), Some("platform"));

        let submodule_paths: Vec<_> = extracted.submodules.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(submodule_paths, ["modules/docs-only", "modules/private"]);
        assert!(extracted.submodules[0].module.record.empty);
        assert!(!extracted.submodules[1].module.record.empty);

        assert_eq!(extracted.examples.len(), 1);
        let example_files: Vec<_> = extracted.examples[0].files.iter().map(|f| f.0.as_str()).collect();
        assert_eq!(
            example_files,
            ["examples/basic/main.tf", "examples/basic/terraform.tfvars"]
        );

        assert_eq!(extracted.additional_files.len(), 1);
        assert_eq!(extracted.additional_files[0].path, "LICENSE");
        assert!(!extracted.is_rejected_as_empty(false));
    }

    #[tokio::test]
    async fn test_empty_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tmp/job");
        write(&root, "modules/a/main.tf", "");

        let extracted = extractor(&temp)
            .extract(&root, &CancellationToken::new())
            .await
            .unwrap();
        assert!(extracted.root.record.empty);
        assert!(extracted.is_rejected_as_empty(false));
        assert!(!extracted.is_rejected_as_empty(true));
    }

    #[tokio::test]
    async fn test_invalid_analyzer_output() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tmp/job");
        write(&root, "main.tf", "");
        write(&root, "docs.json", "[1, 2]");

        let err = extractor(&temp)
            .extract(&root, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tmp/job");
        write(&root, "main.tf", "");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            extractor(&temp).extract(&root, &cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("CHANGELOG.md"), "text/markdown; charset=utf-8");
        assert_eq!(guess_content_type("LICENSE"), "text/plain; charset=utf-8");
    }
}
