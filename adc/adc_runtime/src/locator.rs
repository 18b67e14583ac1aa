//! On-disk module discovery and version resolution.
//!
//! Modules live at
//! `<root>/<kind-dir>/[<category>/]<name>/<version>-<language>/`, for example
//! `providers/files/file-storage/1.0.0-cpp/`. Each version directory holds a
//! `package.json`, an optional `modules.json` and the language's entry file.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use adc_core::error::LoaderError;
use adc_core::{Manifest, ModuleDescriptor, ModuleKind, PackageDescriptor, Result, Version};
use serde::Serialize;
use tokio::fs;
use tracing::debug;

pub const PACKAGE_FILE: &str = "package.json";
pub const MANIFEST_FILE: &str = "modules.json";

/// A module resolved to one installed version.
#[derive(Debug, Clone)]
pub struct LocatedModule {
    pub kind: ModuleKind,
    pub name: String,
    pub path: PathBuf,
    pub version: Version,
    pub language: String,
    pub package: PackageDescriptor,

    /// The module's own requirements; empty when it has no `modules.json`
    pub manifest: Manifest,
}

/// One installed version of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledVersion {
    pub version: Version,
    pub language: String,
}

impl InstalledVersion {
    /// Directory name: `<version>-<language>`.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.version, self.language)
    }
}

/// A module directory with everything installed under it.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledModule {
    pub kind: ModuleKind,
    pub category: Option<String>,
    pub name: String,
    pub path: PathBuf,
    pub versions: Vec<InstalledVersion>,
}

/// Split `1.2.0-beta.1-python` into its version and language.
pub fn parse_version_dir(dir_name: &str) -> Option<InstalledVersion> {
    let (version, language) = dir_name.rsplit_once('-')?;
    if language.is_empty() {
        return None;
    }
    Some(InstalledVersion {
        version: version.parse().ok()?,
        language: language.to_string(),
    })
}

async fn subdirectories(path: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn installed_versions(module_dir: &Path) -> std::io::Result<Vec<InstalledVersion>> {
    Ok(subdirectories(module_dir)
        .await?
        .iter()
        .filter_map(|(name, _)| parse_version_dir(name))
        .collect())
}

/// Resolves module descriptors against a modules root.
#[derive(Debug, Clone)]
pub struct ModuleLocator {
    root: PathBuf,
    default_language: String,
}

impl ModuleLocator {
    pub fn new(root: impl Into<PathBuf>, default_language: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_language: default_language.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the `<name>` directory under the kind directory, directly or one
    /// category level below.
    pub async fn module_dir(&self, kind: ModuleKind, name: &str) -> Result<PathBuf> {
        let kind_dir = self.root.join(kind.directory());
        let direct = kind_dir.join(name);
        if fs::metadata(&direct).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(direct);
        }

        for (_, category) in subdirectories(&kind_dir).await? {
            let nested = category.join(name);
            if fs::metadata(&nested).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Ok(nested);
            }
        }

        Err(LoaderError::ModuleNotFound {
            name: name.to_string(),
            path: direct,
        }
        .into())
    }

    /// Resolve a descriptor to the highest installed version satisfying it.
    ///
    /// Ties on version prefer the default language, then the
    /// lexicographically smallest one.
    pub async fn locate(&self, kind: ModuleKind, descriptor: &ModuleDescriptor) -> Result<LocatedModule> {
        let module_dir = self.module_dir(kind, &descriptor.name).await?;
        let requirement = descriptor.version_req()?;

        let installed = installed_versions(&module_dir).await?;
        let chosen = installed
            .iter()
            .filter(|v| descriptor.language.as_deref().map_or(true, |l| l == v.language))
            .filter(|v| requirement.matches(&v.version))
            .max_by(|a, b| self.prefer(a, b))
            .cloned()
            .ok_or_else(|| LoaderError::VersionUnsatisfied {
                name: descriptor.name.clone(),
                requested: match &descriptor.language {
                    Some(language) => format!("{} ({})", requirement, language),
                    None => requirement.to_string(),
                },
                available: installed.iter().map(InstalledVersion::dir_name).collect(),
            })?;

        let path = module_dir.join(chosen.dir_name());
        debug!(module = %descriptor.name, path = %path.display(), "Resolved module version");

        let package = match fs::read_to_string(path.join(PACKAGE_FILE)).await {
            Ok(text) => {
                let mut package = PackageDescriptor::from_json(&path.join(PACKAGE_FILE).display().to_string(), &text)?;
                if package.name.is_empty() {
                    package.name = descriptor.name.clone();
                }
                package
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PackageDescriptor::new(descriptor.name.clone()),
            Err(e) => return Err(e.into()),
        };

        let manifest = match fs::read_to_string(path.join(MANIFEST_FILE)).await {
            Ok(text) => {
                let manifest = Manifest::from_json(&path.join(MANIFEST_FILE).display().to_string(), &text)?;
                manifest.validate()?;
                manifest
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(LocatedModule {
            kind,
            name: descriptor.name.clone(),
            path,
            version: chosen.version,
            language: chosen.language,
            package,
            manifest,
        })
    }

    /// Every module installed under the root.
    pub async fn discover(&self) -> Result<Vec<InstalledModule>> {
        let mut modules = Vec::new();

        for kind in ModuleKind::ALL {
            let kind_dir = self.root.join(kind.directory());
            for (name, path) in subdirectories(&kind_dir).await? {
                let versions = installed_versions(&path).await?;
                if !versions.is_empty() {
                    modules.push(InstalledModule {
                        kind,
                        category: None,
                        name,
                        path,
                        versions,
                    });
                    continue;
                }

                // Not a module itself: treat it as a category.
                for (nested_name, nested_path) in subdirectories(&path).await? {
                    let versions = installed_versions(&nested_path).await?;
                    if !versions.is_empty() {
                        modules.push(InstalledModule {
                            kind,
                            category: Some(name.clone()),
                            name: nested_name,
                            path: nested_path,
                            versions,
                        });
                    }
                }
            }
        }

        Ok(modules)
    }

    fn prefer(&self, a: &InstalledVersion, b: &InstalledVersion) -> Ordering {
        a.version
            .cmp(&b.version)
            .then_with(|| {
                let a_default = a.language == self.default_language;
                let b_default = b.language == self.default_language;
                a_default.cmp(&b_default)
            })
            // Smaller language name wins, so it must compare greater.
            .then_with(|| b.language.cmp(&a.language))
    }
}
