//! Declarative module manifests and package descriptors.
//!
//! A manifest (`modules.json`) lists what an app or module requires:
//!
//! ```json
//! {
//!   "failOnError": false,
//!   "providers":   [ { "name": "storage", "version": "^1.0", "config": { "path": "./data" } } ],
//!   "utilities":   [ { "name": "json-file-adapter", "language": "python" } ],
//!   "presets":     [ { "name": "auth" } ]
//! }
//! ```
//!
//! A package descriptor (`package.json`) names one installable unit.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ModuleKind;
use crate::error::ManifestError;
use crate::utils::VersionReq;

/// The request for one module, as written in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    /// Capability name; also the module's directory name.
    pub name: String,

    /// Exact version or version requirement; latest when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Implementation language; any installed language when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Configuration overlaid on the module's own defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// Discriminator for several concurrently loaded instances of one capability.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,

    /// Marks this instance as the one returned by lookups without a discriminator.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// `name` or `name#discriminator`.
    pub fn label(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("{}#{}", self.name, d),
            None => self.name.clone(),
        }
    }

    /// Parsed version requirement, `*` when none was given.
    pub fn version_req(&self) -> Result<VersionReq, ManifestError> {
        match &self.version {
            None => Ok(VersionReq::any()),
            Some(raw) => raw.parse().map_err(|e: String| ManifestError::InvalidVersion {
                name: self.name.clone(),
                requirement: raw.clone(),
                reason: e,
            }),
        }
    }
}

/// Requirements of one app or module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Whether a failed requirement aborts the whole boot.
    #[serde(default)]
    pub fail_on_error: bool,

    #[serde(default)]
    pub providers: Vec<ModuleDescriptor>,

    #[serde(default)]
    pub utilities: Vec<ModuleDescriptor>,

    #[serde(default)]
    pub services: Vec<ModuleDescriptor>,

    #[serde(default)]
    pub middlewares: Vec<ModuleDescriptor>,

    #[serde(default)]
    pub presets: Vec<ModuleDescriptor>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest from JSON text. `source_name` only labels errors.
    pub fn from_json(source_name: &str, json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    /// Append a requirement of the given kind. Apps cannot be required.
    pub fn require(mut self, kind: ModuleKind, descriptor: ModuleDescriptor) -> Self {
        if let Some(list) = self.list_mut(kind) {
            list.push(descriptor);
        }
        self
    }

    /// Requirements of one kind, in declaration order.
    pub fn descriptors(&self, kind: ModuleKind) -> &[ModuleDescriptor] {
        match kind {
            ModuleKind::Provider => &self.providers,
            ModuleKind::Utility => &self.utilities,
            ModuleKind::Service => &self.services,
            ModuleKind::Middleware => &self.middlewares,
            ModuleKind::Preset => &self.presets,
            ModuleKind::App => &[],
        }
    }

    /// Every requirement: kinds in [`ModuleKind::ALL`] order, then declaration order.
    pub fn requirements(&self) -> impl Iterator<Item = (ModuleKind, &ModuleDescriptor)> {
        ModuleKind::ALL
            .into_iter()
            .flat_map(move |kind| self.descriptors(kind).iter().map(move |d| (kind, d)))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements().next().is_none()
    }

    /// Check declaration-level invariants.
    ///
    /// Names must be non-empty and unique per kind (a name may repeat only
    /// with distinct discriminators), versions must parse, and at most one
    /// instance per capability may claim to be the default.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for kind in ModuleKind::ALL {
            let mut seen = HashSet::new();
            let mut defaults = HashSet::new();

            for descriptor in self.descriptors(kind) {
                if descriptor.name.trim().is_empty() {
                    return Err(ManifestError::EmptyName { kind });
                }
                if !seen.insert((descriptor.name.as_str(), descriptor.discriminator.as_deref())) {
                    return Err(ManifestError::DuplicateName {
                        kind,
                        name: descriptor.label(),
                    });
                }
                if descriptor.default && !defaults.insert(descriptor.name.as_str()) {
                    return Err(ManifestError::MultipleDefaults {
                        kind,
                        name: descriptor.name.clone(),
                    });
                }
                descriptor.version_req()?;
            }
        }
        Ok(())
    }

    fn list_mut(&mut self, kind: ModuleKind) -> Option<&mut Vec<ModuleDescriptor>> {
        match kind {
            ModuleKind::Provider => Some(&mut self.providers),
            ModuleKind::Utility => Some(&mut self.utilities),
            ModuleKind::Service => Some(&mut self.services),
            ModuleKind::Middleware => Some(&mut self.middlewares),
            ModuleKind::Preset => Some(&mut self.presets),
            ModuleKind::App => None,
        }
    }
}

fn default_package_type() -> String {
    "module".to_string()
}

/// Descriptor of one independently versionable unit (`package.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Scoped package name, e.g. `@adc/file-storage`.
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default = "default_package_type")]
    pub package_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package_type: default_package_type(),
            version: None,
            dependencies: BTreeMap::new(),
        }
    }

    pub fn from_json(source_name: &str, json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// The package name without its `@scope/` prefix.
    pub fn unit_name(&self) -> &str {
        match self.name.strip_prefix('@') {
            Some(scoped) => scoped.split_once('/').map(|(_, unit)| unit).unwrap_or(scoped),
            None => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_json(
            "modules.json",
            r#"{
                "failOnError": true,
                "providers": [
                    { "name": "cache", "type": "redis", "default": true, "config": { "url": "redis://localhost" } },
                    { "name": "cache", "type": "memory" }
                ],
                "presets": [ { "name": "auth", "version": "^1.2" } ]
            }"#,
        )
        .unwrap();

        assert!(manifest.fail_on_error);
        assert_eq!(manifest.providers.len(), 2);
        assert_eq!(manifest.providers[0].label(), "cache#redis");
        assert!(manifest.providers[0].default);
        assert_eq!(
            manifest.providers[0].config,
            Some(json!({ "url": "redis://localhost" }))
        );
        assert_eq!(manifest.presets[0].version.as_deref(), Some("^1.2"));
        manifest.validate().unwrap();
    }

    #[test]
    fn test_requirements_follow_kind_then_declaration_order() {
        let manifest = Manifest::new()
            .require(ModuleKind::Preset, ModuleDescriptor::new("auth"))
            .require(ModuleKind::Provider, ModuleDescriptor::new("storage"))
            .require(ModuleKind::Provider, ModuleDescriptor::new("queue"))
            .require(ModuleKind::App, ModuleDescriptor::new("ignored"));

        let order: Vec<_> = manifest
            .requirements()
            .map(|(kind, d)| format!("{}:{}", kind, d.name))
            .collect();
        assert_eq!(order, vec!["provider:storage", "provider:queue", "preset:auth"]);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let manifest = Manifest::new()
            .require(ModuleKind::Provider, ModuleDescriptor::new("storage"))
            .require(ModuleKind::Provider, ModuleDescriptor::new("storage"));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::DuplicateName { .. })
        ));

        // The same name under two kinds is fine.
        let manifest = Manifest::new()
            .require(ModuleKind::Provider, ModuleDescriptor::new("storage"))
            .require(ModuleKind::Service, ModuleDescriptor::new("storage"));
        manifest.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_two_defaults() {
        let manifest = Manifest::new()
            .require(
                ModuleKind::Provider,
                ModuleDescriptor::new("cache").with_discriminator("a").as_default(),
            )
            .require(
                ModuleKind::Provider,
                ModuleDescriptor::new("cache").with_discriminator("b").as_default(),
            );
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::MultipleDefaults { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_version_and_empty_name() {
        let manifest = Manifest::new().require(
            ModuleKind::Provider,
            ModuleDescriptor::new("storage").with_version("one.two"),
        );
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::InvalidVersion { .. })
        ));

        let manifest = Manifest::new().require(ModuleKind::Utility, ModuleDescriptor::new("  "));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::EmptyName { .. })
        ));
    }

    #[test]
    fn test_parse_error_names_source() {
        let err = Manifest::from_json("apps/web/modules.json", "{ nope").unwrap_err();
        assert!(err.to_string().contains("apps/web/modules.json"));
    }

    #[test]
    fn test_package_descriptor() {
        let package = PackageDescriptor::from_json(
            "package.json",
            r#"{ "name": "@adc/file-storage", "type": "module", "dependencies": {} }"#,
        )
        .unwrap();
        assert_eq!(package.unit_name(), "file-storage");
        assert_eq!(package.package_type, "module");

        assert_eq!(PackageDescriptor::new("plain").unit_name(), "plain");
    }
}
