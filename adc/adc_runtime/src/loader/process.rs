//! Modules written in other languages, run as child processes.
//!
//! The kernel does not speak any protocol with the child. It passes the
//! module's identity and configuration through the environment, along with an
//! endpoint path the child may listen on, and owns the process lifetime.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use adc_core::error::{LifecycleError, LoaderError};
use adc_core::{
    App, Component, Instance, Lifecycle, LifecycleToken, LogLevel, ModuleHandle, ModuleKind, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{LoadRequest, Loader};
use crate::system::config::{LanguageConfig, RuntimeConfig};

/// What dependents of an external module receive from `get_instance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalEndpoint {
    pub name: String,
    pub version: String,
    pub language: String,

    /// Path the child is expected to listen on
    pub endpoint: PathBuf,

    /// Process id once started
    pub pid: Option<u32>,
}

/// Endpoint path for a module: `<tmp>/adc-platform/<name>-<version>-<language>`.
pub fn endpoint_path(name: &str, version: &str, language: &str) -> PathBuf {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    std::env::temp_dir()
        .join("adc-platform")
        .join(format!("{}-{}-{}", sanitized.trim_matches('_'), version, language))
}

#[derive(Debug, Clone)]
struct ProcessSpec {
    module: String,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: PathBuf,
}

impl ProcessSpec {
    fn spawn(&self) -> Result<Child> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoaderError::LaunchFailed {
                name: self.module.clone(),
                reason: format!("{}: {}", self.program.display(), e),
            })?;
        info!(module = %self.module, pid = ?child.id(), "Spawned module process");
        Ok(child)
    }
}

/// Owns at most one running child.
struct ExternalProcess {
    spec: ProcessSpec,
    endpoint: ExternalEndpoint,
    child: tokio::sync::Mutex<Option<Child>>,
    pid: Mutex<Option<u32>>,
}

impl ExternalProcess {
    fn new(spec: ProcessSpec, endpoint: ExternalEndpoint) -> Self {
        Self {
            spec,
            endpoint,
            child: tokio::sync::Mutex::new(None),
            pid: Mutex::new(None),
        }
    }

    async fn ensure_started(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if child.is_none() {
            let spawned = self.spec.spawn()?;
            *self.pid.lock() = spawned.id();
            *child = Some(spawned);
        }
        Ok(())
    }

    async fn kill(&self) {
        let taken = self.child.lock().await.take();
        *self.pid.lock() = None;
        if let Some(mut child) = taken {
            if let Err(e) = child.kill().await {
                debug!(module = %self.spec.module, error = %e, "Process already gone");
            }
        }
    }

    /// Wait for the child to exit or the token to be cancelled.
    async fn wait(&self, token: &LifecycleToken) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };

        tokio::select! {
            status = child.wait() => {
                guard.take();
                *self.pid.lock() = None;
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(LifecycleError::Failed {
                        module: self.spec.module.clone(),
                        phase: "run",
                        reason: format!("process exited with {}", status),
                    }
                    .into())
                }
            }
            _ = token.cancelled() => {
                drop(guard);
                self.kill().await;
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> ExternalEndpoint {
        ExternalEndpoint {
            pid: *self.pid.lock(),
            ..self.endpoint.clone()
        }
    }
}

struct ExternalComponent(ExternalProcess);

#[async_trait]
impl Lifecycle for ExternalComponent {
    async fn start(&self, _token: &LifecycleToken) -> Result<()> {
        self.0.ensure_started().await
    }

    async fn stop(&self, _token: &LifecycleToken) -> Result<()> {
        self.0.kill().await;
        Ok(())
    }
}

impl Component for ExternalComponent {
    fn get_instance(&self) -> Instance {
        Arc::new(self.0.snapshot())
    }
}

struct ExternalApp(ExternalProcess);

#[async_trait]
impl Lifecycle for ExternalApp {
    async fn stop(&self, _token: &LifecycleToken) -> Result<()> {
        self.0.kill().await;
        Ok(())
    }
}

#[async_trait]
impl App for ExternalApp {
    async fn run(&self, token: &LifecycleToken) -> Result<()> {
        self.0.ensure_started().await?;
        self.0.wait(token).await
    }
}

/// Loader for one external language.
pub struct ProcessLoader {
    language: String,
    entry: LanguageConfig,
    dev_mode: bool,
    log_level: LogLevel,
}

impl ProcessLoader {
    pub fn new(language: impl Into<String>, entry: LanguageConfig, dev_mode: bool, log_level: LogLevel) -> Self {
        Self {
            language: language.into(),
            entry,
            dev_mode,
            log_level,
        }
    }

    /// One loader per configured language.
    pub fn from_config(config: &RuntimeConfig) -> Vec<Self> {
        config
            .languages
            .iter()
            .map(|(language, entry)| Self::new(language.clone(), entry.clone(), config.dev_mode, config.log_level))
            .collect()
    }

    fn entry_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.entry.entry(self.dev_mode).0)
    }

    fn spec(&self, request: &LoadRequest, entry: PathBuf, endpoint: &Path) -> ProcessSpec {
        let (_, command) = self.entry.entry(self.dev_mode);
        let (program, mut args) = match command.split_first() {
            Some((program, rest)) => (PathBuf::from(program), rest.to_vec()),
            None => (entry.clone(), Vec::new()),
        };
        if !command.is_empty() {
            args.push(entry.to_string_lossy().into_owned());
        }

        let env = vec![
            ("ADC_MODULE_NAME".to_string(), request.name.clone()),
            ("ADC_MODULE_VERSION".to_string(), request.version.to_string()),
            ("ADC_MODULE_TYPE".to_string(), request.kind.to_string()),
            ("ADC_MODULE_CONFIG".to_string(), request.config.to_string()),
            ("ADC_LOG_LEVEL".to_string(), self.log_level.as_str().to_ascii_uppercase()),
            ("ADC_MODULE_ENDPOINT".to_string(), endpoint.to_string_lossy().into_owned()),
        ];

        ProcessSpec {
            module: request.context.name().to_string(),
            program,
            args,
            env,
            cwd: request.path.clone(),
        }
    }
}

#[async_trait]
impl Loader for ProcessLoader {
    fn language(&self) -> &str {
        &self.language
    }

    fn can_handle(&self, path: &Path) -> bool {
        self.entry_path(path).is_file()
    }

    async fn load(&self, request: &LoadRequest) -> Result<ModuleHandle> {
        let entry = self.entry_path(&request.path);
        if !entry.is_file() {
            return Err(LoaderError::ModuleNotFound {
                name: request.name.clone(),
                path: entry,
            }
            .into());
        }

        let version = request.version.to_string();
        let endpoint_file = endpoint_path(&request.name, &version, &self.language);
        if let Some(parent) = endpoint_file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(module = %request.name, error = %e, "Could not create endpoint directory");
            }
        }

        let spec = self.spec(request, entry, &endpoint_file);
        debug!(module = %request.name, import = %request.import_key(), program = %spec.program.display(), "Prepared external module");

        let process = ExternalProcess::new(
            spec,
            ExternalEndpoint {
                name: request.name.clone(),
                version,
                language: self.language.clone(),
                endpoint: endpoint_file,
                pid: None,
            },
        );

        Ok(match request.kind {
            ModuleKind::App => ModuleHandle::app(ExternalApp(process)),
            _ => ModuleHandle::component(ExternalComponent(process)),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::ModuleContext;
    use crate::registry::ModuleRegistry;
    use adc_core::{ErrorKind, Manifest, ModuleDescriptor, PackageDescriptor, SymbolTable, TokenSource, Version};
    use serde_json::json;
    use std::time::Duration;

    fn shell_loader() -> ProcessLoader {
        ProcessLoader::new(
            "sh",
            LanguageConfig::new("index.sh", "index.sh").with_commands(&["sh"], &["sh"]),
            false,
            LogLevel::Debug,
        )
    }

    fn request(kind: ModuleKind, dir: &Path) -> LoadRequest {
        let registry = Arc::new(ModuleRegistry::new(Arc::new(SymbolTable::new())));
        LoadRequest {
            kind,
            name: "@adc/file-storage".to_string(),
            path: dir.to_path_buf(),
            version: Version::new(1, 0, 0),
            language: "sh".to_string(),
            package: PackageDescriptor::new("@adc/file-storage"),
            descriptor: ModuleDescriptor::new("file-storage"),
            config: json!({ "root": "/data" }),
            context: Arc::new(ModuleContext::new(
                "provider:file-storage",
                kind,
                registry,
                &Manifest::new(),
                LogLevel::Info,
            )),
            load_seq: 7,
        }
    }

    #[test]
    fn test_endpoint_path_is_sanitized() {
        let path = endpoint_path("@adc/file-storage", "1.0.0", "cpp");
        assert!(path.ends_with("adc-platform/adc_file-storage-1.0.0-cpp"));
    }

    #[tokio::test]
    async fn test_missing_entry_is_module_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = shell_loader();
        assert!(!loader.can_handle(dir.path()));

        let err = loader
            .load(&request(ModuleKind::Provider, dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModuleNotFound);
    }

    #[tokio::test]
    async fn test_component_process_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.sh"),
            "echo \"$ADC_MODULE_NAME $ADC_MODULE_TYPE $ADC_MODULE_CONFIG\" > env.txt\nsleep 30\n",
        )
        .unwrap();

        let loader = shell_loader();
        assert!(loader.can_handle(dir.path()));
        let handle = loader
            .load(&request(ModuleKind::Provider, dir.path()))
            .await
            .unwrap();
        let token = LifecycleToken::detached();

        handle.start(&token).await.unwrap();
        let endpoint = handle.instance().unwrap();
        let endpoint = endpoint.downcast_ref::<ExternalEndpoint>().unwrap();
        assert!(endpoint.pid.is_some());
        assert_eq!(endpoint.language, "sh");

        let env_file = dir.path().join("env.txt");
        let mut written = String::new();
        for _ in 0..100 {
            written = std::fs::read_to_string(&env_file).unwrap_or_default();
            if !written.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(written.trim(), r#"@adc/file-storage provider {"root":"/data"}"#);

        handle.stop(&token).await.unwrap();
        let endpoint = handle.instance().unwrap();
        assert!(endpoint.downcast_ref::<ExternalEndpoint>().unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn test_app_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let loader = shell_loader();
        let token = LifecycleToken::detached();

        std::fs::write(dir.path().join("index.sh"), "exit 0\n").unwrap();
        let handle = loader.load(&request(ModuleKind::App, dir.path())).await.unwrap();
        handle.as_app().unwrap().run(&token).await.unwrap();

        std::fs::write(dir.path().join("index.sh"), "exit 3\n").unwrap();
        let handle = loader.load(&request(ModuleKind::App, dir.path())).await.unwrap();
        let err = handle.as_app().unwrap().run(&token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModuleFailed);
    }

    #[tokio::test]
    async fn test_app_cancelled_by_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.sh"), "sleep 30\n").unwrap();
        let loader = shell_loader();
        let handle = loader.load(&request(ModuleKind::App, dir.path())).await.unwrap();
        let app = handle.as_app().unwrap();

        let source = TokenSource::new();
        let token = source.token();
        let run = tokio::spawn(async move { app.run(&token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}
