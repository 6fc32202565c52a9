//! Test project files
//!
//! A project (`.testproj`, YAML) names a set of test files and the
//! settings to run them with, optionally in several named configurations:
//!
//! ```yaml
//! active_config: Debug
//! files: [unit.yaml]
//! settings: {DefaultTimeout: 5000}
//! configs:
//!   Debug:
//!     files: [unit.yaml, slow.yaml]
//!     settings: {ProcessModel: Separate}
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Service, ServiceStatus};
use crate::error::EngineError;
use crate::package::{keys, Settings, TestPackage};

/// Extension of project files
pub const PROJECT_EXTENSION: &str = "testproj";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectFile {
    active_config: Option<String>,
    files: Vec<PathBuf>,
    settings: Settings,
    configs: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectConfig {
    files: Vec<PathBuf>,
    settings: Settings,
}

/// Recognizes and expands project packages
#[derive(Debug, Default)]
pub struct ProjectService;

impl ProjectService {
    pub fn new() -> Self {
        Self
    }

    pub fn is_project_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.eq_ignore_ascii_case(PROJECT_EXTENSION))
            .unwrap_or(false)
    }

    pub fn is_project_package(&self, package: &TestPackage) -> bool {
        package
            .full_name()
            .map(|path| self.is_project_file(path))
            .unwrap_or(false)
    }

    /// Expand a project package into one sub-package per listed file.
    ///
    /// The configuration is picked by the package's `ActiveConfig`
    /// setting, then the project's own `active_config`, then the first one
    /// defined. Settings already on the package are never overridden.
    pub fn expand_project_package(&self, package: &TestPackage) -> Result<TestPackage, EngineError> {
        let path = package.full_name().ok_or_else(|| EngineError::Load {
            path: package.display_name().into(),
            reason: "anonymous package is not a project".to_string(),
        })?;
        let project = read_project(path)?;

        let requested = package.settings().get_string(keys::ACTIVE_CONFIG, "");
        let (files, config_settings) = if project.configs.is_empty() {
            (project.files, Settings::new())
        } else {
            let name = if requested.is_empty() {
                project
                    .active_config
                    .clone()
                    .or_else(|| project.configs.keys().next().cloned())
                    .unwrap_or_default()
            } else {
                requested
            };
            let config = project.configs.get(&name).ok_or_else(|| EngineError::Load {
                path: path.to_path_buf(),
                reason: format!("project has no configuration '{name}'"),
            })?;
            debug!("Using configuration {} of {}", name, path.display());
            let files = if config.files.is_empty() {
                project.files.clone()
            } else {
                config.files.clone()
            };
            (files, config.settings.clone())
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let files = files
            .into_iter()
            .map(|file| if file.is_absolute() { file } else { base.join(file) })
            .collect();

        let mut settings = package.settings().clone();
        for (key, value) in config_settings.iter().chain(project.settings.iter()) {
            settings.set_default(key.clone(), value.clone());
        }

        Ok(TestPackage::expanded(
            package.id(),
            path.to_path_buf(),
            files,
            settings,
        ))
    }
}

fn read_project(path: &Path) -> Result<ProjectFile, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| EngineError::Load {
        path: path.to_path_buf(),
        reason: format!("invalid project file: {e}"),
    })
}

impl Service for ProjectService {
    fn name(&self) -> &'static str {
        "ProjectService"
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus::Started
    }

    fn start_service(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn stop_service(&self) -> BoxFuture<'_, ()> {
        futures::future::ready(()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
active_config: Release
files: [base.yaml]
settings:
  DefaultTimeout: 1000
configs:
  Debug:
    files: [debug.yaml, extra.yaml]
    settings:
      ProcessModel: Separate
  Release: {}
"#;

    fn project(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("all.testproj");
        fs::write(&path, PROJECT).unwrap();
        path
    }

    #[test]
    fn test_recognizes_project_files() {
        let service = ProjectService::new();
        assert!(service.is_project_file(Path::new("a/b.testproj")));
        assert!(service.is_project_file(Path::new("B.TESTPROJ")));
        assert!(!service.is_project_file(Path::new("b.yaml")));
        assert!(!service.is_project_package(&TestPackage::new(["a.yaml", "b.yaml"])));
    }

    #[test]
    fn test_expand_uses_active_config() {
        let dir = TempDir::new().unwrap();
        let path = project(&dir);
        let expanded = ProjectService::new()
            .expand_project_package(&TestPackage::from_file(&path))
            .unwrap();

        assert_eq!(expanded.sub_packages().len(), 1);
        assert_eq!(expanded.test_files()[0], dir.path().join("base.yaml"));
        assert_eq!(expanded.sub_packages()[0].id(), "1");
        assert_eq!(expanded.settings().get_u64(keys::DEFAULT_TIMEOUT, 0), 1000);
    }

    #[test]
    fn test_requested_config_and_package_settings_win() {
        let dir = TempDir::new().unwrap();
        let path = project(&dir);
        let package = TestPackage::from_file(&path)
            .with_setting(keys::ACTIVE_CONFIG, "Debug")
            .with_setting(keys::PROCESS_MODEL, "Single");
        let expanded = ProjectService::new().expand_project_package(&package).unwrap();

        let names: Vec<_> = expanded.sub_packages().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["debug.yaml", "extra.yaml"]);
        assert_eq!(expanded.settings().get_string(keys::PROCESS_MODEL, ""), "Single");
        assert_eq!(expanded.name(), "all.testproj");
    }

    #[test]
    fn test_unknown_config() {
        let dir = TempDir::new().unwrap();
        let path = project(&dir);
        let package = TestPackage::from_file(&path).with_setting(keys::ACTIVE_CONFIG, "Nope");
        let err = ProjectService::new().expand_project_package(&package).unwrap_err();
        assert!(matches!(err, EngineError::Load { .. }));
    }

    #[test]
    fn test_service_is_always_started() {
        let service = ProjectService::new();
        tokio_test::block_on(service.start_service()).unwrap();
        assert_eq!(service.status(), ServiceStatus::Started);
        tokio_test::block_on(service.stop_service());
    }
}
