//! Test packages
//!
//! A package names one or more test-bearing files together with the
//! settings that control how they are loaded and executed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Well-known setting keys consumed by the engine
pub mod keys {
    pub const DOMAIN_USAGE: &str = "DomainUsage";
    pub const PROCESS_MODEL: &str = "ProcessModel";
    pub const RUNTIME_FRAMEWORK: &str = "RuntimeFramework";
    pub const CONFIGURATION_FILE: &str = "ConfigurationFile";
    pub const BASE_PATH: &str = "BasePath";
    pub const PRIVATE_BIN_PATH: &str = "PrivateBinPath";
    pub const AUTO_BIN_PATH: &str = "AutoBinPath";
    pub const ACTIVE_CONFIG: &str = "ActiveConfig";
    pub const AGENT_DEBUG: &str = "AgentDebug";
    pub const VERBOSE: &str = "Verbose";
    pub const DEFAULT_TIMEOUT: &str = "DefaultTimeout";
}

/// Where a package's tests execute relative to the controlling process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessModel {
    #[default]
    Default,
    Single,
    Separate,
    Multiple,
}

impl ProcessModel {
    /// Parse a setting value; unrecognized values fall back to `Default`
    pub fn from_setting(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "single" | "inprocess" => ProcessModel::Single,
            "separate" => ProcessModel::Separate,
            "multiple" => ProcessModel::Multiple,
            _ => ProcessModel::Default,
        }
    }

    pub fn requires_agent(self) -> bool {
        matches!(self, ProcessModel::Separate | ProcessModel::Multiple)
    }
}

/// How a package is isolated inside the process that runs it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DomainUsage {
    #[default]
    Default,
    None,
    Single,
    Multiple,
}

impl DomainUsage {
    /// Parse a setting value; unrecognized values fall back to `Default`
    pub fn from_setting(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => DomainUsage::None,
            "single" => DomainUsage::Single,
            "multiple" => DomainUsage::Multiple,
            _ => DomainUsage::Default,
        }
    }
}

/// Key/value settings carried by a package
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String setting, rendering scalars as text
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Copy every pair of `other` over this bag; `other` wins on conflicts
    pub fn overlay(&mut self, other: &Settings) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Insert `value` only when the key is not already present
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One or more test files plus settings.
///
/// A package built from a single file has that file's identity. A package
/// built from several files is anonymous and carries one single-file
/// sub-package per input, in input order. Settings placed on an anonymous
/// parent are not copied to its children here; the aggregating runner
/// distributes them when it loads the sub-packages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestPackage {
    id: String,
    name: String,
    full_name: Option<PathBuf>,
    test_files: Vec<PathBuf>,
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    sub_packages: Vec<TestPackage>,
}

impl TestPackage {
    /// Create a package from a list of file paths
    pub fn new<P: AsRef<Path>>(files: impl IntoIterator<Item = P>) -> Self {
        let files: Vec<PathBuf> = files
            .into_iter()
            .map(|f| absolute_path(f.as_ref()))
            .collect();

        if files.len() == 1 {
            return Self::single("0", files[0].clone());
        }

        let sub_packages = files
            .iter()
            .enumerate()
            .map(|(i, file)| Self::single(child_id("0", i), file.clone()))
            .collect();

        Self {
            id: "0".to_string(),
            name: String::new(),
            full_name: None,
            test_files: files,
            settings: Settings::new(),
            sub_packages,
        }
    }

    /// Create a package for exactly one file
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::single("0", absolute_path(path.as_ref()))
    }

    fn single(id: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: id.into(),
            name: file_name(&path),
            test_files: vec![path.clone()],
            full_name: Some(path),
            settings: Settings::new(),
            sub_packages: Vec::new(),
        }
    }

    /// Build the expanded form of a project package: the project keeps its
    /// identity and gains one sub-package per listed file.
    pub(crate) fn expanded(
        id: impl Into<String>,
        project_path: PathBuf,
        files: Vec<PathBuf>,
        settings: Settings,
    ) -> Self {
        let id = id.into();
        let sub_packages = files
            .iter()
            .enumerate()
            .map(|(i, file)| Self::single(child_id(&id, i), file.clone()))
            .collect();

        Self {
            name: file_name(&project_path),
            full_name: Some(project_path),
            id,
            test_files: files,
            settings,
            sub_packages,
        }
    }

    /// Positional identifier, used as the prefix of every test id in the package
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File name of the package, empty when anonymous
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the package file, `None` when anonymous
    pub fn full_name(&self) -> Option<&Path> {
        self.full_name.as_deref()
    }

    pub fn test_files(&self) -> &[PathBuf] {
        &self.test_files
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn sub_packages(&self) -> &[TestPackage] {
        &self.sub_packages
    }

    pub fn has_sub_packages(&self) -> bool {
        !self.sub_packages.is_empty()
    }

    pub fn is_anonymous(&self) -> bool {
        self.full_name.is_none()
    }

    /// Builder-style setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.set(key, value);
        self
    }

    pub fn process_model(&self) -> ProcessModel {
        ProcessModel::from_setting(&self.settings.get_string(keys::PROCESS_MODEL, ""))
    }

    pub fn domain_usage(&self) -> DomainUsage {
        DomainUsage::from_setting(&self.settings.get_string(keys::DOMAIN_USAGE, ""))
    }

    /// Name to show in results and logs
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("<anonymous package {}>", self.id)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for TestPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn child_id(parent: &str, index: usize) -> String {
    if parent == "0" {
        (index + 1).to_string()
    } else {
        format!("{}-{}", parent, index + 1)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    #[test]
    fn test_single_file_package() {
        let package = TestPackage::new(["test.dll"]);

        assert_eq!(package.name(), "test.dll");
        assert_eq!(package.full_name(), Some(cwd().join("test.dll").as_path()));
        assert_eq!(package.test_files(), &[cwd().join("test.dll")]);
        assert!(!package.has_sub_packages());
        assert!(!package.is_anonymous());
    }

    #[test]
    fn test_multiple_file_package() {
        let package = TestPackage::new(["test1.dll", "test2.dll", "test3.dll"]);

        assert!(package.is_anonymous());
        assert_eq!(package.name(), "");
        assert_eq!(package.sub_packages().len(), 3);

        let paths: Vec<_> = package
            .sub_packages()
            .iter()
            .map(|p| p.full_name().unwrap().to_path_buf())
            .collect();
        assert_eq!(
            paths,
            vec![
                cwd().join("test1.dll"),
                cwd().join("test2.dll"),
                cwd().join("test3.dll")
            ]
        );

        for sub in package.sub_packages() {
            assert!(!sub.has_sub_packages());
        }
    }

    #[test]
    fn test_sub_package_ids_are_positional() {
        let package = TestPackage::new(["a.yaml", "b.yaml"]);
        let ids: Vec<_> = package.sub_packages().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let project = TestPackage::expanded(
            "2",
            cwd().join("x.testproj"),
            vec![cwd().join("c.yaml")],
            Settings::new(),
        );
        assert_eq!(project.sub_packages()[0].id(), "2-1");
    }

    #[test]
    fn test_parent_settings_not_propagated() {
        let package = TestPackage::new(["a.yaml", "b.yaml"]).with_setting(keys::DOMAIN_USAGE, "None");

        assert_eq!(package.settings().get_string(keys::DOMAIN_USAGE, ""), "None");
        for sub in package.sub_packages() {
            assert!(sub.settings().is_empty());
        }
    }

    #[test]
    fn test_settings_accessors() {
        let mut settings = Settings::new();
        settings.set("Flag", true);
        settings.set("Count", 42);
        settings.set("Text", "hello");

        assert!(settings.get_bool("Flag", false));
        assert_eq!(settings.get_u64("Count", 0), 42);
        assert_eq!(settings.get_string("Text", ""), "hello");
        assert_eq!(settings.get_string("Missing", "fallback"), "fallback");

        let mut other = Settings::new();
        other.set("Text", "override");
        settings.overlay(&other);
        assert_eq!(settings.get_string("Text", ""), "override");

        settings.set_default("Text", "ignored");
        assert_eq!(settings.get_string("Text", ""), "override");
    }

    #[test]
    fn test_process_model_parsing() {
        assert_eq!(ProcessModel::from_setting("Separate"), ProcessModel::Separate);
        assert_eq!(ProcessModel::from_setting("bogus"), ProcessModel::Default);
        assert_eq!(DomainUsage::from_setting("NONE"), DomainUsage::None);
        assert_eq!(DomainUsage::from_setting(""), DomainUsage::Default);
    }
}
