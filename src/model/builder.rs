//! Test manifest reader
//!
//! Builds the test tree for a single-file package from a YAML or JSON
//! manifest. Ids are positional: `{package_id}-{1000 + n}` with `n` the
//! pre-order index of the node inside the file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{NodeKind, RunState, TestAction, TestNode};
use crate::error::EngineError;
use crate::package::TestPackage;
use crate::results::TestStatus;

#[derive(Debug, Deserialize)]
struct SuiteManifest {
    name: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    run_state: RunState,
    reason: Option<String>,
    #[serde(default)]
    tests: Vec<CaseManifest>,
    #[serde(default)]
    suites: Vec<SuiteManifest>,
}

#[derive(Debug, Deserialize)]
struct CaseManifest {
    name: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    run_state: RunState,
    reason: Option<String>,
    command: Option<String>,
    timeout_ms: Option<u64>,
    result: Option<TestStatus>,
    message: Option<String>,
}

/// Reads test manifests into `TestNode` trees
pub struct TestBuilder;

impl TestBuilder {
    /// Build the tree for a single-file package
    pub fn build(package: &TestPackage) -> Result<TestNode, EngineError> {
        let path = package
            .full_name()
            .or_else(|| package.test_files().first().map(|p| p.as_path()))
            .ok_or_else(|| EngineError::Load {
                path: package.display_name().into(),
                reason: "package names no test file".to_string(),
            })?;

        let manifest = read_manifest(path)?;
        let default_name = package.name().to_string();

        let mut ids = IdSequence::new(package.id());
        let root = build_suite(
            manifest,
            &default_name,
            &Scope::default(),
            NodeKind::Assembly,
            &mut ids,
        )?;
        debug!(
            "Built {} test cases from {}",
            root.test_case_count(),
            path.display()
        );
        Ok(root)
    }
}

fn read_manifest(path: &Path) -> Result<SuiteManifest, EngineError> {
    let load_error = |reason: String| EngineError::Load {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(load_error("file not found".to_string()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;

    let manifest: SuiteManifest = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .map_err(|e| load_error(format!("invalid test manifest: {e}")))?,
        "json" => serde_json::from_str(&content)
            .map_err(|e| load_error(format!("invalid test manifest: {e}")))?,
        other => return Err(load_error(format!("unsupported file type '{other}'"))),
    };
    check_categories(&manifest).map_err(load_error)?;
    Ok(manifest)
}

/// Filters carry category lists comma-separated, so a category name
/// cannot contain a comma
fn check_categories(suite: &SuiteManifest) -> Result<(), String> {
    let cases = suite.tests.iter().map(|case| &case.categories);
    for category in std::iter::once(&suite.categories).chain(cases).flatten() {
        if category.contains(',') {
            return Err(format!("category '{category}' contains a comma"));
        }
    }
    suite.suites.iter().try_for_each(check_categories)
}

struct IdSequence<'a> {
    package_id: &'a str,
    next: usize,
}

impl<'a> IdSequence<'a> {
    fn new(package_id: &'a str) -> Self {
        Self { package_id, next: 0 }
    }

    fn next(&mut self) -> String {
        let id = format!("{}-{}", self.package_id, 1000 + self.next);
        self.next += 1;
        id
    }
}

fn qualify(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}.{name}"),
        _ => name.to_string(),
    }
}

/// Names, categories and ids an enclosing suite hands down to its children
#[derive(Default)]
struct Scope {
    full_name: Option<String>,
    categories: Vec<String>,
    ancestor_ids: Vec<String>,
}

fn build_suite(
    manifest: SuiteManifest,
    default_name: &str,
    scope: &Scope,
    kind: NodeKind,
    ids: &mut IdSequence<'_>,
) -> Result<TestNode, EngineError> {
    let name = manifest
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name.to_string());
    let full_name = qualify(scope.full_name.as_deref(), &name);
    let id = ids.next();

    let mut below = Scope {
        full_name: Some(full_name.clone()),
        categories: scope.categories.clone(),
        ancestor_ids: scope.ancestor_ids.clone(),
    };
    below.categories.extend(manifest.categories.iter().cloned());
    below.ancestor_ids.push(id.clone());

    let mut children = Vec::with_capacity(manifest.tests.len() + manifest.suites.len());
    for case in manifest.tests {
        children.push(build_case(case, &below, ids));
    }
    for (index, suite) in manifest.suites.into_iter().enumerate() {
        let fallback = format!("Suite{}", index + 1);
        children.push(build_suite(suite, &fallback, &below, NodeKind::Suite, ids)?);
    }

    Ok(TestNode {
        id,
        name,
        full_name,
        kind,
        run_state: manifest.run_state,
        reason: manifest.reason,
        categories: manifest.categories,
        inherited_categories: scope.categories.clone(),
        ancestor_ids: scope.ancestor_ids.clone(),
        properties: manifest.properties,
        action: TestAction::None,
        children,
    })
}

fn build_case(manifest: CaseManifest, scope: &Scope, ids: &mut IdSequence<'_>) -> TestNode {
    let action = match (manifest.command, manifest.result) {
        (Some(command), _) => TestAction::Command {
            command,
            timeout: manifest.timeout_ms.map(Duration::from_millis),
        },
        (None, Some(result)) => TestAction::Outcome {
            result,
            message: manifest.message,
        },
        (None, None) => TestAction::None,
    };

    TestNode {
        id: ids.next(),
        full_name: qualify(scope.full_name.as_deref(), &manifest.name),
        name: manifest.name,
        kind: NodeKind::Case,
        run_state: manifest.run_state,
        reason: manifest.reason,
        categories: manifest.categories,
        inherited_categories: scope.categories.clone(),
        ancestor_ids: scope.ancestor_ids.clone(),
        properties: manifest.properties,
        action,
        children: Vec::new(),
    }
}
