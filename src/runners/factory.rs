//! Runner selection
//!
//! Decides which runner variant handles a package, from its shape and
//! its `ProcessModel` / `DomainUsage` settings.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::aggregating::AggregatingRunner;
use super::local::LocalRunner;
use super::remote::{AgentSource, RemoteRunner};
use super::TestRunner;
use crate::error::EngineError;
use crate::package::{DomainUsage, TestPackage};
use crate::services::{ProjectService, Service, ServiceStatus, TestAgency};

/// Runner variant chosen for a package
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerKind {
    Local,
    Domain,
    Process,
    Aggregating,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerKind::Local => "Local",
            RunnerKind::Domain => "Domain",
            RunnerKind::Process => "Process",
            RunnerKind::Aggregating => "Aggregating",
        };
        f.write_str(name)
    }
}

/// Creates runners for packages
pub struct TestRunnerFactory {
    agency: Option<Arc<TestAgency>>,
    projects: Arc<ProjectService>,
    agent_timeout: Duration,
    /// Set inside agents and isolated domains: single-file packages
    /// always run locally there
    in_process: bool,
}

impl TestRunnerFactory {
    pub fn new(
        agency: Option<Arc<TestAgency>>,
        projects: Arc<ProjectService>,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            agency,
            projects,
            agent_timeout,
            in_process: false,
        }
    }

    /// Factory used on the far side of an agent connection
    pub fn in_process(projects: Arc<ProjectService>) -> Self {
        Self {
            agency: None,
            projects,
            agent_timeout: Duration::ZERO,
            in_process: true,
        }
    }

    pub fn projects(&self) -> &ProjectService {
        &self.projects
    }

    /// Variant for `package`:
    ///
    /// 1. several files or a project file: `Aggregating`
    /// 2. inside an agent or domain: `Local`
    /// 3. `ProcessModel` Separate or Multiple: `Process`
    /// 4. `DomainUsage` None: `Local`
    /// 5. otherwise: `Domain`
    pub fn runner_kind(&self, package: &TestPackage) -> RunnerKind {
        if package.has_sub_packages() || self.projects.is_project_package(package) {
            return RunnerKind::Aggregating;
        }
        if self.in_process {
            return RunnerKind::Local;
        }
        if package.process_model().requires_agent() {
            return RunnerKind::Process;
        }
        match package.domain_usage() {
            DomainUsage::None => RunnerKind::Local,
            _ => RunnerKind::Domain,
        }
    }

    pub fn make_test_runner(self: &Arc<Self>, package: TestPackage) -> TestRunner {
        let kind = self.runner_kind(&package);
        debug!("Creating {} runner for {}", kind, package);

        match kind {
            RunnerKind::Local => TestRunner::Local(LocalRunner::new(package)),
            RunnerKind::Domain => {
                let domain = Arc::new(Self::in_process(self.projects.clone()));
                TestRunner::Domain(RemoteRunner::new(package, AgentSource::Domain(domain)))
            }
            RunnerKind::Process => {
                let source = AgentSource::Agency {
                    agency: self.agency.clone(),
                    timeout: self.agent_timeout,
                };
                TestRunner::Process(RemoteRunner::new(package, source))
            }
            RunnerKind::Aggregating => {
                TestRunner::Aggregating(AggregatingRunner::new(package, self.clone()))
            }
        }
    }
}

impl Service for TestRunnerFactory {
    fn name(&self) -> &'static str {
        "TestRunnerFactory"
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus::Started
    }

    fn start_service(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        async move {
            if self.agency.is_none() && !self.in_process {
                debug!("No agency available, process runners will fail to load");
            }
            Ok(())
        }
        .boxed()
    }

    fn stop_service(&self) -> BoxFuture<'_, ()> {
        futures::future::ready(()).boxed()
    }
}
