//! Engine services
//!
//! Long-lived components shared by all runners. A `ServiceContext` is
//! built once per engine and handed out explicitly; the `ServiceManager`
//! starts the services in registration order and stops them in reverse.

mod agency;
mod project;

pub use agency::{AgentInfo, AgentStatus, TestAgency};
pub use project::{ProjectService, PROJECT_EXTENSION};

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runners::TestRunnerFactory;

/// Lifecycle state of a service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Started,
    Error,
}

/// A component with a start/stop lifecycle
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    fn status(&self) -> ServiceStatus;

    fn start_service(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    fn stop_service(&self) -> BoxFuture<'_, ()>;
}

/// Starts and stops a fixed list of services
#[derive(Default)]
pub struct ServiceManager {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.services
    }

    /// Start every service in order. If one fails, the ones already
    /// started are stopped again.
    pub async fn start_services(&self) -> Result<(), EngineError> {
        for (index, service) in self.services.iter().enumerate() {
            debug!("Starting {}", service.name());
            if let Err(e) = service.start_service().await {
                error!("Failed to start {}: {}", service.name(), e);
                for started in self.services[..index].iter().rev() {
                    started.stop_service().await;
                }
                return Err(e);
            }
        }
        info!("Started {} services", self.services.len());
        Ok(())
    }

    /// Stop every service, last started first
    pub async fn stop_services(&self) {
        for service in self.services.iter().rev() {
            debug!("Stopping {}", service.name());
            service.stop_service().await;
        }
    }
}

/// Services of one engine instance
#[derive(Clone)]
pub struct ServiceContext {
    config: Arc<EngineConfig>,
    projects: Arc<ProjectService>,
    agency: Option<Arc<TestAgency>>,
    factory: Arc<TestRunnerFactory>,
    manager: Arc<ServiceManager>,
}

impl ServiceContext {
    /// Full context: project service, agency and a factory that can hand
    /// packages to agents
    pub fn new(config: EngineConfig) -> Self {
        let projects = Arc::new(ProjectService::new());
        let agency = Arc::new(TestAgency::new(
            config.agent_path.clone(),
            config.agency_port,
        ));
        let factory = Arc::new(TestRunnerFactory::new(
            Some(agency.clone()),
            projects.clone(),
            config.agent_timeout(),
        ));

        let mut manager = ServiceManager::new();
        manager.add_service(projects.clone());
        manager.add_service(agency.clone());
        manager.add_service(factory.clone());

        Self {
            config: Arc::new(config),
            projects,
            agency: Some(agency),
            factory,
            manager: Arc::new(manager),
        }
    }

    /// Context without an agency, as used inside an agent process
    pub fn in_process(config: EngineConfig) -> Self {
        let projects = Arc::new(ProjectService::new());
        let factory = Arc::new(TestRunnerFactory::in_process(projects.clone()));

        let mut manager = ServiceManager::new();
        manager.add_service(projects.clone());
        manager.add_service(factory.clone());

        Self {
            config: Arc::new(config),
            projects,
            agency: None,
            factory,
            manager: Arc::new(manager),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn projects(&self) -> &Arc<ProjectService> {
        &self.projects
    }

    pub fn agency(&self) -> Option<&Arc<TestAgency>> {
        self.agency.as_ref()
    }

    pub fn factory(&self) -> &Arc<TestRunnerFactory> {
        &self.factory
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.manager.start_services().await
    }

    pub async fn stop(&self) {
        self.manager.stop_services().await
    }
}
