//! Runners that delegate to another execution context
//!
//! A `RemoteRunner` drives a runner living on the far side of an agent
//! connection: either an isolated domain (a dedicated thread with its own
//! runtime) or an agent process obtained from the agency. Channel and
//! agent failures are turned into error results for this package.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::factory::TestRunnerFactory;
use super::state::RunnerState;
use crate::agents::{channel_pair, AgentConnection, AgentMessage, AgentRequest, AgentWorker};
use crate::error::EngineError;
use crate::events::TestEventListener;
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::EngineResult;
use crate::services::TestAgency;

/// Where the far side of the connection comes from
pub enum AgentSource {
    /// Fresh isolated domain per load, hosting runners from this factory
    Domain(Arc<TestRunnerFactory>),
    /// Agent process from the agency
    Agency {
        agency: Option<Arc<TestAgency>>,
        timeout: Duration,
    },
}

enum Lease {
    Domain { thread: JoinHandle<()> },
    Agent { agency: Arc<TestAgency>, id: String },
}

struct Session {
    connection: Arc<AgentConnection>,
    lease: Lease,
}

/// Stop requests for the run in progress. A stop arriving before the
/// `Run` request is queued is held and sent right after it.
#[derive(Default)]
struct StopRelay {
    sender: Option<UnboundedSender<AgentRequest>>,
    /// Held stop, with its force flag
    pending: Option<bool>,
}

/// Runner proxy for an isolated domain or agent process
pub struct RemoteRunner {
    package: TestPackage,
    source: AgentSource,
    session: tokio::sync::Mutex<Option<Session>>,
    loaded: AtomicBool,
    running: AtomicBool,
    stop: Mutex<StopRelay>,
    failure: Mutex<Option<EngineResult>>,
    /// The session's channel failed; the next load replaces it
    broken: AtomicBool,
}

impl RemoteRunner {
    pub fn new(package: TestPackage, source: AgentSource) -> Self {
        Self {
            package,
            source,
            session: tokio::sync::Mutex::new(None),
            loaded: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop: Mutex::new(StopRelay::default()),
            failure: Mutex::new(None),
            broken: AtomicBool::new(false),
        }
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    pub fn state(&self) -> RunnerState {
        if self.running.load(Ordering::Acquire) {
            RunnerState::Running
        } else if self.loaded.load(Ordering::Acquire) {
            RunnerState::Loaded
        } else {
            RunnerState::Unloaded
        }
    }

    /// Acquire a domain or agent if needed and load the package there.
    /// A session whose channel failed is given up and replaced.
    pub async fn load(&self) -> Result<EngineResult, EngineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(EngineError::RunInProgress);
        }
        self.set_failure(None);

        let mut session = self.session.lock().await;
        if self.broken.swap(false, Ordering::AcqRel) {
            if let Some(dead) = session.take() {
                info!("Replacing the failed connection of {}", self.package);
                discard(dead, &self.package).await;
            }
        }
        if session.is_none() {
            match self.connect().await {
                Ok(connected) => *session = Some(connected),
                Err(e) => return self.absorb(e),
            }
        }
        let connection = match session.as_ref() {
            Some(session) => session.connection.clone(),
            None => return Err(EngineError::NotLoaded),
        };
        drop(session);

        let request = AgentRequest::Load {
            package: self.package.clone(),
        };
        match connection.call(request, None).await {
            Ok(AgentMessage::Result { result }) => {
                self.loaded.store(true, Ordering::Release);
                Ok(result)
            }
            Ok(other) => self.absorb(unexpected(&other)),
            Err(e) => self.absorb(e),
        }
    }

    /// Explore on the far side. An unloaded runner loads, explores and
    /// unloads again.
    pub async fn explore(&self, filter: &TestFilter) -> Result<EngineResult, EngineError> {
        if let Some(failure) = self.failure() {
            return Ok(failure);
        }
        if self.loaded.load(Ordering::Acquire) {
            return self.explore_loaded(filter).await;
        }

        let loaded = self.load().await?;
        let explored = if loaded.is_error() {
            Ok(loaded)
        } else {
            self.explore_loaded(filter).await
        };
        self.unload().await?;
        explored
    }

    async fn explore_loaded(&self, filter: &TestFilter) -> Result<EngineResult, EngineError> {
        let connection = self.connection().await?;
        let request = AgentRequest::Explore {
            filter: filter.clone(),
        };
        match connection.call(request, None).await {
            Ok(AgentMessage::Result { result }) => Ok(result),
            Ok(other) => self.absorb(unexpected(&other)),
            Err(e) => self.absorb(e),
        }
    }

    pub async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, EngineError> {
        if self.failure().is_some() {
            return Ok(0);
        }
        let connection = self.connection().await?;
        let request = AgentRequest::CountTestCases {
            filter: filter.clone(),
        };
        match connection.call(request, None).await {
            Ok(AgentMessage::Count { count }) => Ok(count),
            Ok(other) => self.absorb(unexpected(&other)).map(|_| 0),
            Err(e) => self.absorb(e).map(|_| 0),
        }
    }

    /// Run on the far side, relaying progress events to `listener`
    pub async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        if let Some(failure) = self.failure() {
            return Ok(failure);
        }
        let connection = self.connection().await?;
        {
            let mut relay = self.relay();
            self.running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .map_err(|_| EngineError::RunInProgress)?;
            *relay = StopRelay::default();
        }

        let request = AgentRequest::Run {
            filter: filter.clone(),
        };
        let sender = connection.sender();
        let reply = connection
            .call_then(request, Some(listener.as_ref()), || self.arm_stop(sender))
            .await;

        {
            let mut relay = self.relay();
            *relay = StopRelay::default();
            self.running.store(false, Ordering::Release);
        }

        match reply {
            Ok(AgentMessage::Result { result }) => Ok(result),
            Ok(other) => self.absorb(unexpected(&other)),
            Err(e) => self.absorb(e),
        }
    }

    /// Forward a stop request to the run in progress, if any. A stop made
    /// before the run request went out is held until it has.
    pub fn stop_run(&self, force: bool) {
        let mut guard = self.relay();
        let relay = &mut *guard;
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        match &relay.sender {
            Some(sender) => {
                debug!("Forwarding stop (force={}) for {}", force, self.package);
                if sender.send(AgentRequest::StopRun { force }).is_err() {
                    warn!("Could not deliver stop request for {}", self.package);
                }
            }
            None => {
                debug!("Holding stop (force={}) for {}", force, self.package);
                relay.pending = Some(relay.pending.unwrap_or(false) || force);
            }
        }
    }

    /// Publish the stop channel once `Run` is queued, sending any stop
    /// requested in the meantime
    fn arm_stop(&self, sender: UnboundedSender<AgentRequest>) {
        let mut relay = self.relay();
        if let Some(force) = relay.pending.take() {
            debug!("Sending held stop (force={}) for {}", force, self.package);
            if sender.send(AgentRequest::StopRun { force }).is_err() {
                warn!("Could not deliver stop request for {}", self.package);
            }
        }
        relay.sender = Some(sender);
    }

    fn relay(&self) -> MutexGuard<'_, StopRelay> {
        self.stop.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unload the package and give back the domain or agent
    pub async fn unload(&self) -> Result<(), EngineError> {
        if self.running.load(Ordering::Acquire) {
            self.stop_run(true);
        }

        let session = self.session.lock().await.take();
        self.loaded.store(false, Ordering::Release);
        self.broken.store(false, Ordering::Release);
        self.set_failure(None);

        if let Some(session) = session {
            release(session, &self.package).await;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Session, EngineError> {
        match &self.source {
            AgentSource::Domain(factory) => {
                spawn_domain(factory.clone(), format!("domain-{}", self.package.id()))
            }
            AgentSource::Agency { agency: None, .. } => Err(EngineError::AgencyNotRunning),
            AgentSource::Agency {
                agency: Some(agency),
                timeout,
            } => {
                let (id, connection) = agency.get_agent(&self.package, *timeout).await?;
                info!("Agent {} assigned to {}", id, self.package);
                Ok(Session {
                    connection,
                    lease: Lease::Agent {
                        agency: agency.clone(),
                        id,
                    },
                })
            }
        }
    }

    async fn connection(&self) -> Result<Arc<AgentConnection>, EngineError> {
        if !self.loaded.load(Ordering::Acquire) {
            return Err(EngineError::NotLoaded);
        }
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.connection.clone())
            .ok_or(EngineError::NotLoaded)
    }

    /// Turn a failure of the far side into an error result for this
    /// package. Later operations keep returning that result.
    fn absorb(&self, e: EngineError) -> Result<EngineResult, EngineError> {
        match e {
            EngineError::AgencyNotRunning | EngineError::NotLoaded | EngineError::RunInProgress => {
                Err(e)
            }
            e => {
                warn!("{} failed: {}", self.package, e);
                if e.is_communication_failure() {
                    self.broken.store(true, Ordering::Release);
                }
                let result = EngineResult::error(&self.package, e.to_string());
                self.set_failure(Some(result.clone()));
                self.loaded.store(true, Ordering::Release);
                Ok(result)
            }
        }
    }

    fn failure(&self) -> Option<EngineResult> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }

    fn set_failure(&self, result: Option<EngineResult>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = result;
        }
    }
}

fn unexpected(message: &AgentMessage) -> EngineError {
    EngineError::Protocol(format!("unexpected reply {message:?}"))
}

/// Start an isolated domain: a thread running its own single-threaded
/// runtime that serves the connection until told to stop
fn spawn_domain(factory: Arc<TestRunnerFactory>, label: String) -> Result<Session, EngineError> {
    let (connection, channels) = channel_pair(label.clone());

    let thread = std::thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            match runtime {
                Ok(runtime) => runtime.block_on(AgentWorker::new(factory).serve(channels)),
                Err(e) => error!("Failed to start runtime for {}: {}", label, e),
            }
        })?;

    debug!("Started {}", connection.label());
    Ok(Session {
        connection: Arc::new(connection),
        lease: Lease::Domain { thread },
    })
}

/// Give up a session whose channel failed without handing the agent back
async fn discard(session: Session, package: &TestPackage) {
    let Session { connection, lease } = session;
    match lease {
        Lease::Agent { agency, id } => {
            warn!("Dropping agent {} after a failure on {}", id, package);
            agency.remove_agent(&id);
        }
        lease => release(Session { connection, lease }, package).await,
    }
}

async fn release(session: Session, package: &TestPackage) {
    let Session { connection, lease } = session;
    match lease {
        Lease::Domain { thread } => {
            let _ = connection.send(AgentRequest::Stop);
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("{} stopped", connection.label()),
                _ => warn!("{} did not shut down cleanly", connection.label()),
            }
        }
        Lease::Agent { agency, id } => {
            match connection.call(AgentRequest::Unload, None).await {
                Ok(_) => agency.release_agent(&id),
                Err(e) => {
                    warn!("Agent {} failed to unload {}: {}", id, package, e);
                    agency.remove_agent(&id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{decode, encode, Registration, RemoteTestAgent};
    use crate::events::{EventCollector, NullListener, TestEvent};
    use crate::results::{ResultNode, ResultType};
    use crate::services::{AgentStatus, ProjectService};
    use std::io::Write;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn domain_source() -> AgentSource {
        let projects = Arc::new(ProjectService::new());
        AgentSource::Domain(Arc::new(TestRunnerFactory::in_process(projects)))
    }

    fn manifest(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_domain_runner_lifecycle() {
        let file = manifest(
            "name: Isolated\ntests:\n  - name: Ok\n  - name: Bad\n    result: failed\n",
        );
        let runner = RemoteRunner::new(TestPackage::from_file(file.path()), domain_source());

        let loaded = runner.load().await.unwrap();
        assert_eq!(loaded.xml().attr("testcasecount"), Some("2"));
        assert_eq!(runner.state(), RunnerState::Loaded);
        assert_eq!(runner.count_test_cases(&TestFilter::Empty).await.unwrap(), 2);

        let collector = Arc::new(EventCollector::new());
        let result = runner.run(collector.clone(), &TestFilter::Empty).await.unwrap();
        assert_eq!(result.xml().attr("failed"), Some("1"));
        assert_eq!(
            collector.count_where(|e| matches!(e, TestEvent::StartTest { .. })),
            2
        );

        runner.unload().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Unloaded);
        assert!(matches!(
            runner.count_test_cases(&TestFilter::Empty).await,
            Err(EngineError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_explore_without_load_is_transient() {
        let file = manifest("name: Isolated\ntests:\n  - name: Ok\n");
        let runner = RemoteRunner::new(TestPackage::from_file(file.path()), domain_source());

        let explored = runner.explore(&TestFilter::Empty).await.unwrap();
        assert_eq!(explored.xml().attr("testcasecount"), Some("1"));
        assert_eq!(runner.state(), RunnerState::Unloaded);
    }

    #[tokio::test]
    async fn test_missing_agency() {
        let source = AgentSource::Agency {
            agency: None,
            timeout: Duration::from_secs(1),
        };
        let runner = RemoteRunner::new(TestPackage::from_file("tests.yaml"), source);
        assert!(matches!(
            runner.load().await,
            Err(EngineError::AgencyNotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forced_stop_right_after_start_is_not_lost() {
        let file = manifest("name: Slow\ntests:\n  - name: Sleeps\n    command: \"sleep 5\"\n");
        let runner = Arc::new(RemoteRunner::new(
            TestPackage::from_file(file.path()),
            domain_source(),
        ));
        runner.load().await.unwrap();

        for _ in 0..5 {
            let stopper = runner.clone();
            let stop = std::thread::spawn(move || {
                while stopper.state() != RunnerState::Running {
                    std::thread::yield_now();
                }
                stopper.stop_run(true);
            });

            let started = std::time::Instant::now();
            let result = runner.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
            stop.join().unwrap();

            assert!(started.elapsed() < Duration::from_secs(4));
            assert_eq!(result.xml().attr("label"), Some("Cancelled"));
            assert_eq!(runner.state(), RunnerState::Loaded);
        }
        runner.unload().await.unwrap();
    }

    #[test]
    fn test_stop_before_run_request_is_held() {
        let runner = RemoteRunner::new(TestPackage::from_file("a.yaml"), domain_source());
        runner.running.store(true, Ordering::Release);
        runner.stop_run(false);
        runner.stop_run(true);
        runner.stop_run(false);

        let (connection, mut channels) = channel_pair("held");
        runner.arm_stop(connection.sender());
        assert_eq!(
            channels.requests.try_recv().ok(),
            Some(AgentRequest::StopRun { force: true })
        );
        assert!(channels.requests.try_recv().is_err());
    }

    fn spawn_fake_agent<F>(endpoint: SocketAddr, id: &'static str, mut answer: F)
    where
        F: FnMut(AgentRequest) -> Option<AgentMessage> + Send + 'static,
    {
        tokio::spawn(async move {
            let stream = TcpStream::connect(endpoint).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let registration = Registration {
                agent_id: id.to_string(),
                pid: 1,
            };
            writer
                .write_all(encode(&registration).unwrap().as_bytes())
                .await
                .unwrap();

            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match answer(decode(&line).unwrap()) {
                    Some(reply) => writer
                        .write_all(encode(&reply).unwrap().as_bytes())
                        .await
                        .unwrap(),
                    // hang up
                    None => break,
                }
            }
        });
    }

    async fn wait_until_ready(agency: &TestAgency, id: &str) {
        for _ in 0..200 {
            if agency
                .agents()
                .iter()
                .any(|a| a.id == id && a.status == AgentStatus::Ready)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agent {} never became ready: {:?}", id, agency.agents());
    }

    fn agency_source(agency: &Arc<TestAgency>) -> AgentSource {
        AgentSource::Agency {
            agency: Some(agency.clone()),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_reload_after_agent_died_uses_new_agent() {
        let agency = Arc::new(TestAgency::new(Some("/nonexistent/test-agent".into()), 0));
        let endpoint = agency.start().await.unwrap();
        let file = manifest("name: Remote\ntests:\n  - name: Ok\n");

        spawn_fake_agent(endpoint, "dies", |_| None);
        wait_until_ready(&agency, "dies").await;

        let runner = RemoteRunner::new(TestPackage::from_file(file.path()), agency_source(&agency));
        let first = runner.load().await.unwrap();
        assert!(first.is_error());

        let projects = Arc::new(ProjectService::new());
        let factory = Arc::new(TestRunnerFactory::in_process(projects));
        tokio::spawn(RemoteTestAgent::new("healthy", endpoint.to_string(), factory).run());
        wait_until_ready(&agency, "healthy").await;

        let second = runner.load().await.unwrap();
        assert!(!second.is_error());
        assert_eq!(second.xml().attr("testcasecount"), Some("1"));
        assert!(agency
            .agents()
            .iter()
            .any(|a| a.id == "healthy" && a.status == AgentStatus::Busy));
        assert!(agency.agents().iter().all(|a| a.id != "dies"));

        runner.unload().await.unwrap();
        agency.stop().await;
    }

    #[tokio::test]
    async fn test_channel_lost_during_run_becomes_error_result() {
        let agency = Arc::new(TestAgency::new(Some("/nonexistent/test-agent".into()), 0));
        let endpoint = agency.start().await.unwrap();
        let file = manifest("name: Remote\ntests:\n  - name: Ok\n");

        spawn_fake_agent(endpoint, "flaky", |request| match request {
            AgentRequest::Load { .. } => Some(AgentMessage::Result {
                result: EngineResult::new(ResultNode::new("test-suite")),
            }),
            _ => None,
        });
        wait_until_ready(&agency, "flaky").await;

        let runner = RemoteRunner::new(TestPackage::from_file(file.path()), agency_source(&agency));
        assert!(!runner.load().await.unwrap().is_error());

        let result = runner.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
        assert!(result.is_error());
        assert_eq!(runner.state(), RunnerState::Loaded);

        // later calls report the same failure
        let again = runner.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
        assert_eq!(again, result);

        runner.unload().await.unwrap();
        agency.stop().await;
    }

    #[tokio::test]
    async fn test_load_error_travels_back() {
        let runner = RemoteRunner::new(
            TestPackage::from_file("/nonexistent/tests.yaml"),
            domain_source(),
        );
        let loaded = runner.load().await.unwrap();
        assert_eq!(loaded.result_type(), ResultType::Error);

        let result = runner.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
        assert!(result.is_error());
        runner.unload().await.unwrap();
    }
}
