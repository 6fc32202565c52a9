//! Progress notifications delivered during a run

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::results::ResultNode;

/// One progress notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TestEvent {
    StartRun {
        count: usize,
    },
    StartSuite {
        id: String,
        name: String,
        full_name: String,
    },
    StartTest {
        id: String,
        name: String,
        full_name: String,
    },
    /// A test case finished
    TestCase {
        result: ResultNode,
    },
    /// A suite finished
    TestSuite {
        result: ResultNode,
    },
}

impl TestEvent {
    /// Element form of the notification
    pub fn to_node(&self) -> ResultNode {
        match self {
            TestEvent::StartRun { count } => ResultNode::new("start-run").with_attr("count", count),
            TestEvent::StartSuite {
                id,
                name,
                full_name,
            } => ResultNode::new("start-suite")
                .with_attr("id", id)
                .with_attr("name", name)
                .with_attr("fullname", full_name),
            TestEvent::StartTest {
                id,
                name,
                full_name,
            } => ResultNode::new("start-test")
                .with_attr("id", id)
                .with_attr("name", name)
                .with_attr("fullname", full_name),
            TestEvent::TestCase { result } | TestEvent::TestSuite { result } => {
                let mut node = result.clone();
                node.children_mut().retain(|c| c.name() != "test-case" && c.name() != "test-suite");
                node
            }
        }
    }

    pub fn to_xml(&self) -> String {
        self.to_node().to_compact_xml()
    }
}

/// Receives progress notifications during a run.
///
/// Calls for one run arrive in execution order and never concurrently.
pub trait TestEventListener: Send + Sync {
    fn on_test_event(&self, event: &TestEvent);
}

impl<F> TestEventListener for F
where
    F: Fn(&TestEvent) + Send + Sync,
{
    fn on_test_event(&self, event: &TestEvent) {
        self(event)
    }
}

/// Listener that ignores every notification
pub struct NullListener;

impl TestEventListener for NullListener {
    fn on_test_event(&self, _event: &TestEvent) {}
}

/// Listener that records notifications in order
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<TestEvent>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TestEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count_where(&self, predicate: impl Fn(&TestEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| predicate(e)).count())
            .unwrap_or(0)
    }
}

impl TestEventListener for EventCollector {
    fn on_test_event(&self, event: &TestEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_listener() {
        let seen = AtomicUsize::new(0);
        let listener = |_: &TestEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        listener.on_test_event(&TestEvent::StartRun { count: 3 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_wire_form() {
        let event = TestEvent::StartTest {
            id: "0-1001".into(),
            name: "Add".into(),
            full_name: "Calc.Add".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "start-test");
        assert_eq!(
            event.to_xml(),
            "<start-test id=\"0-1001\" name=\"Add\" fullname=\"Calc.Add\"/>"
        );
    }

    #[test]
    fn test_suite_event_drops_nested_results() {
        let result = ResultNode::new("test-suite")
            .with_attr("result", "Passed")
            .with_child(ResultNode::new("test-case"))
            .with_child(ResultNode::new("properties"));
        let node = TestEvent::TestSuite { result }.to_node();
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].name(), "properties");
    }

    #[test]
    fn test_collector_keeps_order() {
        let collector = EventCollector::new();
        collector.on_test_event(&TestEvent::StartRun { count: 1 });
        collector.on_test_event(&TestEvent::StartRun { count: 2 });
        assert_eq!(collector.events()[1], TestEvent::StartRun { count: 2 });
        assert_eq!(collector.count_where(|e| matches!(e, TestEvent::StartRun { .. })), 2);
    }
}
