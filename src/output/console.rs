//! Console progress reporting

use std::io::Write;

use crate::events::{TestEvent, TestEventListener};
use crate::results::TestStatus;

/// Prints one line per finished test case
pub struct ConsoleListener {
    colorize: bool,
    /// Also print suite starts
    verbose: bool,
}

impl ConsoleListener {
    pub fn new() -> Self {
        Self {
            colorize: true,
            verbose: false,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Line printed for `event`, if any
    pub fn format_event(&self, event: &TestEvent) -> Option<String> {
        match event {
            TestEvent::StartRun { count } => Some(format!("Running {count} test cases")),
            TestEvent::StartSuite { full_name, .. } if self.verbose => {
                Some(format!("=> {full_name}"))
            }
            TestEvent::TestCase { result } => {
                let status = result
                    .attr("result")
                    .and_then(TestStatus::parse)
                    .unwrap_or(TestStatus::Inconclusive);
                let symbol = if self.colorize {
                    let color = match status {
                        TestStatus::Passed => "32",
                        TestStatus::Failed => "31",
                        _ => "33",
                    };
                    format!("\x1b[{color}m{}\x1b[0m", status.symbol())
                } else {
                    status.symbol().to_string()
                };
                let label = result
                    .attr("label")
                    .map(|label| format!(" [{label}]"))
                    .unwrap_or_default();
                Some(format!(
                    "  {} {}{}",
                    symbol,
                    result.attr("fullname").unwrap_or(""),
                    label
                ))
            }
            _ => None,
        }
    }
}

impl Default for ConsoleListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEventListener for ConsoleListener {
    fn on_test_event(&self, event: &TestEvent) {
        if let Some(line) = self.format_event(event) {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ResultNode;

    #[test]
    fn test_case_lines() {
        let listener = ConsoleListener::new().no_color();
        let result = ResultNode::new("test-case")
            .with_attr("fullname", "Calc.Manual")
            .with_attr("result", "Skipped")
            .with_attr("label", "Explicit");

        assert_eq!(
            listener.format_event(&TestEvent::TestCase { result }),
            Some("  ○ Calc.Manual [Explicit]".to_string())
        );
        assert_eq!(
            listener.format_event(&TestEvent::StartRun { count: 3 }),
            Some("Running 3 test cases".to_string())
        );
    }

    #[test]
    fn test_suite_starts_only_when_verbose() {
        let event = TestEvent::StartSuite {
            id: "0-1000".into(),
            name: "Calc".into(),
            full_name: "Calc".into(),
        };
        assert_eq!(ConsoleListener::new().format_event(&event), None);
        assert_eq!(
            ConsoleListener::new().verbose(true).format_event(&event),
            Some("=> Calc".to_string())
        );
    }
}
