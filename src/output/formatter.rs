//! Output formatters for test results
//!
//! Provides summary, XML and JSON renderings of an engine result.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::results::{EngineResult, ResultNode, ResultSummary, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Summary,
    Xml,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "summary" => Some(OutputFormat::Summary),
            "xml" => Some(OutputFormat::Xml),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    /// Format implied by a result file's extension; XML unless `.json`
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Xml,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a run result
    pub fn format_result(&self, result: &EngineResult) -> String {
        match self.format {
            OutputFormat::Summary => self.format_summary(result.xml()),
            OutputFormat::Xml => result.xml().to_xml(),
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
        }
    }

    /// Format an explore result: one line per suite and case
    pub fn format_explore(&self, result: &EngineResult) -> String {
        match self.format {
            OutputFormat::Summary => {
                let mut output = String::new();
                self.write_tree(result.xml(), 0, &mut output);
                let count = result.xml().attr_u64("testcasecount");
                output.push_str(&format!("\n{count} test cases\n"));
                output
            }
            _ => self.format_result(result),
        }
    }

    fn write_tree(&self, node: &ResultNode, depth: usize, output: &mut String) {
        let indent = "  ".repeat(depth);
        match node.name() {
            "test-suite" => output.push_str(&format!(
                "{}{} ({})\n",
                indent,
                node.attr("name").unwrap_or(""),
                node.attr_u64("testcasecount")
            )),
            "test-case" => output.push_str(&format!(
                "{}{}\n",
                indent,
                node.attr("fullname").unwrap_or("")
            )),
            "error" => output.push_str(&format!(
                "{}{} {}\n",
                indent,
                self.paint(TestStatus::Failed, "!"),
                error_message(node)
            )),
            _ => {}
        }
        let depth = if node.name() == "test-run" { depth } else { depth + 1 };
        for child in node.children() {
            self.write_tree(child, depth, output);
        }
    }

    fn format_summary(&self, run: &ResultNode) -> String {
        let mut output = String::new();
        let summary = summary_of(run);

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str("║  Test Run Summary                                            ║\n");
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let status = summary.status.unwrap_or(TestStatus::Inconclusive);
        output.push_str(&format!(
            "║  Overall result: {:43} ║\n",
            self.paint(status, status.as_str())
        ));
        output.push_str(&format!(
            "║  Total: {:3} | Pass: {:3} | Fail: {:3} | Inconclusive: {:3} | Skip: {:3}\n",
            summary.total, summary.passed, summary.failed, summary.inconclusive, summary.skipped
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {}s\n",
            summary.pass_rate(),
            run.attr("duration").unwrap_or("0")
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        let failures: Vec<&ResultNode> = run
            .find_all("test-case")
            .into_iter()
            .filter(|case| case.attr("result") == Some(TestStatus::Failed.as_str()))
            .collect();
        let errors = run.find_all("error");

        if !failures.is_empty() || !errors.is_empty() {
            output.push_str("\n Errors and Failures:\n");
            for (i, case) in failures.iter().enumerate() {
                output.push_str(&format!(
                    " {}) {} {}\n",
                    i + 1,
                    self.paint(TestStatus::Failed, TestStatus::Failed.symbol()),
                    case.attr("fullname").unwrap_or("")
                ));
                if let Some(message) = failure_message(case) {
                    output.push_str(&format!("    {message}\n"));
                }
            }
            for error in errors {
                output.push_str(&format!(
                    " {} {}: {}\n",
                    self.paint(TestStatus::Failed, "!"),
                    error.attr("package").unwrap_or(""),
                    error_message(error)
                ));
            }
        }

        output
    }

    fn paint(&self, status: TestStatus, text: &str) -> String {
        if !self.colorize {
            return text.to_string();
        }
        let color = match status {
            TestStatus::Passed => "32",
            TestStatus::Failed => "31",
            TestStatus::Skipped | TestStatus::Inconclusive => "33",
        };
        format!("\x1b[{color}m{text}\x1b[0m")
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Summary)
    }
}

/// Counts of a run node, read from its attributes
fn summary_of(run: &ResultNode) -> ResultSummary {
    ResultSummary {
        test_case_count: run.attr_u64("testcasecount"),
        total: run.attr_u64("total"),
        passed: run.attr_u64("passed"),
        failed: run.attr_u64("failed"),
        inconclusive: run.attr_u64("inconclusive"),
        skipped: run.attr_u64("skipped"),
        status: run.attr("result").and_then(TestStatus::parse),
    }
}

fn failure_message(case: &ResultNode) -> Option<&str> {
    case.child("failure")
        .and_then(|failure| failure.child("message"))
        .and_then(|message| message.text())
}

fn error_message(error: &ResultNode) -> &str {
    error
        .child("message")
        .and_then(|message| message.text())
        .unwrap_or("")
}

/// Write a result to a file
pub fn write_result_file(path: &Path, result: &EngineResult, format: OutputFormat) -> Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let mut content = formatter.format_result(result);
    if format == OutputFormat::Xml {
        content.insert_str(0, "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create result file: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write result file: {}", path.display()))?;

    Ok(())
}
