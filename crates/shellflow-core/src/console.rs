//! Human-readable progress output for workflow runs.
//!
//! Write failures are ignored: losing console output never fails a run.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Local;

use crate::orchestrator::RunSummary;

const WIDTH: usize = 80;
const INNER: usize = WIDTH - 6;

pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Discards everything.
    pub fn sink() -> Self {
        Self::new(Box::new(io::sink()))
    }

    fn emit(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }

    pub fn header(&self, workflow: &str, action: &str) {
        let rule = "-".repeat(WIDTH - 2);
        let started = Local::now().format("%Y-%m-%d %H:%M");
        self.emit(&format!(
            "+{rule}+\n| {:<30} | {:<15} | STARTED: {started} |\n+{rule}+\n",
            format!("WORKFLOW: {workflow}"),
            format!("ACTION: {action}"),
        ));
    }

    pub fn section(&self, name: &str) {
        self.emit(&format!("\n[ {} ]\n", name.to_uppercase()));
    }

    pub fn pre_check(&self, label: &str, passed: bool, elapsed: Duration) {
        let (icon, status) = if passed { ("✓", "ok") } else { ("✗", "fail") };
        self.emit(&format!(
            "  {icon} {label:<30} {status:<4} ({})\n",
            format_duration(elapsed)
        ));
    }

    pub fn progress(&self, current: usize, total: usize, label: &str, elapsed: Duration) {
        self.emit(&format!(
            "  ({current}/{total}) {label:<20} {}\n",
            format_duration(elapsed)
        ));
    }

    pub fn info(&self, message: &str) {
        self.boxed('ℹ', message);
    }

    pub fn success(&self, message: &str) {
        self.boxed('✓', message);
    }

    pub fn warning(&self, message: &str) {
        self.boxed('⚠', message);
    }

    pub fn error(&self, message: &str) {
        self.boxed('✗', message);
    }

    fn boxed(&self, icon: char, message: &str) {
        let rule = "─".repeat(WIDTH - 4);
        let mut text = format!("  ┌{rule}┐\n");
        for (i, line) in message.lines().enumerate() {
            let line = if i == 0 {
                format!("{icon} {line}")
            } else {
                format!("  {line}")
            };
            text.push_str(&format!("  │ {line:<width$} │\n", width = INNER));
        }
        text.push_str(&format!("  └{rule}┘\n"));
        self.emit(&text);
    }

    pub fn summary(&self, summary: &RunSummary) {
        self.emit(&format!(
            "\n[ SUMMARY ]\n  Status: {}\n  Duration: {}\n  Prechecks: {} passed, {} failed\n  Scripts: {}/{} completed\n",
            summary.status,
            format_duration(summary.elapsed),
            summary.pre_checks_passed,
            summary.pre_checks_failed,
            summary.steps_completed,
            summary.steps_total,
        ));
    }
}

/// `850μs`, `12ms`, `3.4s`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_millis(1) {
        format!("{}μs", d.as_micros())
    } else if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_micros(850)), "850μs");
        assert_eq!(format_duration(Duration::from_millis(12)), "12ms");
        assert_eq!(format_duration(Duration::from_millis(3400)), "3.4s");
    }

    #[test]
    fn boxed_lines_share_a_width() {
        let buf = Buffer::default();
        let console = Console::new(Box::new(buf.clone()));
        console.error("pre-check 2 failed\nexited with status 1");
        let text = buf.text();
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert_eq!(widths.len(), 4);
        assert!(widths.iter().all(|w| *w == widths[0]));
        assert!(text.contains("✗ pre-check 2 failed"));
    }

    #[test]
    fn summary_block_lists_counts() {
        let buf = Buffer::default();
        let console = Console::new(Box::new(buf.clone()));
        console.summary(&RunSummary {
            workflow_id: "deploy".into(),
            status: RunStatus::Success,
            pre_checks_passed: 2,
            pre_checks_failed: 0,
            steps_completed: 3,
            steps_total: 3,
            elapsed: Duration::from_millis(40),
            failure: None,
        });
        let text = buf.text();
        assert!(text.contains("[ SUMMARY ]"));
        assert!(text.contains("Status: success"));
        assert!(text.contains("Prechecks: 2 passed, 0 failed"));
        assert!(text.contains("Scripts: 3/3 completed"));
    }
}
