//! Terminal output: batch progress bar and report summary.
//!
//! Uses `indicatif` for the progress bar and `console` for color styling.
//! [`BatchProgress`] tracks the batch visually while jobs complete in any
//! order; [`print_report`] renders the aggregate report for the `run` and
//! `status` subcommands.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{JobRecord, JobState};
use crate::store::AggregateReport;

/// Visual progress over one batch invocation.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    /// Starts the bar sized to the number of scheduled fires.
    pub fn start(total: u64) -> Self {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{bar:40.cyan/blue} {pos}/{len} fires  elapsed {elapsed_precise}  eta {eta}",
                )
                .expect("invalid template"),
        );

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Advances the bar and prints one line for the finished job.
    pub fn job_finished(&self, record: &JobRecord) {
        let line = match record.state {
            JobState::Done => format!(
                "  {} {} ({:.1}s)",
                self.green.apply_to("✓"),
                record.key,
                record.duration_seconds
            ),
            JobState::Skipped => format!(
                "  {} {} already processed",
                self.yellow.apply_to("↷"),
                record.key
            ),
            _ => {
                let reason = record
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                format!("  {} {}: {reason}", self.red.apply_to("✗"), record.key)
            }
        };
        self.pb.println(line);
        self.pb.inc(1);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Prints the aggregate report: counts, then one line per failed fire so
/// nothing fails silently.
pub fn print_report(report: &AggregateReport) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();

    println!();
    println!("─── Batch Report ───");
    println!("  {} done", green.apply_to(report.done));
    println!("  {} failed", red.apply_to(report.failed));
    println!("  {} skipped", yellow.apply_to(report.skipped));

    let failed: Vec<&JobRecord> = report
        .jobs
        .values()
        .filter(|r| r.state == JobState::Failed)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("{}", red.apply_to("Failed fires:"));
        for record in failed {
            let (kind, message) = record
                .error
                .as_ref()
                .map(|e| (e.kind.as_str(), e.message.as_str()))
                .unwrap_or(("unknown", "no error recorded"));
            println!("  {} [{kind}] {message}", record.key);
        }
    }
}
