use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::studio::models::{JobRecord, JobState, RunStatus, RunStatusSnapshot};
use crate::ui::icons::{CHECK, CROSS, DOWNLOAD, FILM, FOLDER, SPARKLE, STOP};

/// Terminal UI for a headless batch run, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Batch bar: how many jobs have reached a terminal state
/// - Job spinner: the job currently generating or downloading
///
/// Driven by run events; every method is a no-op on the run itself.
pub struct BatchUI {
    multi: MultiProgress,
    batch_bar: ProgressBar,
    job_bar: ProgressBar,
    verbose: bool,
}

impl BatchUI {
    pub fn new(total_jobs: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let batch_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let batch_bar = multi.add(ProgressBar::new(total_jobs));
        batch_bar.set_style(batch_style);
        batch_bar.set_prefix("Videos");

        let job_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let job_bar = multi.add(ProgressBar::new_spinner());
        job_bar.set_style(job_style);
        job_bar.set_prefix("   Job");

        Self {
            multi,
            batch_bar,
            job_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to stderr if the terminal
    /// is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Reflect one record update.
    pub fn job_updated(&self, record: &JobRecord) {
        let label = format!("#{}", record.index + 1);
        match record.state {
            JobState::Pending => {}
            JobState::Generating => {
                self.job_bar.reset_elapsed();
                self.job_bar.enable_steady_tick(Duration::from_millis(100));
                self.job_bar.set_message(format!(
                    "{}{} {}",
                    FILM,
                    style(&label).cyan(),
                    truncate(&record.prompt, 60)
                ));
            }
            JobState::Downloading => {
                self.job_bar.set_message(format!(
                    "{}{} downloading",
                    DOWNLOAD,
                    style(&label).cyan()
                ));
                if self.verbose {
                    if let Some(url) = &record.asset_url {
                        self.print_line(format!("    {} {}", style("→").dim(), style(url).dim()));
                    }
                }
            }
            JobState::Completed => {
                self.batch_bar.inc(1);
                let file = record.filename().unwrap_or_default();
                self.print_line(format!("{}{} {}", CHECK, style(&label).green(), file));
            }
            JobState::Failed => {
                self.batch_bar.inc(1);
                let kind = record.error.map(|k| k.as_str()).unwrap_or("failed");
                let message = record.message.as_deref().unwrap_or_default();
                self.print_line(format!(
                    "{}{} {} {}",
                    CROSS,
                    style(&label).red(),
                    style(kind).red().bold(),
                    style(message).dim()
                ));
            }
        }
    }

    /// Clear the bars and print the run summary.
    pub fn finish(&self, snapshot: &RunStatusSnapshot, download_dir: &std::path::Path) {
        self.job_bar.finish_and_clear();
        self.batch_bar.finish_and_clear();

        let icon = match snapshot.status {
            RunStatus::Completed if snapshot.failed == 0 => SPARKLE,
            RunStatus::Completed => CHECK,
            RunStatus::Cancelled => STOP,
            _ => CROSS,
        };
        println!();
        println!(
            "{}Run {}: {} of {} videos generated, {} failed",
            icon,
            style(snapshot.status.as_str()).bold(),
            style(snapshot.completed).green(),
            snapshot.total,
            style(snapshot.failed).red()
        );
        if snapshot.completed > 0 {
            println!("{}{}", FOLDER, download_dir.display());
        }
    }
}

/// Shorten `text` to at most `max` characters, adding an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
