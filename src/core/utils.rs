use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

static PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

/// Shared draw target so log lines and progress bars do not overwrite each other
pub fn multi_progress() -> &'static MultiProgress {
    PROGRESS.get_or_init(MultiProgress::new)
}

// Helper to create a consistent spinner
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Helper to create a consistent progress bar over loops
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new(total as u64));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} loops ({per_sec}, {eta}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
