use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.blue} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run a blocking step (staging copies, container start, teardown) behind a
/// spinner and leave a ✔/✘ line with the time it took.
pub fn with_spinner<T, F>(msg: &str, op: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let pb = create_spinner(msg);
    let started = Instant::now();
    let result = op();
    let elapsed = started.elapsed().as_secs_f64();

    pb.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    match &result {
        Ok(_) => pb.finish_with_message(format!("✔ {} ({:.1}s)", msg, elapsed)),
        Err(_) => pb.finish_with_message(format!("✘ {} ({:.1}s)", msg, elapsed)),
    }
    result
}
