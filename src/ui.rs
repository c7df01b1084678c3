//! Terminal reporting for the binaries: stage banners and a live run counter.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// Pretty output needs a terminal; `NO_COLOR` turns `auto` into plain.
    pub fn detect(mode: UiMode) -> Self {
        use std::io::IsTerminal;
        let is_tty = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = spinner(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live counter of processed frames for one run.
    pub fn run_progress(&self, label: &str) -> RunProgress {
        let bar = self.pretty().then(|| spinner(format!("{label}: starting")));
        RunProgress {
            label: label.to_string(),
            bar,
            frames: 0,
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct RunProgress {
    label: String,
    bar: Option<ProgressBar>,
    frames: u64,
}

impl RunProgress {
    /// Report the frames handled so far and the size of the latest table.
    pub fn update(&mut self, frames: u64, detections: usize) {
        if frames == self.frames {
            return;
        }
        self.frames = frames;
        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "{}: {} frames, {} detections in last",
                self.label, self.frames, detections
            ));
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finish(self, status: &str) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(format!("{}: {}", self.label, status)),
            None => eprintln!("{}: {} ({} frames)", self.label, status, self.frames),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_progress_counts_frames() {
        let ui = Ui::new(UiMode::Pretty, false);
        let mut progress = ui.run_progress("camera #0");
        progress.update(1, 2);
        progress.update(2, 0);
        assert_eq!(progress.frames(), 2);
        progress.finish("stopped");
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
