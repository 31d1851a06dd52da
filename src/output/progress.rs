use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_red, bright_yellow};

/// Spinner for one phase of a multi-phase workflow
pub struct PhaseProgress {
    pb: ProgressBar,
    label: String,
}

impl PhaseProgress {
    pub fn header() {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
    }

    pub fn start(step: usize, total: usize, description: &str) -> Self {
        let label = format!("Phase {step}/{total}: {description}");
        let pb = create_spinner(bright_yellow(&label).to_string());
        Self { pb, label }
    }

    pub fn finish(self) {
        self.pb
            .finish_with_message(bright_green(format!("{} ✓", self.label)).to_string());
    }

    pub fn fail(self) {
        self.pb
            .finish_with_message(bright_red(format!("{} ✗", self.label)).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
