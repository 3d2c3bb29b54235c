//! Terminal progress for the maintenance tools.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// `ui_flag` is `auto`, `plain` or `pretty`; bars only ever draw on a TTY.
    pub fn from_args(ui_flag: &str, stderr_is_tty: bool) -> Self {
        let mode = match ui_flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self {
            pretty: stderr_is_tty && mode != UiMode::Plain,
        }
    }

    /// A counted task of `total` items.
    pub fn progress(&self, name: &str, total: u64) -> Progress {
        let bar = self.pretty.then(|| {
            let bar = ProgressBar::new(total);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{msg:<24} [{bar:30}] {pos}/{len} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style.progress_chars("=> "));
            bar.set_message(name.to_string());
            bar
        });
        if bar.is_none() {
            eprintln!("==> {} ({} items)", name, total);
        }
        Progress {
            name: name.to_string(),
            total,
            done: 0,
            start: Instant::now(),
            bar,
        }
    }
}

pub struct Progress {
    name: String,
    total: u64,
    done: u64,
    start: Instant,
    bar: Option<ProgressBar>,
}

impl Progress {
    /// Mark one item finished, with a short status line for plain output.
    pub fn step(&mut self, item: &str, ok: bool) {
        self.done += 1;
        let mark = if ok { "ok" } else { "FAILED" };
        match &self.bar {
            Some(bar) => {
                if !ok {
                    bar.println(format!("  {item}: {mark}"));
                }
                bar.inc(1);
            }
            None => eprintln!("  [{}/{}] {}: {}", self.done, self.total, item, mark),
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        let message = format!(
            "✔ {} {}/{} ({})",
            self.name,
            self.done,
            self.total,
            format_duration(self.start.elapsed())
        );
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => eprintln!("{message}"),
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
