//! Terminal progress over assimilation cycles.

use pbr::ProgressBar;

use na_df::CycleOutcome;

use std::io::{self, Stderr};
use std::time::Duration;

/// Progress bar on stderr, so it never mixes with products written to
/// stdout. Hidden bars still count cycles.
pub struct CycleProgress {
  bar: Option<ProgressBar<Stderr>>,
  done: usize,
  failed_stages: usize,
}

impl CycleProgress {
  pub fn new(cycles: usize, visible: bool) -> CycleProgress {
    let bar = if visible {
      let mut p = ProgressBar::on(io::stderr(), cycles as u64);
      p.show_speed = false;
      p.show_percent = true;
      p.show_counter = true;
      p.show_time_left = true;
      p.set_max_refresh_rate(Some(Duration::from_millis(100)));
      p.message("cycles: ");
      Some(p)
    } else {
      None
    };

    CycleProgress {
      bar: bar,
      done: 0,
      failed_stages: 0,
    }
  }

  pub fn done(&self) -> usize { self.done }
  pub fn failed_stages(&self) -> usize { self.failed_stages }

  pub fn cycle_finished(&mut self, outcome: &CycleOutcome) {
    self.done += 1;
    self.failed_stages += outcome.failed_stages().count();
    if let Some(ref mut bar) = self.bar {
      if self.failed_stages > 0 {
        let msg = format!("cycles ({} failed stages): ", self.failed_stages);
        bar.message(&msg);
      }
      bar.inc();
    }
  }

  pub fn finish(mut self) {
    if let Some(ref mut bar) = self.bar {
      let msg = format!("{} cycles done\n", self.done);
      bar.finish_println(&msg);
    }
  }
}
