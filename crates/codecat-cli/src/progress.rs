//! Scan progress reporting with TTY detection: a progress bar in
//! interactive runs, plain `eprintln!` lines otherwise (CI logs, redirected
//! output).

use std::io::IsTerminal;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

pub struct ScanProgress {
    total_targets: usize,
    current: usize,
    bar: Option<ProgressBar>,
    start_time: Instant,
}

impl ScanProgress {
    pub fn new(total_targets: usize) -> Self {
        let bar = if std::io::stderr().is_terminal() && total_targets > 0 {
            let pb = ProgressBar::new(total_targets as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        Self { total_targets, current: 0, bar, start_time: Instant::now() }
    }

    pub fn start_target(&mut self, platform: &str, target: &str) {
        self.current += 1;
        let msg = format!("[{}/{}] scanning {platform}:{target}... ({:?})", self.current, self.total_targets, self.start_time.elapsed());
        match &self.bar {
            Some(pb) => {
                pb.set_message(msg);
                pb.set_position((self.current - 1) as u64);
            }
            None => eprintln!("{msg}"),
        }
    }

    pub fn finish(self) {
        let msg = format!("scanned {}/{} targets in {:?}", self.current, self.total_targets, self.start_time.elapsed());
        match self.bar {
            Some(pb) => {
                pb.set_message(msg);
                pb.finish();
            }
            None => eprintln!("{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_target_advances_counter() {
        let mut progress = ScanProgress::new(3);
        progress.start_target("github", "org-a");
        assert_eq!(progress.current, 1);
        progress.start_target("github", "org-b");
        assert_eq!(progress.current, 2);
    }

    #[test]
    fn finish_consumes_without_panic() {
        let progress = ScanProgress::new(0);
        progress.finish();
    }
}
