//! Training progress display.
//!
//! With the `progress` feature the bar is drawn by `indicatif`; without it
//! a single status line is rewritten on stdout.

#[cfg(not(feature = "progress"))]
use std::io::{self, Write};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

pub struct TrainingProgress {
    num_epochs: usize,
    batches_per_epoch: usize,
    current_epoch: usize,
    current_batch: usize,
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl TrainingProgress {
    pub fn new(num_epochs: usize, batches_per_epoch: usize) -> Self {
        Self {
            num_epochs,
            batches_per_epoch,
            current_epoch: 0,
            current_batch: 0,
            #[cfg(feature = "progress")]
            bar: None,
        }
    }

    pub fn start_epoch(&mut self) {
        self.current_epoch += 1;
        self.current_batch = 0;
        self.open_bar();
    }

    pub fn update_batch(&mut self, cost: f32) {
        self.current_batch += 1;
        self.draw(cost);
    }

    /// Closes the epoch line with the validation score and mean cost.
    pub fn finish_epoch(&mut self, valid: f32, avg_cost: f32) {
        let summary = format!(
            "Epoch [{}/{}] valid: {:.4}, cost: {:.4}",
            self.current_epoch, self.num_epochs, valid, avg_cost
        );
        self.close(summary);
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    #[cfg(feature = "progress")]
    fn open_bar(&mut self) {
        let bar = ProgressBar::new(self.batches_per_epoch as u64);
        if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(format!("epoch {}/{}", self.current_epoch, self.num_epochs));
        self.bar = Some(bar);
    }

    #[cfg(feature = "progress")]
    fn draw(&self, cost: f32) {
        if let Some(bar) = &self.bar {
            bar.set_position(self.current_batch as u64);
            bar.set_message(format!("cost {:.4}", cost));
        }
    }

    #[cfg(feature = "progress")]
    fn close(&mut self, summary: String) {
        match self.bar.take() {
            Some(bar) => bar.finish_with_message(summary),
            None => println!("  {}", summary),
        }
    }

    #[cfg(not(feature = "progress"))]
    fn open_bar(&mut self) {}

    #[cfg(not(feature = "progress"))]
    fn draw(&self, cost: f32) {
        print!(
            "\r  Epoch [{}/{}] Batch [{}/{}] cost: {:.4}",
            self.current_epoch, self.num_epochs, self.current_batch, self.batches_per_epoch, cost
        );
        io::stdout().flush().ok();
    }

    #[cfg(not(feature = "progress"))]
    fn close(&mut self, summary: String) {
        println!("\r  {}", summary);
    }
}
