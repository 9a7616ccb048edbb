use chrono::Local;
use std::fs;
use std::path::PathBuf;
use tensorboard_rs::summary_writer::SummaryWriter;

use crate::error::Result;

/// TensorBoard scalars for a training run.
pub struct TensorBoardLogger {
    writer: SummaryWriter,
    step: usize,
}

impl TensorBoardLogger {
    /// Logs go to `runs/{program}-{timestamp}`.
    pub fn new(program: &str) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        Self::with_log_dir(&format!("runs/{}-{}", program, timestamp))
    }

    pub fn with_log_dir(log_dir: &str) -> Result<Self> {
        let path = PathBuf::from(log_dir);
        fs::create_dir_all(&path)?;
        let writer = SummaryWriter::new(&path);
        Ok(Self { writer, step: 0 })
    }

    pub fn log_scalar(&mut self, tag: &str, value: f32) {
        self.writer.add_scalar(tag, value, self.step);
    }

    pub fn next_step(&mut self) {
        self.step += 1;
    }

    pub fn set_step(&mut self, step: usize) {
        self.step = step;
    }

    pub fn flush(&mut self) {
        self.writer.flush();
    }
}

impl Drop for TensorBoardLogger {
    fn drop(&mut self) {
        self.writer.flush();
    }
}
