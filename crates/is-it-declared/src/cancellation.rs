use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lets a host abandon a multi-file analysis. Checked between files, never mid-file.
pub trait Cancellable {
  fn is_cancelled(&self) -> bool;

  fn cancel(&self);
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Cancellable for CancellationToken {
  fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Relaxed)
  }

  fn cancel(&self) {
    self.cancelled.store(true, Ordering::Relaxed);
  }
}
