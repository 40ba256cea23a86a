//! Cooperative stop flag and progress reporting shared by the scanner and executor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable stop request flag.
///
/// Setting it is safe from any thread. Once requested it stays set until
/// [`StopHandle::clear`] is called; work loops poll it between files.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Total passed along with a progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Total {
    Known(usize),
    /// Still counting, e.g. while a directory is being scanned.
    Unknown,
}

impl fmt::Display for Total {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Total::Known(total) => write!(f, "{}", total),
            Total::Unknown => write!(f, "?"),
        }
    }
}

/// Receives progress updates, synchronously and in record order.
pub trait ProgressSink {
    fn report(&mut self, current: usize, total: Total, message: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, Total, &str),
{
    fn report(&mut self, current: usize, total: Total, message: &str) {
        self(current, total, message)
    }
}
