// Volatile Submission Buffer
//
// Process-memory holding area for buffered mode. Contents live until
// the next authenticated drain or until the process exits, whichever
// comes first.

use parking_lot::Mutex;

use crate::log::{Ack, Submission};

/// Ordered, lock-guarded submission buffer.
///
/// `append` and `drain_and_clear` take the same lock, so a drain sees
/// every append that finished before it and none that started after.
#[derive(Debug, Default)]
pub struct VolatileBuffer {
    entries: Mutex<Vec<Submission>>,
}

impl VolatileBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, submission: Submission) -> Ack {
        let mut entries = self.entries.lock();
        entries.push(submission);
        Ack {
            position: entries.len(),
        }
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain_and_clear(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Copy of the current contents. Does not clear.
    pub fn peek(&self) -> Vec<Submission> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
