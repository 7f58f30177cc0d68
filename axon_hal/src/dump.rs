//! Raw PCM dumps for field debugging.
//!
//! When the dump properties grant a byte budget, stream data is
//! mirrored into a file until the budget is spent. Strictly
//! best-effort: dump failures never disturb the audio path.

use std::fs::File;
use std::io::Write;
use std::path::Path;

pub(crate) struct PcmDumper {
    file: File,
    remaining: usize,
}

impl PcmDumper {
    /// Opens `path` for dumping up to `budget` bytes. Returns `None`
    /// when the budget is zero or the file cannot be created.
    pub(crate) fn create(path: &Path, budget: usize) -> Option<Self> {
        if budget == 0 {
            return None;
        }
        match File::create(path) {
            Ok(file) => Some(Self {
                file,
                remaining: budget,
            }),
            Err(e) => {
                log::warn!("pcm dump: cannot create {}: {e}", path.display());
                None
            }
        }
    }

    /// Mirrors `data` into the dump file, truncated to the remaining
    /// budget.
    pub(crate) fn write(&mut self, data: &[u8]) {
        if self.remaining == 0 {
            return;
        }
        let n = data.len().min(self.remaining);
        match self.file.write_all(&data[..n]) {
            Ok(()) => self.remaining -= n,
            Err(e) => {
                log::warn!("pcm dump: write failed: {e}");
                self.remaining = 0;
            }
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.remaining == 0
    }
}
