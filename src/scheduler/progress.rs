//! One-character-per-tick progress line for the terminal.

use std::io::Write;

/// Prints `✓`/`✗` per tick and wraps after `width` columns.
pub struct ProgressBar<W: Write> {
    out: W,
    width: usize,
    columns: usize,
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width: width.max(1),
            columns: 0,
        }
    }

    pub fn record(&mut self, success: bool) {
        let mark = if success { "✓" } else { "✗" };
        // Terminal output is best effort.
        let _ = self.out.write_all(mark.as_bytes());
        self.columns += 1;
        if self.columns == self.width {
            let _ = self.out.write_all(b"\n");
            self.columns = 0;
        }
        let _ = self.out.flush();
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
