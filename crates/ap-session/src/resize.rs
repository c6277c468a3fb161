use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::shell::{ShellProcess, TermSize};

/// A `{cols, rows}` notification from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Applied(TermSize),
    /// Already at the requested size.
    Unchanged,
    /// A zero dimension; the PTY is left alone.
    Rejected,
    /// The platform refused the resize. Logged, never an error.
    Failed,
}

/// Applies client geometry changes to a shell's PTY.
///
/// Clients fire resizes in bursts while a layout settles, and some PTY
/// backends cannot resize at all, so every failure degrades to a log line.
#[derive(Debug, Clone)]
pub struct ResizeChannel {
    process: Arc<ShellProcess>,
}

impl ResizeChannel {
    pub fn new(process: Arc<ShellProcess>) -> Self {
        Self { process }
    }

    pub fn apply(&self, req: ResizeRequest) -> ResizeOutcome {
        if req.cols == 0 || req.rows == 0 {
            debug!(session = %self.process.id(), ?req, "ignoring zero-sized resize");
            return ResizeOutcome::Rejected;
        }
        let target = TermSize::new(req.cols, req.rows);
        if self.process.size() == target {
            return ResizeOutcome::Unchanged;
        }
        match self.process.try_resize(req.cols, req.rows) {
            Ok(()) => ResizeOutcome::Applied(target),
            Err(e) => {
                warn!(session = %self.process.id(), ?req, "resize ignored: {e}");
                ResizeOutcome::Failed
            }
        }
    }
}
