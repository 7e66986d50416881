use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use super::messages::BlockNotice;
use crate::surface::Surface;

/// Terminal access block. Once blocked, a session stays blocked.
#[derive(Debug, Default)]
pub(crate) struct AccessGate {
    blocked: AtomicBool,
}

impl AccessGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks the session. Only the first call renders the notice and
    /// disables interaction; returns whether this call did so.
    pub(crate) fn block(&self, surface: &dyn Surface, notice: impl FnOnce() -> BlockNotice) -> bool {
        if self
            .blocked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let notice = notice();
        error!(
            session_id = %notice.session_id,
            domain = %notice.domain,
            violations = notice.violation_count,
            "Access blocked"
        );

        surface.replace_with_block_notice(&notice);
        surface.swallow_interaction();

        true
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }
}
