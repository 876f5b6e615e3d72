//! Port Definitions
//!
//! The bar source is an external collaborator from the server's point of
//! view: an ordered, finite sequence of bars already resampled to the
//! canonical interval. Loading and resampling live in `infrastructure::data`.

use crate::domain::market::{Bar, BarSeries};

/// An ordered, finite sequence of bars consumed by the emulator server.
pub trait BarSource: Send + Sync {
    /// All bars in timestamp order.
    fn bars(&self) -> &[Bar];

    /// Number of bars available.
    fn len(&self) -> usize {
        self.bars().len()
    }

    /// Whether the source has no bars.
    fn is_empty(&self) -> bool {
        self.bars().is_empty()
    }
}

impl BarSource for BarSeries {
    fn bars(&self) -> &[Bar] {
        Self::bars(self)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn is_empty(&self) -> bool {
        Self::is_empty(self)
    }
}
