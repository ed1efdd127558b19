//! Errors reported by the collector's driver-facing operations


use thiserror::Error;


#[derive(Debug, Error)]
pub enum CollectorError {
    /// Objects were still tracked after the allowed number of passes, either because handles to
    /// them are still alive or because every sample of their counts was inconclusive.
    /// `freed` counts the objects the passes did reclaim before giving up.
    #[error("{remaining} objects still tracked after {passes} collection passes ({freed} freed)")]
    Undrained {
        remaining: usize,
        passes: usize,
        freed: usize,
    },

    #[error("the collector thread panicked")]
    ThreadPanicked,
}
