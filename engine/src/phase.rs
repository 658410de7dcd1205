//! Per-pair pipeline phases.

/// Lifecycle of one pair's resolution pipeline.
///
/// A pipeline that resolves on the primary attempt goes straight from
/// `PrimaryEvaluated` to `Done`; one that falls back passes through the
/// fallback phases first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPhase {
    /// Pipeline created, nothing bound yet.
    Pending,
    /// Rule bound and the dependency set collected.
    DependenciesCollected,
    /// Exchange queries in flight for the primary attempt.
    ExchangesQuerying,
    /// Primary formula evaluated.
    PrimaryEvaluated,
    /// Exchange queries in flight for the fallback attempt.
    FallbackQuerying,
    /// Fallback formula evaluated.
    FallbackEvaluated,
    /// Result produced.
    Done,
}

impl FetchPhase {
    /// Check if this is the terminal phase.
    pub fn is_final(&self) -> bool {
        matches!(self, FetchPhase::Done)
    }

    /// Check if the pipeline is still running.
    pub fn is_in_progress(&self) -> bool {
        !self.is_final()
    }

    /// Get valid next phases from the current phase.
    pub fn valid_transitions(&self) -> &[FetchPhase] {
        match self {
            FetchPhase::Pending => &[FetchPhase::DependenciesCollected],
            FetchPhase::DependenciesCollected => &[FetchPhase::ExchangesQuerying],
            FetchPhase::ExchangesQuerying => &[FetchPhase::PrimaryEvaluated],
            FetchPhase::PrimaryEvaluated => &[FetchPhase::Done, FetchPhase::FallbackQuerying],
            FetchPhase::FallbackQuerying => &[FetchPhase::FallbackEvaluated],
            FetchPhase::FallbackEvaluated => &[FetchPhase::Done],
            FetchPhase::Done => &[],
        }
    }

    /// Check if advancing to the given phase is valid.
    pub fn can_advance_to(&self, next: FetchPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}
