//! Refresh generation watermark
//!
//! # Purpose
//!
//! A refresh awaits local and remote IO. If the account is cleared or the
//! identity changes while it is suspended, whatever it fetched belongs to a
//! world that no longer exists. Each refresh takes a [`GenerationTicket`]
//! before its first await; results are applied only if the ticket is still
//! current.
//!
//! # Invariants
//!
//! - **Monotonic**: the generation only moves forward.
//! - **Issue does not invalidate**: taking a ticket never supersedes another
//!   ticket of the same generation.
//! - **Advance invalidates**: after [`RefreshGeneration::advance`], every
//!   previously issued ticket is stale.

/// Opaque token identifying the generation a refresh started in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenerationTicket(u64);

impl GenerationTicket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Monotonically increasing generation counter.
#[derive(Clone, Debug, Default)]
pub struct RefreshGeneration {
    current: u64,
}

impl RefreshGeneration {
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Ticket for the current generation.
    pub fn issue(&self) -> GenerationTicket {
        GenerationTicket(self.current)
    }

    /// Invalidate all outstanding tickets. Returns the new generation.
    pub fn advance(&mut self) -> u64 {
        self.current = self.current.saturating_add(1);
        self.current
    }

    /// `true` if results produced under `ticket` may still be applied.
    pub fn is_current(&self, ticket: GenerationTicket) -> bool {
        ticket.0 == self.current
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}
