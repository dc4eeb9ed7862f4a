//! Application services layer.
//!
//! This module contains the business logic services that orchestrate
//! between the API layer and infrastructure (provider/, store/).

pub mod matching;
pub mod queue_service;
pub mod reconciler;
pub mod vote_manager;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use queue_service::{AddOutcome, QueueError, QueueService, Requester, SkipOutcome};
pub use reconciler::{QueueReconciler, ReconcileError, ReconcilerConfig};
pub use vote_manager::{
    Ballot, BanVoteRequest, VoteConfig, VoteError, VoteManager, VoteOutcome, VoteSummary,
};
