//! Core engine: snapshot, reconcile, submit.
//!
//! [`cycle::CycleRunner`] drives one pass over all groups; each group is
//! handled by the [`manager::CollectionManager`] for its protocol, which
//! uses the reconciliation logic in [`bids`] and [`listings`].

pub mod bids;
pub mod cycle;
pub mod listings;
pub mod manager;
pub mod snapshot;
