//! Core types for the rowsync shared-state table.
//!
//! This crate provides the foundational types used throughout the table
//! implementation:
//!
//! - **Identifiers**: [`ParticipantId`], the stable identity of a table member
//! - **Membership**: the ordered participant list that defines row order
//! - **Region**: [`SharedBytes`], the atomic byte arena backing table rows
//! - **Fingerprint**: [`SchemaFingerprint`], a digest of the row layout
//!   exchanged at rendezvous time to fail fast on mismatched declarations
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod fingerprint;
mod identifiers;
mod membership;
mod region;

pub use fingerprint::SchemaFingerprint;
pub use identifiers::ParticipantId;
pub use membership::{Membership, MembershipError};
pub use region::SharedBytes;
