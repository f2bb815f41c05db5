//! Application layer use cases.

/// Opening, driving and closing an acquisition session.
pub mod acquire;
