//! # Domain Services
//!
//! Pure rules that do not belong to a single entity.
//!
//! - **delivery_rules**: forward-only receipt transition logic

pub mod delivery_rules;

pub use delivery_rules::{advance, Advance};
