//! Test fixtures for shelter-router.
//!
//! Provides realistic test data including:
//! - Real Osaka locations (from OpenStreetMap)
//! - Builders for synthetic building clouds around a location

pub mod osaka_locations;

pub use osaka_locations::*;
