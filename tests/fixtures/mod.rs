//! Test Fixtures Module
//!
//! This module provides test fixtures for interview engine testing:
//! - Audio fixtures (programmatically generated)
//! - Relay message fixtures

// Allow dead code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]

pub mod audio_fixtures;

pub use audio_fixtures::*;
