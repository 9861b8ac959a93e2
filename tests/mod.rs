//! Test suite for QMS Sync
//!
//! This module organizes all tests

pub mod integration;
