//! Tests for the expression language
//!
//! Organized by pipeline stage

mod helpers;
