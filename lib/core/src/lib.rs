//! Core domain types and utilities for the billhound platform.
//!
//! This crate provides the foundational types, error handling, and shared
//! utilities used throughout the billhound quote/invoice platform.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ClientId, FollowUpEventId, FollowUpId, InvoiceId, ParseIdError, QuoteId};
