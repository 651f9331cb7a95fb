//! # Service Layer
//!
//! Async runtime glue around the synchronous engine.

pub mod event_loop;
