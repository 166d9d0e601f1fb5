//! # echoes-core
//!
//! Shared primitives for the echoes deployment orchestrator.
//!
//! This crate provides the foundational types used by every other echoes crate:
//!
//! - **Identifiers**: Strongly-typed, sortable run identifiers
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization, span helpers, and secret redaction
//!
//! ## Example
//!
//! ```rust
//! use echoes_core::prelude::*;
//!
//! let run_id = RunId::generate();
//! let password = Redacted::new("hunter2".to_string());
//! assert_eq!(format!("{password:?}"), "[REDACTED]");
//! # let _ = run_id;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::RunId;
    pub use crate::observability::{LogFormat, Redacted, init_logging};
}

pub use error::{Error, Result};
pub use id::RunId;
pub use observability::{LogFormat, Redacted, init_logging};
