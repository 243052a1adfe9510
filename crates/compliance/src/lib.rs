//! `fiscalchain-compliance` — the scheme handler capability.
//!
//! Each tax-compliance scheme plugs in as a [`ComplianceHandler`]; the
//! ledger resolves handlers through an explicit [`HandlerRegistry`] keyed
//! on scheme id.

pub mod digest;
pub mod handler;
pub mod registry;

pub use digest::DigestChainHandler;
pub use handler::{CancellationContext, ComplianceError, ComplianceHandler, DocumentContext};
pub use registry::HandlerRegistry;
