//! Infrastructure layer: ledger storage backends, issuer directory, and the
//! cancellation/correction pipeline.

pub mod directory;
pub mod service;
pub mod store;
