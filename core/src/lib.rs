pub mod bigint;
pub mod chain;
pub mod error;
pub mod ledger;
pub mod operation;

pub use alloy;
