//! # riskledger-cli
//!
//! Command-line interface for the riskledger governor.
//!
//! ## Commands
//!
//! - `riskledger charge`: Charge a profile's buckets and print the verdict
//! - `riskledger band`: Show the live band of one bucket
//! - `riskledger audit`: Show audit records
//! - `riskledger reset` / `extend`: Administrative bucket operations
//! - `riskledger profiles` / `config` / `set` / `init`: Inspect and edit configuration
//! - `riskledger doctor`: Check configuration, store and channels

pub mod commands;

pub use commands::Cli;
