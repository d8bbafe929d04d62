//! # Upgrade boot entry management
//!
//! This crate manages the temporary bootloader entry through which a system
//! boots into its in-place upgrade environment, along with a couple of
//! related checks and fixups performed before the upgrade starts.

mod arch;
mod bootentry;
pub mod cli;
mod config;
mod error;
mod facts;
mod grubconfig;
mod quagga;
pub mod report;
mod runner;
