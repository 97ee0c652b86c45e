#![no_std]

// Shared logic for the tracker feature set.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod checksum;
pub mod clock;
pub mod interval;
pub mod io;
pub mod log;
pub mod orchestrator;
pub mod sleep;
