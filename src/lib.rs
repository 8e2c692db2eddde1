//! # stm32-iap-core
//!
//! Core logic for a CAN-bus in-application-programming bootloader: receives
//! a new application image over CAN, stages it into flash page by page with
//! a CRC check per page, and commits it via a small marker page that the
//! resident bootloader consults on the next reset.
//!
//! This crate is the hardware-independent core. It talks to the flash
//! controller and the CAN peripheral through the [`flash::FlashBackend`]
//! and [`transport::CanController`] traits; something else (an application
//! crate, or the `hardware` feature's built-in backends) supplies the
//! concrete peripherals and drives [`protocol::ProtocolEngine::handle_frame`]
//! from a CAN receive interrupt.
#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod crc;
pub mod fault;
pub mod flash;
pub mod handoff;
pub mod markers;
pub mod memmap;
pub mod protocol;
pub mod service;
pub mod transport;

#[cfg(feature = "hardware")]
pub use cortex_m_rt::entry;

pub use boot::{BootDecider, BootDecision};
pub use fault::{FaultHandler, FaultReason};
pub use flash::{FlashBackend, FlashError};
pub use handoff::{FactoryRomJumper, ImageJumper};
pub use protocol::{Action, ProtocolEngine, Session, StatusCode};
pub use service::FlashService;
pub use transport::{CanController, Frame, Transport};
