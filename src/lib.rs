//! Flash driver and direct-memory debug-port backend for the MSPM0 L- and
//! G-class Cortex-M0+ microcontrollers.
//!
//! [`flash::FlashCore`] identifies a connected part from its on-die identity
//! registers and drives the memory-mapped flash-control engine to erase,
//! program and write-protect sectors. [`dap::DmemDap`] is a debug-port
//! backend that accesses memory-mapped Access Ports directly instead of
//! exchanging SWD/JTAG packets, with a compatibility mode that emulates an
//! AP's register semantics against a separate memory window.
//!
//! Both components depend only on the capability traits in [`framework`];
//! the containing debug-adapter host, its command dispatch, target
//! halt/resume, and OS-level device access are all external collaborators.

pub mod dap;
pub mod flash;
pub mod framework;
