//! # portablerpc-transport
//!
//! Concrete [`Transport`](portablerpc_core::Transport) implementations:
//!
//! - [`MemoryTransport`]: two linked in-process endpoints over bounded
//!   channels, for tests and same-process workers
//! - [`LinesTransport`]: newline-delimited JSON over any async byte stream

#![deny(unsafe_code)]

pub mod lines;
pub mod memory;

pub use lines::LinesTransport;
pub use memory::MemoryTransport;
