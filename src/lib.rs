//! Managed processes: the library
//!
//! Starts an external program, keeps a rolling window of its console output,
//! and offers blocking waits on exit, elapsed time, or output content. A
//! [`ManagedProcess`] that is still running when you are done with it gets
//! destroyed, so the child never outlives its supervisor.
//!
//! ```no_run
//! # use std::time::Duration;
//! use managed_process::ManagedProcessBuilder;
//!
//! let process = ManagedProcessBuilder::new("mysqld")
//!     .arg("--console")
//!     .console_buffer_max_lines(50_usize)
//!     .build()?;
//!
//! process.start()?;
//! process.wait_for_pattern_timeout("ready for connections", Duration::from_secs(30))?;
//! // ... use the server ...
//! process.destroy()?;
//! println!("{}", process.console());
//! # Ok::<(), managed_process::error::Error>(())
//! ```
//!
//! # Threads
//!
//! Starting a process spawns three helper threads: one pump per output stream
//! and one exit monitor. Waiting never polls: waiters sleep on condition
//! variables that the pumps and the monitor signal. The monitor itself checks
//! the OS handle at a short interval, as the standard library has no exit
//! callback.

#![deny(unsafe_code)]
#![warn(
    deprecated,
    rust_2018_idioms,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    missing_docs
)]
#![allow(
    clippy::default_trait_access,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate log;

pub mod config;
pub mod console;
pub mod error;
pub mod pattern;
pub mod platform;
pub mod process;
mod pump;
pub mod signal;

pub use config::{ManagedProcessBuilder, ProcessConfig};
pub use console::{ConsoleBuffer, ConsoleSink, Stream};
pub use error::{Error, Result};
pub use platform::Platform;
pub use process::{ManagedProcess, ProcessState};
