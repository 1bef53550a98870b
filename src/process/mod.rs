//! Supervision of server and proxy processes.
//!
//! A [`Process`] owns one OS process group. Its identity (ports, name, uuid)
//! is scraped from the log file the process writes, see [`log_line`].
mod console;
mod layout;
mod log_line;
mod log_tailer;
mod process;
mod variant;
pub use console::*;
pub use log_line::*;
pub use log_tailer::*;
pub use process::*;
pub use variant::*;
