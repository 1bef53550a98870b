use std::io::Write;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::trace;

use super::FaultInjector;
use super::PartitionEntry;
use super::PartitionOp;
use crate::PartitionConfig;
use crate::PartitionError;
use crate::Result;
use crate::SetupError;

/// Client of the fault-injection daemon.
///
/// Every request opens a fresh connection, writes
/// `"<operation> <sourcePort> <destPort>\n"` and closes; the daemon sends no
/// response.
pub struct TcpFaultInjector {
    config: PartitionConfig,
    verified: AtomicBool,
}

impl TcpFaultInjector {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            config,
            verified: AtomicBool::new(false),
        }
    }

    pub(crate) fn request_line(
        op: PartitionOp,
        entry: PartitionEntry,
    ) -> String {
        format!("{} {} {}\n", op, entry.source, entry.dest)
    }

    fn check_platform() -> Result<()> {
        if cfg!(target_os = "macos") {
            return Err(SetupError::UnsupportedPlatform("macOS").into());
        }
        Ok(())
    }

    /// Looks for the daemon in the process table
    fn check_daemon_running(&self) -> Result<()> {
        let output = Command::new("ps")
            .args(["-A", "-www", "-o", "command"])
            .output()?;
        let listing = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(SetupError::ProcessListing {
                code: output.status.code(),
                output: format!("{}{}", listing, String::from_utf8_lossy(&output.stderr)),
            }
            .into());
        }

        if !listing.contains(self.config.daemon_process_name.as_str()) {
            return Err(SetupError::DaemonNotRunning {
                name: self.config.daemon_process_name.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn connect(&self) -> std::io::Result<TcpStream> {
        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} did not resolve", self.config.daemon_host),
        );
        for addr in (self.config.daemon_host.as_str(), self.config.daemon_port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl FaultInjector for TcpFaultInjector {
    fn ensure_available(&self) -> Result<()> {
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }

        Self::check_platform()?;
        if self.config.verify_daemon_process {
            self.check_daemon_running()?;
        }

        debug!(
            "partition daemon available at {}:{}",
            self.config.daemon_host, self.config.daemon_port
        );
        self.verified.store(true, Ordering::Release);
        Ok(())
    }

    fn send(
        &self,
        op: PartitionOp,
        entry: PartitionEntry,
    ) -> Result<()> {
        self.ensure_available()?;

        let line = Self::request_line(op, entry);
        let send_err = |source| PartitionError::Send {
            op: op.as_str(),
            source_port: entry.source,
            dest_port: entry.dest,
            source,
        };

        let mut stream = self.connect().map_err(send_err)?;
        stream.write_all(line.as_bytes()).map_err(send_err)?;
        let _ = stream.shutdown(Shutdown::Both);

        trace!("sent {:?} to partition daemon", line.trim_end());
        Ok(())
    }
}
