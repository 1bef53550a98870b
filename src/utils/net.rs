use std::net::Ipv4Addr;
use std::net::TcpListener;

use crate::Result;

/// Asks the OS for a currently unused loopback port.
///
/// The listener is dropped before returning, so the port is only *likely* to
/// stay free until the caller binds it.
pub fn get_available_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// `host:port` as accepted by `--join`
pub(crate) fn join_address(
    host: &str,
    port: u16,
) -> String {
    format!("{host}:{port}")
}
