use crate::constants::FTP_DATA_PORT;
use log::warn;
use std::net::SocketAddr;

/// Checks the data peer against the control peer.
///
/// A foreign address fails only with `verify_address`, a source port other
/// than 20 only with `verify_port`. Only IPv4 peers are compared.
pub fn data_peer_ok(
    data: &SocketAddr,
    control: &SocketAddr,
    verify_address: bool,
    verify_port: bool,
) -> bool {
    match (data, control) {
        (SocketAddr::V4(d), SocketAddr::V4(c)) => {
            if d.ip() != c.ip() {
                if verify_address {
                    warn!("**** Data connection peer has mismatching address");
                    return false;
                }
                return true;
            }
            if d.port() != FTP_DATA_PORT && verify_port {
                warn!("**** Data connection peer has wrong port number");
                return false;
            }
            true
        }
        (SocketAddr::V6(_), SocketAddr::V6(_)) => true,
        _ => false,
    }
}
