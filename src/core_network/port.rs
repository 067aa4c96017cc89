use std::net::SocketAddrV4;

/// PORT argument: four address octets then the port, high byte first.
pub fn format_port_argument(addr: &SocketAddrV4) -> String {
    let a = addr.ip().octets();
    let p = addr.port().to_be_bytes();
    format!("{},{},{},{},{},{}", a[0], a[1], a[2], a[3], p[0], p[1])
}
