use std::net::{Ipv4Addr, SocketAddrV4};

/// Extracts the data address from a 227 reply.
///
/// The six numbers are searched from the first digit after the reply code
/// (RFC 1123 asks clients to scan, the text around them varies). Servers
/// behind NAT sometimes announce 0.0.0.0; the control peer is used then.
pub fn parse_pasv_reply(line: &str, control_ip: Ipv4Addr) -> Option<SocketAddrV4> {
    if line.len() <= 4 {
        return None;
    }
    let bytes = line.as_bytes();
    let (a, p) = (4..bytes.len())
        .filter(|&i| bytes[i].is_ascii_digit())
        .find_map(|i| six_numbers(&line[i..]))?;

    let ip = if a == [0, 0, 0, 0] {
        control_ip
    } else {
        Ipv4Addr::from(a)
    };
    Some(SocketAddrV4::new(ip, u16::from_be_bytes(p)))
}

fn six_numbers(s: &str) -> Option<([u8; 4], [u8; 2])> {
    let mut nums = [0u8; 6];
    let mut rest = s;
    for (i, slot) in nums.iter_mut().enumerate() {
        if i > 0 {
            rest = rest.strip_prefix(',')?;
        }
        let trimmed = rest.trim_start();
        let len = trimmed.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        *slot = trimmed[..len].parse().ok()?;
        rest = &trimmed[len..];
    }
    Some(([nums[0], nums[1], nums[2], nums[3]], [nums[4], nums[5]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 7);

    #[test]
    fn test_standard_reply() {
        let addr = parse_pasv_reply("227 Entering Passive Mode (10,1,2,3,4,5).", PEER).unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 4 * 256 + 5));
    }

    #[test]
    fn test_zero_address_uses_control_peer() {
        let addr = parse_pasv_reply("227 Entering Passive Mode (0,0,0,0,200,13)", PEER).unwrap();
        assert_eq!(addr, SocketAddrV4::new(PEER, 200 * 256 + 13));
    }

    #[test]
    fn test_numbers_without_parentheses() {
        let addr = parse_pasv_reply("227 =127,0,0,1,31,64", PEER).unwrap();
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn test_scan_skips_unrelated_digits() {
        // "227" itself is never considered, and "2 of" does not parse
        let addr = parse_pasv_reply("227 Mode 2 of 3 (127,0,0,1,0,21)", PEER).unwrap();
        assert_eq!(addr.port(), 21);
    }

    #[test]
    fn test_garbage() {
        assert_eq!(parse_pasv_reply("227 ", PEER), None);
        assert_eq!(parse_pasv_reply("227 Entering Passive Mode", PEER), None);
        assert_eq!(parse_pasv_reply("227 (1,2,3,4,5)", PEER), None);
        assert_eq!(parse_pasv_reply("227 (1,2,3,999,5,6)", PEER), None);
    }
}
