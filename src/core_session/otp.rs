// One-time password (S/Key, OPIE) responses, MD5 flavour of RFC 2289
use log::trace;
use md5::{Digest, Md5};

const CHALLENGE_HEADS: [&str; 4] = ["S/Key MD5 ", "s/key ", "opiekey ", "otp-md5 "];

/// Builds the PASS argument for an OTP challenge found in `reply`.
///
/// The challenge reads `<head><sequence> <seed>`; `None` when there is no
/// usable challenge.
pub fn make_skey_reply(reply: &str, pass: &str) -> Option<String> {
    let rest = CHALLENGE_HEADS
        .iter()
        .find_map(|head| reply.find(head).map(|at| &reply[at + head.len()..]))?;
    trace!("---- found s/key substring");

    let mut words = rest.split_whitespace();
    let seq: u32 = words.next()?.parse().ok()?;
    let seed = words.next()?;
    if seq < 1 {
        return None;
    }
    Some(to_hex(&otp_md5(seq, seed, pass)))
}

/// RFC 2289 MD5 generator: hash seed+secret, fold to 64 bits, then hash
/// the folded value `seq` more times.
pub fn otp_md5(seq: u32, seed: &str, secret: &str) -> [u8; 8] {
    let mut key = seed.to_ascii_lowercase();
    key.push_str(secret);
    let mut folded = fold(&Md5::digest(key.as_bytes()));
    for _ in 0..seq {
        folded = fold(&Md5::digest(folded));
    }
    folded
}

fn fold(digest: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, b) in out.iter_mut().enumerate() {
        *b = digest[i] ^ digest[i + 8];
    }
    out
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
