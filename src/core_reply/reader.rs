use std::io::{self, Read};

/// One line taken off the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub text: String,
    /// Reply code, 0 for a continuation line without one.
    pub code: u16,
    /// True when this line completes a reply and should be checked.
    pub complete: bool,
    /// Banner and login replies are logged louder than the rest.
    pub banner: bool,
}

/// Splits the control stream into reply lines and tracks multi-line blocks.
#[derive(Debug, Default)]
pub struct ReplyReader {
    buf: Vec<u8>,
    multiline_code: u16,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads whatever is available. `Ok(0)` means the peer closed.
    ///
    /// NUL bytes are replaced by `!` so reply text stays printable.
    pub fn fill<R: Read>(&mut self, r: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; 1024];
        let n = r.read(&mut chunk)?;
        self.buf
            .extend(chunk[..n].iter().map(|&b| if b == 0 { b'!' } else { b }));
        Ok(n)
    }

    /// Bytes received but not yet split into lines.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.multiline_code = 0;
    }

    pub fn next_line(&mut self) -> Option<ReplyLine> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut raw: Vec<u8> = self.buf.drain(..=nl).collect();
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let text = String::from_utf8_lossy(&raw).into_owned();
        let code = reply_code(&text);
        let banner = matches!(code, 220 | 230)
            || (code == 0 && matches!(self.multiline_code, 220 | 230));

        let complete = if code == 0 {
            false
        } else if text.as_bytes().get(3) == Some(&b'-') {
            if self.multiline_code == 0 {
                self.multiline_code = code;
            }
            false
        } else if self.multiline_code != 0 {
            // a block only ends on the code it was opened with
            if self.multiline_code == code {
                self.multiline_code = 0;
                true
            } else {
                false
            }
        } else {
            true
        };

        Some(ReplyLine {
            text,
            code,
            complete,
            banner,
        })
    }
}

/// Leading (up to three) digits of a line of at least three characters.
fn reply_code(line: &str) -> u16 {
    let b = line.as_bytes();
    if b.len() < 3 || !b[0].is_ascii_digit() {
        return 0;
    }
    b[..3]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .fold(0u16, |acc, c| acc * 10 + u16::from(c - b'0'))
}
