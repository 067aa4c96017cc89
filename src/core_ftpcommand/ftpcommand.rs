use crate::core_network::port::format_port_argument;
use std::fmt;
use std::net::SocketAddrV4;

/// Representation type selected with TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Ascii,
    Image,
}

impl TransferType {
    pub fn code(self) -> char {
        match self {
            TransferType::Ascii => 'A',
            TransferType::Image => 'I',
        }
    }
}

/// A command the client sends on the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    User(String),
    Pass(String),
    Pwd,
    Cwd(String),
    Type(TransferType),
    Size(String),
    Mdtm(String),
    Pasv,
    Port(SocketAddrV4),
    Rest(u64),
    Retr(String),
    Stor(String),
    List(Option<String>),
    Nlst(Option<String>),
    Mkd(String),
    Rmd(String),
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Noop,
    Abor,
    Quit,
    /// Sent verbatim (QUOTE).
    Raw(String),
}

impl FtpCommand {
    pub fn verb(&self) -> &str {
        match self {
            FtpCommand::User(_) => "USER",
            FtpCommand::Pass(_) => "PASS",
            FtpCommand::Pwd => "PWD",
            FtpCommand::Cwd(_) => "CWD",
            FtpCommand::Type(_) => "TYPE",
            FtpCommand::Size(_) => "SIZE",
            FtpCommand::Mdtm(_) => "MDTM",
            FtpCommand::Pasv => "PASV",
            FtpCommand::Port(_) => "PORT",
            FtpCommand::Rest(_) => "REST",
            FtpCommand::Retr(_) => "RETR",
            FtpCommand::Stor(_) => "STOR",
            FtpCommand::List(_) => "LIST",
            FtpCommand::Nlst(_) => "NLST",
            FtpCommand::Mkd(_) => "MKD",
            FtpCommand::Rmd(_) => "RMD",
            FtpCommand::Dele(_) => "DELE",
            FtpCommand::Rnfr(_) => "RNFR",
            FtpCommand::Rnto(_) => "RNTO",
            FtpCommand::Noop => "NOOP",
            FtpCommand::Abor => "ABOR",
            FtpCommand::Quit => "QUIT",
            FtpCommand::Raw(line) => line.split_whitespace().next().unwrap_or(""),
        }
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpCommand::User(arg)
            | FtpCommand::Pass(arg)
            | FtpCommand::Cwd(arg)
            | FtpCommand::Size(arg)
            | FtpCommand::Mdtm(arg)
            | FtpCommand::Retr(arg)
            | FtpCommand::Stor(arg)
            | FtpCommand::Mkd(arg)
            | FtpCommand::Rmd(arg)
            | FtpCommand::Dele(arg)
            | FtpCommand::Rnfr(arg)
            | FtpCommand::Rnto(arg) => write!(f, "{} {}", self.verb(), arg),
            FtpCommand::Type(t) => write!(f, "TYPE {}", t.code()),
            FtpCommand::Port(addr) => write!(f, "PORT {}", format_port_argument(addr)),
            FtpCommand::Rest(pos) => write!(f, "REST {}", pos),
            FtpCommand::List(Some(arg)) | FtpCommand::Nlst(Some(arg)) if !arg.is_empty() => {
                write!(f, "{} {}", self.verb(), arg)
            }
            FtpCommand::Raw(line) => f.write_str(line),
            _ => f.write_str(self.verb()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_wire_text() {
        assert_eq!(FtpCommand::User("ftp".into()).to_string(), "USER ftp");
        assert_eq!(FtpCommand::Type(TransferType::Image).to_string(), "TYPE I");
        assert_eq!(FtpCommand::Rest(1024).to_string(), "REST 1024");
        assert_eq!(FtpCommand::List(None).to_string(), "LIST");
        assert_eq!(FtpCommand::Nlst(Some(String::new())).to_string(), "NLST");
        assert_eq!(FtpCommand::Nlst(Some("*.txt".into())).to_string(), "NLST *.txt");
        assert_eq!(FtpCommand::Raw("SITE CHMOD 644 f".into()).verb(), "SITE");
        let port = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5001);
        assert_eq!(FtpCommand::Port(port).to_string(), "PORT 10,0,0,1,19,137");
    }
}
