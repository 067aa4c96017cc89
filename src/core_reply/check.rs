/// How a reply to one command is interpreted.
///
/// Every variant carries only what its interpretation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Plain class comparison against the expected code.
    None,
    /// Any reply is fine (NOOP, the MKD parents of `mkdir -p`, QUOTE).
    Ignore,
    /// Server greeting.
    Ready,
    Rest,
    /// Explicit directory change requested by the caller.
    Cwd,
    /// Directory change back to the session's current directory.
    CwdCurrent,
    /// A directory change that was in flight when the operation was closed.
    CwdStale,
    Abor,
    /// SIZE for entry `index` of an info array.
    Size { index: usize },
    /// SIZE probe for the file being opened.
    SizeOpt,
    Mdtm { index: usize },
    MdtmOpt,
    /// Commands whose 5xx means "no such file".
    FileAccess,
    Pasv,
    Pwd,
    /// RNFR; on success RNTO `to` is sent.
    Rnfr { to: String },
    UserProxy,
    User,
    PassProxy,
    Pass,
    /// Completion of RETR/STOR/LIST/NLST.
    Transfer,
}

impl Check {
    /// Directory changes that update the confirmed working directory.
    pub fn is_cwd(&self) -> bool {
        matches!(self, Check::Cwd | Check::CwdCurrent)
    }
}
