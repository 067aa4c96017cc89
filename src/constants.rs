// src/constants.rs

pub const FTP_PORT: u16 = 21;
pub const FTP_DATA_PORT: u16 = 20;
pub const FTP_USER: &str = "anonymous";

// Reply codes the engine arms expectations for.
pub const RESP_READY: u16 = 220;
pub const RESP_PASS_REQ: u16 = 331;
pub const RESP_LOGGED_IN: u16 = 230;
pub const RESP_CWD_RMD_DELE_OK: u16 = 250;
pub const RESP_TYPE_OK: u16 = 200;
pub const RESP_PORT_OK: u16 = 200;
pub const RESP_REST_OK: u16 = 350;
pub const RESP_TRANSFER_OK: u16 = 226;
pub const RESP_RESULT_HERE: u16 = 213;
pub const RESP_PWD_MKD_OK: u16 = 257;
pub const RESP_PASV_OK: u16 = 227;
pub const RESP_RNFR_OK: u16 = 350;
pub const RESP_ABOR_OK: u16 = 226;
pub const RESP_TRANSFER_START: u16 = 150;
pub const RESP_SERVICE_CLOSING: u16 = 421;
pub const RESP_BROKEN_PIPE: u16 = 426;
pub const RESP_NOT_UNDERSTOOD: u16 = 500;
pub const RESP_NOT_IMPLEMENTED: u16 = 502;
pub const RESP_LOGIN_FAILED: u16 = 530;
pub const RESP_NO_FILE: u16 = 550;

// Telnet out-of-band sequence sent ahead of ABOR.
pub const TELNET_IAC: u8 = 255;
pub const TELNET_IP: u8 = 244;
pub const TELNET_SYNCH: u8 = 242;

/// Token count reported by an unlimited rate limiter.
pub const RATE_UNLIMITED: u64 = 0x1000_0000;

pub const MIN_NOP_INTERVAL: u64 = 30;
pub const LOOKUP_ERROR_TEXT: &str = "Host name lookup failure";
pub const MAX_RETRIES_TEXT: &str = "max-retries exceeded";
