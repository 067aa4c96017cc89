use chrono::{DateTime, NaiveDateTime, Utc};
use std::env;

/// Anonymous password in the traditional `-login@` form.
pub fn default_anon_pass() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| String::from("unknown"));
    format!("-{}@", user)
}

/// Replaces a leading `~` (alone or followed by `/`) with `home`.
pub fn expand_tilde(path: &str, home: &str) -> Option<String> {
    let rest = path.strip_prefix('~')?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    if rest.is_empty() {
        return Some(home.to_string());
    }
    if home.ends_with('/') {
        Some(format!("{}{}", home, &rest[1..]))
    } else {
        Some(format!("{}{}", home, rest))
    }
}

/// `/x`, or `C:/x` on servers that answered PWD with a drive letter.
pub fn is_absolute_path(path: &str, dosish: bool) -> bool {
    let b = path.as_bytes();
    if b.first() == Some(&b'/') {
        return true;
    }
    dosish && b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'/'
}

/// Argument for CWD: relative `./rest` when `target` lies below `real_cwd`.
pub fn cwd_argument(target: &str, real_cwd: Option<&str>) -> String {
    if let Some(real) = real_cwd {
        if let Some(rest) = target.strip_prefix(real) {
            if !real.is_empty() && rest.starts_with('/') {
                return format!(".{}", rest);
            }
        }
    }
    target.to_string()
}

/// `name` relative to `dir`, unless `name` is already rooted.
pub fn join_path(dir: &str, name: &str, dosish: bool) -> String {
    if name.is_empty() {
        return dir.to_string();
    }
    if is_absolute_path(name, dosish) || name.starts_with('~') || dir.is_empty() {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Every proper parent of `path` ("a/b/c" gives "a", "a/b").
///
/// A leading slash does not produce an empty segment.
pub fn parent_dirs(path: &str) -> Vec<String> {
    path.char_indices()
        .filter(|&(i, c)| c == '/' && i > 0)
        .map(|(i, _)| path[..i].to_string())
        .collect()
}

/// Directory quoted in a `257 "dir" ...` reply.
///
/// Returns the directory with back-slashes normalised when the server looks
/// DOS-like, and whether a drive letter was seen.
pub fn extract_pwd(line: &str) -> (String, bool) {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.trim_start();
    let Some(quoted) = rest.strip_prefix('"') else {
        return (String::new(), false);
    };
    let Some(end) = quoted.find('"') else {
        return (String::new(), false);
    };
    let mut pwd = quoted[..end].to_string();
    if pwd.is_empty() {
        return (pwd, false);
    }

    let b = pwd.as_bytes();
    let dosish = b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':';
    if !pwd.contains('/') || dosish {
        pwd = pwd.replace('\\', "/");
    }
    (pwd, dosish)
}

/// Parses an MDTM `YYYYMMDDhhmmss` stamp (UTC); trailing text is ignored.
pub fn convert_ftp_date(s: &str) -> Option<DateTime<Utc>> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 14 {
        return None;
    }
    NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Leading decimal number of `s`, like `atol`.
pub fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
