use crate::core_reply::check::Check;
use crate::core_session::state::State;
use std::collections::VecDeque;

/// A command sent and still waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub expect: u16,
    pub fail_state: State,
    pub check: Check,
    /// Append reply lines to the session's result buffer.
    pub log_resp: bool,
    /// Directory a CWD was sent for.
    pub path: Option<String>,
}

/// Replies come back in command order, so a FIFO is all that is needed.
#[derive(Debug, Default)]
pub struct ExpectationQueue {
    entries: VecDeque<Expectation>,
}

/// Outcome of neutralising the queue on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Neutralised,
    /// A directory change without a known target is pending; the
    /// connection has to go.
    MustDisconnect,
}

impl ExpectationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expect: u16, fail_state: State, check: Check) {
        self.push_entry(expect, fail_state, check, false);
    }

    pub fn push_logged(&mut self, expect: u16, fail_state: State, check: Check) {
        self.push_entry(expect, fail_state, check, true);
    }

    fn push_entry(&mut self, expect: u16, fail_state: State, check: Check, log_resp: bool) {
        self.entries.push_back(Expectation {
            expect,
            fail_state,
            check,
            log_resp,
            path: None,
        });
    }

    /// Attaches `path` to the most recently pushed entry.
    pub fn set_path(&mut self, path: &str) {
        if let Some(last) = self.entries.back_mut() {
            last.path = Some(path.to_string());
        }
    }

    pub fn head(&self) -> Option<&Expectation> {
        self.entries.front()
    }

    pub fn pop(&mut self) -> Option<Expectation> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Makes pending replies harmless once nobody waits for them.
    ///
    /// Directory changes keep tracking the confirmed directory when their
    /// target is known; everything else is ignored.
    pub fn close(&mut self) -> CloseOutcome {
        for e in self.entries.iter_mut() {
            match e.check {
                // the parked data socket is released by the ABOR reply
                Check::Ignore | Check::Pwd | Check::Abor => {}
                Check::Cwd | Check::CwdCurrent => {
                    if e.path.is_none() {
                        return CloseOutcome::MustDisconnect;
                    }
                    e.check = Check::CwdStale;
                }
                _ => e.check = Check::Ignore,
            }
        }
        CloseOutcome::Neutralised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = ExpectationQueue::new();
        q.push(200, State::Initial, Check::None);
        q.push(227, State::Initial, Check::Pasv);
        q.push(226, State::StoreFailed, Check::Transfer);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().unwrap().expect, 200);
        assert_eq!(q.pop().unwrap().check, Check::Pasv);
        assert_eq!(q.head().unwrap().fail_state, State::StoreFailed);
    }

    #[test]
    fn test_path_goes_to_last_entry() {
        let mut q = ExpectationQueue::new();
        q.push(257, State::Initial, Check::Pwd);
        q.push(250, State::Initial, Check::Cwd);
        q.set_path("/pub");
        assert_eq!(q.pop().unwrap().path, None);
        assert_eq!(q.pop().unwrap().path.as_deref(), Some("/pub"));
    }

    #[test]
    fn test_close_neutralises_entries() {
        let mut q = ExpectationQueue::new();
        q.push(257, State::Initial, Check::Pwd);
        q.push(250, State::Initial, Check::CwdCurrent);
        q.set_path("/a");
        q.push(226, State::Initial, Check::Transfer);
        q.push_logged(0, State::Initial, Check::Ignore);

        assert_eq!(q.close(), CloseOutcome::Neutralised);
        let checks: Vec<_> = std::iter::from_fn(|| q.pop()).map(|e| e.check).collect();
        assert_eq!(
            checks,
            vec![Check::Pwd, Check::CwdStale, Check::Ignore, Check::Ignore]
        );
    }

    #[test]
    fn test_close_keeps_abort() {
        let mut q = ExpectationQueue::new();
        q.push(226, State::Initial, Check::Transfer);
        q.push(226, State::Initial, Check::Abor);
        q.close();
        assert_eq!(q.pop().unwrap().check, Check::Ignore);
        assert_eq!(q.pop().unwrap().check, Check::Abor);
    }

    #[test]
    fn test_close_with_pathless_cwd() {
        let mut q = ExpectationQueue::new();
        q.push(250, State::Initial, Check::Cwd);
        assert_eq!(q.close(), CloseOutcome::MustDisconnect);
    }
}
