use std::time::{Duration, Instant};

/// What the data-open state should do about an idle control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    Nothing,
    SendNoop,
    /// NOOPs have gone unanswered by progress for the whole timeout.
    Reconnect,
}

/// NOOP pacing while a transfer's data drains after "transfer complete".
///
/// The server may consider its control connection idle while data still
/// sits in kernel buffers; a NOOP every interval keeps it alive. The count
/// resets whenever the position moved.
#[derive(Debug, Clone, Default)]
pub struct KeepAlive {
    last: Option<Instant>,
    count: u32,
    offset: u64,
}

impl KeepAlive {
    /// Returns the action and how long until the next tick is due.
    pub fn tick(
        &mut self,
        now: Instant,
        pos: u64,
        interval: Duration,
        timeout: Duration,
    ) -> (KeepAliveAction, Duration) {
        let mut action = KeepAliveAction::Nothing;
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            if self.offset == pos && interval * self.count >= timeout {
                return (KeepAliveAction::Reconnect, Duration::ZERO);
            }
            if self.last.is_some() {
                self.count += 1;
                action = KeepAliveAction::SendNoop;
            }
            self.last = Some(now);
            if self.offset != pos {
                self.count = 0;
            }
            self.offset = pos;
        }
        let elapsed = self
            .last
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        (action, interval.saturating_sub(elapsed))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
