use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Readable,
    Writable,
}

/// Whether a step changed anything. `Moved` asks the scheduler to step
/// again right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Stall,
    Moved,
}

/// What a session waits for before it wants to be stepped again.
///
/// Filled by the step function, consumed by the external scheduler: wake on
/// any listed descriptor event or once `timeout` elapsed, and do not wait
/// at all when `no_wait` is set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Block {
    waits: Vec<(RawFd, Interest)>,
    timeout: Option<Duration>,
    no_wait: bool,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_vec(&mut self, fd: RawFd, interest: Interest) {
        if !self.waits.contains(&(fd, interest)) {
            self.waits.push((fd, interest));
        }
    }

    /// Keeps the shortest of all requested timeouts.
    pub fn timeout(&mut self, after: Duration) {
        self.timeout = Some(match self.timeout {
            Some(t) => t.min(after),
            None => after,
        });
    }

    pub fn no_wait(&mut self) {
        self.no_wait = true;
    }

    pub fn waits(&self) -> &[(RawFd, Interest)] {
        &self.waits
    }

    pub fn wants(&self, fd: RawFd, interest: Interest) -> bool {
        self.waits.contains(&(fd, interest))
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn clear(&mut self) {
        self.waits.clear();
        self.timeout = None;
        self.no_wait = false;
    }
}
