use crate::constants::LOOKUP_ERROR_TEXT;
use log::debug;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

/// A host lookup in progress. Polled once per step, never blocks.
pub trait Resolve: Send {
    fn done(&mut self) -> bool;
    fn error(&self) -> Option<&str>;
    fn result(&self) -> Option<SocketAddr>;
}

/// Starts lookups for sessions.
pub trait ResolverFactory: Send + Sync {
    fn start(&self, host: &str, port: u16) -> Box<dyn Resolve>;
}

type Outcome = Result<SocketAddr, String>;

fn lookup(host: &str, port: u16) -> Outcome {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| e.to_string())?
        .collect();
    // IPv4 first, PORT/PASV only speak it
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| String::from(LOOKUP_ERROR_TEXT))
}

/// Resolves on a helper thread through the system resolver.
pub struct ThreadResolver {
    rx: Receiver<Outcome>,
    outcome: Option<Outcome>,
}

impl ThreadResolver {
    pub fn spawn(host: &str, port: u16) -> Self {
        let (tx, rx) = mpsc::channel();
        let host = host.to_string();
        thread::spawn(move || {
            let outcome = lookup(&host, port);
            debug!("lookup of {} finished: {:?}", host, outcome);
            let _ = tx.send(outcome);
        });
        Self { rx, outcome: None }
    }
}

impl Resolve for ThreadResolver {
    fn done(&mut self) -> bool {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => {
                    self.outcome = Some(Err(String::from(LOOKUP_ERROR_TEXT)))
                }
            }
        }
        true
    }

    fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Err(msg)) => Some(msg),
            _ => None,
        }
    }

    fn result(&self) -> Option<SocketAddr> {
        match &self.outcome {
            Some(Ok(addr)) => Some(*addr),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadResolverFactory;

impl ResolverFactory for ThreadResolverFactory {
    fn start(&self, host: &str, port: u16) -> Box<dyn Resolve> {
        Box::new(ThreadResolver::spawn(host, port))
    }
}

/// A lookup finished at creation time.
#[derive(Debug, Clone)]
pub struct ReadyResolver {
    outcome: Outcome,
}

impl Resolve for ReadyResolver {
    fn done(&mut self) -> bool {
        true
    }

    fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }

    fn result(&self) -> Option<SocketAddr> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Resolves inline on the calling thread. Meant for numeric addresses and
/// tests, where the lookup cannot stall the scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineResolverFactory;

impl ResolverFactory for InlineResolverFactory {
    fn start(&self, host: &str, port: u16) -> Box<dyn Resolve> {
        Box::new(ReadyResolver {
            outcome: lookup(host, port),
        })
    }
}
