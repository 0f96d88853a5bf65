/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result as IoResult;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use mio::{Token, Waker};
use mio::net::TcpStream as MioTcpStream;
use slab::Slab;

use log::{debug, error, trace, warn};

use crate::connection::Session;
use crate::utilities::earliest;
use crate::{EchoError, Multiplexer, ReadyEvent, ServerConfig};

const QUEUE_CAPACITY: usize = 256;

struct Lane {
    sender: Sender<(usize, MioTcpStream)>,
    waker: Waker,
}

/// A fixed set of worker threads, each multiplexing many connections on a
/// single [`Multiplexer`]
///
/// Connections are handed out round-robin. A worker never blocks anywhere but
/// in `wait()`, so a slow or silent peer only ever occupies its own token.
pub(crate) struct Pool {
    lanes: Vec<Lane>,
    threads: Vec<JoinHandle<()>>,
    next: usize,
}

impl Pool {
    pub(crate) fn start(workers: usize, config: Arc<ServerConfig>) -> IoResult<Self> {
        let count = workers.max(1);
        let mut lanes = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        for index in 0..count {
            let mut multiplexer = Multiplexer::with_capacity(config.events_capacity)?;
            let waker = multiplexer.waker()?;
            let (sender, receiver) = crossbeam_channel::bounded(QUEUE_CAPACITY);
            let worker = PoolWorker {
                index,
                multiplexer,
                receiver,
                sessions: Slab::new(),
                config: config.clone(),
                closing: false,
            };
            threads.push(thread::Builder::new()
                .name(format!("echo-pool-{}", index))
                .spawn(move || worker.run())?);
            lanes.push(Lane { sender, waker });
        }
        debug!("Started {} pool worker(s)", threads.len());
        Ok(Self { lanes, threads, next: 0 })
    }

    /// Hands a connection to the next worker. Never blocks: a connection that
    /// cannot be queued is dropped.
    pub(crate) fn dispatch(&mut self, id: usize, stream: MioTcpStream) {
        let lane = &self.lanes[self.next % self.lanes.len()];
        self.next = self.next.wrapping_add(1);
        match lane.sender.try_send((id, stream)) {
            Ok(()) => {
                if let Err(error) = lane.waker.wake() {
                    warn!("[{}] Failed to wake the pool worker: {:?}", id, error);
                }
            },
            Err(TrySendError::Full(_)) => warn!("[{}] Pool queue is full, connection dropped", id),
            Err(TrySendError::Disconnected(_)) => warn!("[{}] Pool worker is gone, connection dropped", id),
        }
    }

    /// Lets every worker finish the connections it already has, then joins
    /// the threads.
    pub(crate) fn finish(self) {
        for lane in self.lanes {
            let Lane { sender, waker } = lane;
            drop(sender);
            if let Err(error) = waker.wake() {
                warn!("Failed to wake a pool worker: {:?}", error);
            }
        }
        for thread in self.threads {
            if thread.join().is_err() {
                error!("A pool worker has panicked!");
            }
        }
    }
}

struct PoolWorker {
    index: usize,
    multiplexer: Multiplexer,
    receiver: Receiver<(usize, MioTcpStream)>,
    sessions: Slab<Session>,
    config: Arc<ServerConfig>,
    closing: bool,
}

impl PoolWorker {
    fn run(mut self) {
        while !(self.closing && self.sessions.is_empty()) {
            let timeout = self.sessions.iter().fold(None, |next, (_, session)| earliest(next, session.remaining()));
            let events = match self.multiplexer.wait(timeout) {
                Ok(events) => events,
                Err(error) => {
                    error!("Pool worker #{} failed to wait: {:?}", self.index, error);
                    break;
                },
            };
            for event in events {
                match event.is_wakeup() {
                    true => self.admit_queued(),
                    false => self.ready(event),
                }
            }
            let keys: Vec<usize> = self.sessions.iter().map(|(key, _)| key).collect();
            for key in keys {
                if let Some(session) = self.sessions.get_mut(key) {
                    let result = session.check_timers();
                    self.settle(key, result);
                }
            }
        }

        for mut session in self.sessions.drain() {
            session.release(&mut self.multiplexer);
        }
        self.multiplexer.close();
        debug!("Pool worker #{} stopped", self.index);
    }

    fn admit_queued(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok((id, stream)) => self.admit(id, stream),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closing = true;
                    break;
                },
            }
        }
    }

    fn admit(&mut self, id: usize, stream: MioTcpStream) {
        let key = self.sessions.vacant_key();
        let mut session = match Session::server(id, Token(key), stream, &self.config) {
            Ok(session) => session,
            Err(error) => return warn!("[{}] Failed to set up the connection: {:?}", id, error),
        };
        if let Err(error) = session.arm(&mut self.multiplexer) {
            return warn!("[{}] Failed to register the connection: {:?}", id, error);
        }
        trace!("[{}] Hosted by pool worker #{} as {:?}", id, self.index, Token(key));
        self.sessions.insert(session);
    }

    fn ready(&mut self, event: ReadyEvent) {
        let key = event.token.0;
        let result = match self.sessions.get_mut(key) {
            Some(session) => session.ready(&mut self.multiplexer, event.readiness),
            None => return,
        };
        self.settle(key, result);
    }

    /// Removes the session under `key` once it has finished or failed.
    fn settle(&mut self, key: usize, result: Result<(), EchoError>) {
        let finished = result.is_err() || self.sessions.get(key).map(Session::is_finished).unwrap_or(false);
        if !finished || !self.sessions.contains(key) {
            return;
        }
        let mut session = self.sessions.remove(key);
        session.release(&mut self.multiplexer);
        match result {
            Ok(()) => {
                let report = session.report();
                debug!("[{}] Finished after {} byte(s) in, {} byte(s) out", report.id, report.stats.bytes_read, report.stats.bytes_written);
            },
            Err(error) => warn!("[{}] The connection has failed: {}", session.id(), error),
        }
    }
}
