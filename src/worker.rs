// surfrec/src/worker.rs
//
//! Plumbing shared by the worker threads: the startup handshake and request/acknowledge
//! round trips over a bounded mailbox.

use crate::Error;

use crossbeam_channel::{self as channel, Sender};
use parking_lot::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Signalled once by a worker when it is ready to accept messages, or when it failed to start.
pub(crate) struct ReadyLatch {
    state: Mutex<Option<Result<(), Error>>>,
    condvar: Condvar,
}

impl ReadyLatch {
    pub(crate) fn new() -> ReadyLatch {
        ReadyLatch { state: Mutex::new(None), condvar: Condvar::new() }
    }

    pub(crate) fn signal(&self, result: Result<(), Error>) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(result);
        }
        self.condvar.notify_all();
    }

    /// Blocks until the worker signals, for at most `timeout`.
    pub(crate) fn wait(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.take() {
                return result;
            }
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                return match state.take() {
                    Some(result) => result,
                    None => Err(Error::WorkerStartTimeout),
                };
            }
        }
    }
}

/// Sends a request that carries its own reply channel and blocks until the worker answers.
pub(crate) fn round_trip<M, T>(
    mailbox: &Sender<M>,
    message: impl FnOnce(Sender<Result<T, Error>>) -> M,
) -> Result<T, Error> {
    let (reply_sender, reply_receiver) = channel::bounded(1);
    mailbox.send(message(reply_sender)).map_err(|_| Error::WorkerUnavailable)?;
    reply_receiver.recv().map_err(|_| Error::WorkerUnavailable)?
}

/// Joins a worker, turning a panic into an error.
pub(crate) fn join(handle: JoinHandle<Result<(), Error>>) -> Result<(), Error> {
    handle.join().map_err(|_| Error::WorkerPanicked)?
}
