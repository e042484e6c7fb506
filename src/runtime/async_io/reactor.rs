//! Pending I/O operation table
//!
//! The reactor tracks, per descriptor:
//! - at most one pending read transfer
//! - at most one pending write transfer
//! - at most one pending connect
//!
//! It performs the raw transfers when the selector reports readiness, but
//! never settles promises directly: every outcome is returned as a
//! [`Completion`] for the event loop to run once its own state is released.

use super::handle::{read_fd, take_socket_error, write_fd};
use super::Interest;
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::future::Promise;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use tracing::{debug, trace};

/// Deferred promise settlement.
pub(crate) type Completion = Box<dyn FnOnce()>;

/// A read or write moving `requested` bytes through a caller's buffer.
pub(crate) struct Transfer {
    buffer: ByteBuffer<'static>,
    requested: usize,
    done: usize,
    promise: Promise<ByteBuffer<'static>>,
}

impl Transfer {
    pub(crate) fn new(
        buffer: ByteBuffer<'static>,
        requested: usize,
        promise: Promise<ByteBuffer<'static>>,
    ) -> Self {
        Self {
            buffer,
            requested,
            done: 0,
            promise,
        }
    }

    fn complete(self) -> Completion {
        let Transfer {
            buffer, promise, ..
        } = self;
        Box::new(move || {
            let _ = promise.resolve(buffer);
        })
    }

    fn fail(self, error: Error) -> Completion {
        let promise = self.promise;
        Box::new(move || {
            let _ = promise.fail(error);
        })
    }
}

/// Kind of pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Read,
    Write,
    Connect,
}

enum Progress {
    Done,
    Pending,
    Failed(Error),
}

#[derive(Default)]
struct Slot {
    read: Option<Transfer>,
    write: Option<Transfer>,
    connect: Option<Promise<()>>,
}

impl Slot {
    fn interest(&self) -> Interest {
        let mut interest = Interest::NONE;
        if self.read.is_some() {
            interest |= Interest::READABLE;
        }
        if self.write.is_some() || self.connect.is_some() {
            interest |= Interest::WRITABLE;
        }
        interest
    }

    fn drain(self, error: impl Fn() -> Error) -> Vec<Completion> {
        let mut completions = Vec::new();
        if let Some(promise) = self.connect {
            let error = error();
            completions.push(Box::new(move || {
                let _ = promise.fail(error);
            }) as Completion);
        }
        if let Some(transfer) = self.read {
            completions.push(transfer.fail(error()));
        }
        if let Some(transfer) = self.write {
            completions.push(transfer.fail(error()));
        }
        completions
    }
}

/// Counts of pending operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOps {
    pub reads: usize,
    pub writes: usize,
    pub connects: usize,
}

/// Per-descriptor pending operation records
#[derive(Default)]
pub(crate) struct Reactor {
    slots: HashMap<RawFd, Slot>,
}

impl Reactor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a read; returns the descriptor's new interest.
    pub(crate) fn submit_read(&mut self, fd: RawFd, transfer: Transfer) -> Result<Interest> {
        let slot = self.slots.entry(fd).or_default();
        if slot.read.is_some() {
            return Err(Error::InvalidState("read already pending on descriptor"));
        }
        debug!(fd, requested = transfer.requested, "read submitted");
        slot.read = Some(transfer);
        Ok(slot.interest())
    }

    pub(crate) fn submit_write(&mut self, fd: RawFd, transfer: Transfer) -> Result<Interest> {
        let slot = self.slots.entry(fd).or_default();
        if slot.write.is_some() {
            return Err(Error::InvalidState("write already pending on descriptor"));
        }
        debug!(fd, requested = transfer.requested, "write submitted");
        slot.write = Some(transfer);
        Ok(slot.interest())
    }

    pub(crate) fn submit_connect(&mut self, fd: RawFd, promise: Promise<()>) -> Result<Interest> {
        let slot = self.slots.entry(fd).or_default();
        if slot.connect.is_some() {
            return Err(Error::InvalidState("connect already pending on descriptor"));
        }
        debug!(fd, "connect submitted");
        slot.connect = Some(promise);
        Ok(slot.interest())
    }

    /// Withdraw an operation whose selector registration failed.
    ///
    /// Its future was never handed out, so nothing observes the drop.
    pub(crate) fn retract(&mut self, fd: RawFd, op: Op) {
        let Some(slot) = self.slots.get_mut(&fd) else {
            return;
        };
        match op {
            Op::Read => drop(slot.read.take()),
            Op::Write => drop(slot.write.take()),
            Op::Connect => drop(slot.connect.take()),
        }
        if slot.interest().is_empty() {
            self.slots.remove(&fd);
        }
    }

    /// Act on readiness for `fd`. Returns the completions to run and the
    /// interest still required; empty interest means the fd has nothing
    /// pending any more.
    pub(crate) fn dispatch(&mut self, fd: RawFd, readiness: Interest) -> (Vec<Completion>, Interest) {
        let mut completions = Vec::new();
        let Some(slot) = self.slots.get_mut(&fd) else {
            return (completions, Interest::NONE);
        };
        let errored = readiness.is_error() || readiness.is_hup();

        if slot.connect.is_some() && (readiness.is_writable() || errored) {
            if let Some(promise) = slot.connect.take() {
                let result = match take_socket_error(fd) {
                    Ok(None) => Ok(()),
                    Ok(Some(e)) | Err(e) => Err(Error::Io(e)),
                };
                debug!(fd, ok = result.is_ok(), "connect finished");
                completions.push(Box::new(move || {
                    let _ = promise.settle(result);
                }) as Completion);
            }
        }

        if readiness.is_readable() || errored {
            if let Some(mut transfer) = slot.read.take() {
                match pump_read(fd, &mut transfer) {
                    Progress::Pending => slot.read = Some(transfer),
                    Progress::Done => {
                        debug!(fd, bytes = transfer.done, "read complete");
                        completions.push(transfer.complete());
                    }
                    Progress::Failed(e) => {
                        debug!(fd, error = %e, "read failed");
                        completions.push(transfer.fail(e));
                    }
                }
            }
        }

        if readiness.is_writable() || errored {
            if let Some(mut transfer) = slot.write.take() {
                match pump_write(fd, &mut transfer) {
                    Progress::Pending => slot.write = Some(transfer),
                    Progress::Done => {
                        debug!(fd, bytes = transfer.done, "write complete");
                        completions.push(transfer.complete());
                    }
                    Progress::Failed(e) => {
                        debug!(fd, error = %e, "write failed");
                        completions.push(transfer.fail(e));
                    }
                }
            }
        }

        let interest = slot.interest();
        if interest.is_empty() {
            self.slots.remove(&fd);
        }
        (completions, interest)
    }

    /// Fail everything pending on `fd` with [`Error::Cancelled`].
    pub(crate) fn cancel(&mut self, fd: RawFd) -> Vec<Completion> {
        match self.slots.remove(&fd) {
            Some(slot) => {
                debug!(fd, "operations cancelled");
                slot.drain(|| Error::Cancelled)
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn cancel_all(&mut self) -> Vec<Completion> {
        self.slots
            .drain()
            .flat_map(|(_, slot)| slot.drain(|| Error::Cancelled))
            .collect()
    }

    pub(crate) fn interest(&self, fd: RawFd) -> Interest {
        self.slots.get(&fd).map(Slot::interest).unwrap_or_default()
    }

    pub(crate) fn pending(&self) -> PendingOps {
        let mut ops = PendingOps::default();
        for slot in self.slots.values() {
            ops.reads += slot.read.is_some() as usize;
            ops.writes += slot.write.is_some() as usize;
            ops.connects += slot.connect.is_some() as usize;
        }
        ops
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn pump_read(fd: RawFd, transfer: &mut Transfer) -> Progress {
    while transfer.done < transfer.requested {
        let want = transfer.requested - transfer.done;
        let result = {
            let mut dest = transfer.buffer.view_remaining_mut();
            read_fd(fd, &mut dest.as_mut_slice()[..want])
        };
        match result {
            Ok(0) => {
                return Progress::Failed(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "end of stream before read completed",
                )))
            }
            Ok(n) => {
                trace!(fd, n, "read");
                if let Err(e) = transfer.buffer.advance(n) {
                    return Progress::Failed(e);
                }
                transfer.done += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Progress::Pending,
            Err(e) => return Progress::Failed(e.into()),
        }
    }
    Progress::Done
}

fn pump_write(fd: RawFd, transfer: &mut Transfer) -> Progress {
    while transfer.done < transfer.requested {
        let want = transfer.requested - transfer.done;
        let result = {
            let src = transfer.buffer.view_remaining();
            write_fd(fd, &src.as_slice()[..want])
        };
        match result {
            Ok(0) => {
                return Progress::Failed(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "descriptor accepted no data",
                )))
            }
            Ok(n) => {
                trace!(fd, n, "write");
                if let Err(e) = transfer.buffer.advance(n) {
                    return Progress::Failed(e);
                }
                transfer.done += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Progress::Pending,
            Err(e) => return Progress::Failed(e.into()),
        }
    }
    Progress::Done
}
