//! Pollable descriptor set
//!
//! The host watches these descriptors to learn when a session needs service.
//! Readiness is either discovered by [`PollSet::wait`] or reported by a host
//! event loop through [`PollSet::mark_ready`]; either way the session's
//! `dispatch_events` consumes it.

use crate::usb::link::PollDescriptor;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;
use tracing::trace;

/// One watched descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEntry {
    pub fd: RawFd,
    pub interest: PollFlags,
    pub ready: PollFlags,
}

/// Descriptors of one open session, with their last observed readiness
#[derive(Debug, Default)]
pub struct PollSet {
    entries: Vec<PollEntry>,
}

impl PollSet {
    pub fn new(descriptors: impl IntoIterator<Item = PollDescriptor>) -> Self {
        let entries = descriptors
            .into_iter()
            .map(|d| PollEntry {
                fd: d.fd,
                interest: d.events,
                ready: PollFlags::empty(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PollEntry] {
        &self.entries
    }

    /// Block until at least one descriptor is ready or `timeout` elapses.
    ///
    /// `None` waits forever. Interrupted waits are retried. Returns the
    /// number of ready descriptors; readiness is recorded in the entries.
    pub fn wait(&mut self, timeout: Option<Duration>) -> nix::Result<usize> {
        if self.entries.is_empty() {
            return Ok(0);
        }
        let timeout = to_poll_timeout(timeout);

        loop {
            let mut fds: Vec<PollFd<'_>> = self
                .entries
                .iter()
                .map(|entry| {
                    // SAFETY: the descriptors belong to the session's link, which
                    // outlives its poll set
                    let fd = unsafe { BorrowedFd::borrow_raw(entry.fd) };
                    PollFd::new(fd, entry.interest)
                })
                .collect();

            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    let mut ready = 0;
                    for (entry, fd) in self.entries.iter_mut().zip(&fds) {
                        let revents = fd.revents().unwrap_or(PollFlags::empty());
                        if !revents.is_empty() {
                            entry.ready |= revents;
                            ready += 1;
                        }
                    }
                    trace!("{} descriptor(s) ready", ready);
                    return Ok(ready);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Record readiness observed by a host event loop.
    ///
    /// Returns false if `fd` is not part of this set.
    pub fn mark_ready(&mut self, fd: RawFd, flags: PollFlags) -> bool {
        match self.entries.iter_mut().find(|entry| entry.fd == fd) {
            Some(entry) => {
                entry.ready |= flags;
                true
            }
            None => false,
        }
    }

    pub fn has_ready(&self) -> bool {
        self.entries.iter().any(|entry| !entry.ready.is_empty())
    }

    pub fn clear_ready(&mut self) {
        for entry in &mut self.entries {
            entry.ready = PollFlags::empty();
        }
    }

    /// Drop every entry (session teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn to_poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(duration) => {
            let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
            PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
        }
    }
}
