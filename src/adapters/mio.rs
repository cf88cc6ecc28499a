//! A readiness notifier backed by a `mio` poll registry.

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::io;
use std::os::unix::io::RawFd;
use tracing::warn;

use crate::nonblock::EventNotifier;

/// Binds a connection's readiness interest to a `mio` registry.
///
/// Create one per connection with the token your event loop dispatches
/// on, attach it with
/// [`AsyncConnection::attach`](crate::nonblock::AsyncConnection::attach),
/// and call `handle_read`/`handle_write` on the connection when the poll
/// returns the token with the matching readiness.
///
/// The hooks are idempotent: the notifier tracks which interests are
/// enabled and only touches the registry on actual changes.
pub struct MioNotifier {
    registry: Registry,
    token: Token,
    fd: RawFd,
    reading: bool,
    writing: bool,
}

impl MioNotifier {
    /// Creates a notifier registering the socket behind `fd` under
    /// `token`.
    pub fn new(registry: &Registry, token: Token, fd: RawFd) -> io::Result<MioNotifier> {
        Ok(MioNotifier {
            registry: registry.try_clone()?,
            token,
            fd,
            reading: false,
            writing: false,
        })
    }

    fn interests(&self) -> Option<Interest> {
        match (self.reading, self.writing) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn update(&mut self, was_registered: bool) {
        let mut source = SourceFd(&self.fd);
        let outcome = match (was_registered, self.interests()) {
            (false, Some(interest)) => self.registry.register(&mut source, self.token, interest),
            (true, Some(interest)) => self.registry.reregister(&mut source, self.token, interest),
            (true, None) => self.registry.deregister(&mut source),
            (false, None) => Ok(()),
        };
        if let Err(err) = outcome {
            warn!("failed to update poll registration: {}", err);
        }
    }
}

impl EventNotifier for MioNotifier {
    fn add_read(&mut self) {
        if self.reading {
            return;
        }
        let was_registered = self.reading || self.writing;
        self.reading = true;
        self.update(was_registered);
    }

    fn del_read(&mut self) {
        if !self.reading {
            return;
        }
        self.reading = false;
        self.update(true);
    }

    fn add_write(&mut self) {
        if self.writing {
            return;
        }
        let was_registered = self.reading || self.writing;
        self.writing = true;
        self.update(was_registered);
    }

    fn del_write(&mut self) {
        if !self.writing {
            return;
        }
        self.writing = false;
        self.update(true);
    }

    fn cleanup(&mut self) {
        if self.reading || self.writing {
            self.reading = false;
            self.writing = false;
            let mut source = SourceFd(&self.fd);
            if let Err(err) = self.registry.deregister(&mut source) {
                warn!("failed to release poll registration: {}", err);
            }
        }
    }
}
