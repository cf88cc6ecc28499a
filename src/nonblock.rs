//! Event-driven non-blocking connections.
//!
//! An [`AsyncConnection`] owns a non-blocking [`Connection`] and drives
//! it from readiness events delivered by an external event loop. The
//! loop is abstracted behind the [`EventNotifier`] hooks; the loop in
//! turn calls [`handle_read`](AsyncConnection::handle_read) and
//! [`handle_write`](AsyncConnection::handle_write) when the socket
//! becomes ready.
//!
//! Replies are correlated to their requests by the `responseTo` field of
//! the reply header, through a registry keyed by request id. A callback
//! registered for a request runs exactly once per correlated reply, or
//! once with `None` when the connection dies first.

use bson::Document;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionFlags};
use crate::error::Error::{self, IoError, OperationError};
use crate::error::Result;
use crate::wire_protocol::flags::{OpDeleteFlags, OpInsertFlags, OpQueryFlags, OpUpdateFlags};
use crate::wire_protocol::reply::Reply;

/// Readiness hooks binding a connection to one event loop.
///
/// The connection invokes these as its interest set changes. Every hook
/// must be idempotent: enabling an interest that is already enabled, or
/// disabling one that is not, is a no-op. One implementation exists per
/// event-loop backend; see the `adapters` module for a `mio`-based one.
pub trait EventNotifier {
    /// Requests read-readiness notifications.
    fn add_read(&mut self);
    /// Stops read-readiness notifications.
    fn del_read(&mut self);
    /// Requests write-readiness notifications.
    fn add_write(&mut self);
    /// Stops write-readiness notifications.
    fn del_write(&mut self);
    /// Releases whatever the event loop holds for this connection.
    fn cleanup(&mut self);
}

/// A reply handler registered for one outstanding request.
pub type ReplyCallback = Box<dyn FnMut(&mut AsyncConnection, Option<Reply>)>;

/// Invoked once when a pending connect attempt resolves.
pub type ConnectCallback = Box<dyn FnOnce(&mut AsyncConnection, Result<()>)>;

/// Invoked once when the connection goes away: `Ok` after a clean
/// disconnect, the fatal error otherwise.
pub type DisconnectCallback = Box<dyn FnOnce(&mut AsyncConnection, Result<()>)>;

/// A non-blocking connection dispatching replies to registered callbacks.
pub struct AsyncConnection {
    conn: Connection,
    notifier: Option<Box<dyn EventNotifier>>,
    callbacks: HashMap<u32, ReplyCallback>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl AsyncConnection {
    fn wrap(mut conn: Connection) -> AsyncConnection {
        // The connect functions set CONNECTED as soon as the handshake is
        // initiated; the async API instead waits for the first readiness
        // event to confirm the socket before accepting it.
        conn.flags.remove(ConnectionFlags::CONNECTED);
        AsyncConnection {
            conn,
            notifier: None,
            callbacks: HashMap::new(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Initiates a non-blocking TCP connect.
    pub fn connect(host: &str, port: u16) -> Result<AsyncConnection> {
        Ok(AsyncConnection::wrap(Connection::connect_nonblock(
            host, port,
        )?))
    }

    /// Initiates a non-blocking TCP connect from a bound source address.
    pub fn connect_bind(host: &str, port: u16, source_addr: &str) -> Result<AsyncConnection> {
        Ok(AsyncConnection::wrap(Connection::connect_bind_nonblock(
            host,
            port,
            source_addr,
        )?))
    }

    /// Initiates a non-blocking TCP connect from a bound source address,
    /// setting SO_REUSEADDR before the bind.
    pub fn connect_bind_with_reuse(
        host: &str,
        port: u16,
        source_addr: &str,
    ) -> Result<AsyncConnection> {
        Ok(AsyncConnection::wrap(
            Connection::connect_bind_nonblock_with_reuse(host, port, source_addr)?,
        ))
    }

    /// Initiates a non-blocking Unix-domain connect.
    pub fn connect_unix<P: AsRef<std::path::Path>>(path: P) -> Result<AsyncConnection> {
        Ok(AsyncConnection::wrap(Connection::connect_unix_nonblock(
            path,
        )?))
    }

    /// Binds the connection to an event loop through its notifier.
    ///
    /// Fails if a notifier is already attached.
    pub fn attach(&mut self, notifier: Box<dyn EventNotifier>) -> Result<()> {
        if self.notifier.is_some() {
            return Err(OperationError(
                "an event notifier is already attached".to_owned(),
            ));
        }
        self.notifier = Some(notifier);
        Ok(())
    }

    /// Registers the hook run when the connect attempt resolves, and arms
    /// write interest so the first writable event reports the outcome.
    ///
    /// Fails if a connect hook is already registered.
    pub fn set_connect_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut AsyncConnection, Result<()>) + 'static,
    {
        if self.on_connect.is_some() {
            return Err(OperationError(
                "a connect callback is already registered".to_owned(),
            ));
        }
        self.on_connect = Some(Box::new(callback));

        // The common way to detect an established connection is to wait
        // for the first write event to fire.
        self.add_write();
        Ok(())
    }

    /// Registers the hook run when the connection goes away.
    ///
    /// Fails if a disconnect hook is already registered.
    pub fn set_disconnect_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut AsyncConnection, Result<()>) + 'static,
    {
        if self.on_disconnect.is_some() {
            return Err(OperationError(
                "a disconnect callback is already registered".to_owned(),
            ));
        }
        self.on_disconnect = Some(Box::new(callback));
        Ok(())
    }

    /// Whether the transport-level connection has been confirmed.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.conn.stream.is_none()
    }

    /// The number of requests still waiting for a reply.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// The description of the fatal error this connection has seen, if
    /// any.
    pub fn last_error(&self) -> Option<&str> {
        self.conn.last_error()
    }

    /// Shared access to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn add_read(&mut self) {
        if let Some(ref mut notifier) = self.notifier {
            notifier.add_read();
        }
    }

    fn add_write(&mut self) {
        if let Some(ref mut notifier) = self.notifier {
            notifier.add_write();
        }
    }

    fn del_write(&mut self) {
        if let Some(ref mut notifier) = self.notifier {
            notifier.del_write();
        }
    }

    /// Queues a query and registers `callback` for its reply.
    ///
    /// With the EXHAUST flag set, the server streams successive batches
    /// unsolicited and the callback runs once per batch; it stays
    /// registered until a reply carries `cursor_id == 0`.
    ///
    /// Returns the assigned request id.
    pub fn query<F>(
        &mut self,
        flags: OpQueryFlags,
        db: &str,
        col: &str,
        number_to_skip: i32,
        number_to_return: i32,
        query: &Document,
        return_field_selector: Option<&Document>,
        callback: F,
    ) -> Result<i32>
    where
        F: FnMut(&mut AsyncConnection, Option<Reply>) + 'static,
    {
        let id = self.conn.append_query(
            flags,
            db,
            col,
            number_to_skip,
            number_to_return,
            query,
            return_field_selector,
        )?;
        self.callbacks.insert(id as u32, Box::new(callback));

        // Always schedule a write when the write buffer is non-empty.
        self.add_write();
        Ok(id)
    }

    /// Queues a "get more" request for an open cursor and registers
    /// `callback` for its reply.
    ///
    /// The request gets its own id; the callback registered for the
    /// originating query does not cover replies to this request.
    pub fn get_more<F>(
        &mut self,
        db: &str,
        col: &str,
        number_to_return: i32,
        cursor_id: i64,
        callback: F,
    ) -> Result<i32>
    where
        F: FnMut(&mut AsyncConnection, Option<Reply>) + 'static,
    {
        let id = self
            .conn
            .append_get_more(db, col, number_to_return, cursor_id)?;
        self.callbacks.insert(id as u32, Box::new(callback));
        self.add_write();
        Ok(id)
    }

    /// Queues a database command against `<db>.$cmd` and registers
    /// `callback` for its single-document reply.
    pub fn command<F>(&mut self, db: &str, command: &Document, callback: F) -> Result<i32>
    where
        F: FnMut(&mut AsyncConnection, Option<Reply>) + 'static,
    {
        self.query(
            OpQueryFlags::no_flags(),
            db,
            "$cmd",
            0,
            1,
            command,
            None,
            callback,
        )
    }

    /// Queues an insertion. The legacy protocol sends no reply for it.
    pub fn insert(
        &mut self,
        flags: OpInsertFlags,
        db: &str,
        col: &str,
        documents: &[Document],
    ) -> Result<i32> {
        let id = self.conn.append_insert(flags, db, col, documents)?;
        self.add_write();
        Ok(id)
    }

    /// Queues an update. The legacy protocol sends no reply for it.
    pub fn update(
        &mut self,
        db: &str,
        col: &str,
        flags: OpUpdateFlags,
        selector: &Document,
        update: &Document,
    ) -> Result<i32> {
        let id = self.conn.append_update(db, col, flags, selector, update)?;
        self.add_write();
        Ok(id)
    }

    /// Queues a deletion. The legacy protocol sends no reply for it.
    pub fn delete(
        &mut self,
        db: &str,
        col: &str,
        flags: OpDeleteFlags,
        selector: &Document,
    ) -> Result<i32> {
        let id = self.conn.append_delete(db, col, flags, selector)?;
        self.add_write();
        Ok(id)
    }

    /// Queues a "kill cursors" request. The server sends no reply for it.
    pub fn kill_cursors(&mut self, cursor_ids: &[i64]) -> Result<i32> {
        let id = self.conn.append_kill_cursors(cursor_ids)?;
        self.add_write();
        Ok(id)
    }

    /// Drives the connection when the event loop reports the socket
    /// readable: reads available bytes and dispatches completed replies.
    pub fn handle_read(&mut self) {
        if !self.conn.is_connected() && !self.handle_connect() {
            return;
        }

        match self.conn.buffer_read() {
            Ok(()) => {
                // Always re-schedule reads
                self.add_read();
                self.process_replies();
            }
            Err(err) => self.hard_disconnect(err),
        }
    }

    /// Drives the connection when the event loop reports the socket
    /// writable: flushes the output buffer and adjusts write interest.
    pub fn handle_write(&mut self) {
        if !self.conn.is_connected() && !self.handle_connect() {
            return;
        }

        match self.conn.buffer_write() {
            Ok(done) => {
                // Continue writing when not done, stop writing otherwise.
                if done {
                    self.del_write();

                    // A draining connection whose last fire-and-forget
                    // write just left the buffer has nothing to wait for.
                    if self.conn.flags.contains(ConnectionFlags::DISCONNECTING)
                        && self.callbacks.is_empty()
                    {
                        self.teardown(None);
                        return;
                    }
                } else {
                    self.add_write();
                }

                // Always schedule reads after writes.
                self.add_read();
            }
            Err(err) => self.hard_disconnect(err),
        }
    }

    // Detects the outcome of a pending connect the first time the socket
    // reports readiness. Returns whether the connection may be used.
    fn handle_connect(&mut self) -> bool {
        match self.conn.take_socket_error() {
            Ok(None) => {
                self.conn.flags.insert(ConnectionFlags::CONNECTED);
                debug!("async connection established");
                if let Some(callback) = self.on_connect.take() {
                    callback(self, Ok(()));
                }
                !self.is_closed()
            }
            Ok(Some(err)) => {
                // connect(2) still in progress; wait for the next event.
                if err.raw_os_error() == Some(libc::EINPROGRESS) {
                    return false;
                }

                warn!("async connect failed: {}", err);
                let msg = err.to_string();
                let err = IoError(err);
                self.conn.fail(&err);
                if let Some(callback) = self.on_connect.take() {
                    callback(self, Err(err));
                }
                self.teardown(Some(OperationError(msg)));
                false
            }
            Err(err) => {
                self.hard_disconnect(err);
                false
            }
        }
    }

    // Pumps completed replies out of the reader and into the callbacks
    // they correlate to.
    fn process_replies(&mut self) {
        loop {
            let reply = match self.conn.reply_from_reader() {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    // A draining connection with nothing left in flight
                    // can finish its clean disconnect now.
                    if self.conn.flags.contains(ConnectionFlags::DISCONNECTING)
                        && self.conn.obuf.is_empty()
                        && self.callbacks.is_empty()
                    {
                        self.teardown(None);
                    }
                    return;
                }
                Err(err) => {
                    self.hard_disconnect(err);
                    return;
                }
            };

            let key = reply.response_to() as u32;
            let cursor_id = reply.cursor_id;

            match self.callbacks.remove(&key) {
                Some(mut callback) => {
                    trace!("dispatching reply to request {}", key);
                    self.conn.flags.insert(ConnectionFlags::IN_CALLBACK);
                    callback(self, Some(reply));
                    self.conn.flags.remove(ConnectionFlags::IN_CALLBACK);

                    // A live cursor keeps its callback registered for the
                    // follow-on batches of an EXHAUST stream.
                    if cursor_id != 0 && !self.conn.flags.contains(ConnectionFlags::FREEING) {
                        self.callbacks.insert(key, callback);
                    }

                    // Proceed with the teardown that a callback requested.
                    if self.conn.flags.contains(ConnectionFlags::FREEING) {
                        self.teardown(None);
                        return;
                    }
                }
                None => {
                    // Nobody asked for this reply; the server is ahead of
                    // us or the request was fire-and-forget. Ignore it.
                    trace!("dropping unmatched reply to request {}", key);
                }
            }
        }
    }

    /// Starts a clean disconnect.
    ///
    /// New requests are refused; queued writes are flushed and replies
    /// keep being read until every pending callback has been delivered,
    /// after which the disconnect hook runs with `Ok`. Called from inside
    /// a callback, the final teardown is deferred until the dispatcher
    /// regains control.
    pub fn disconnect(&mut self) {
        self.conn.flags.insert(ConnectionFlags::DISCONNECTING);

        if self.conn.flags.contains(ConnectionFlags::IN_CALLBACK) {
            return;
        }

        if self.callbacks.is_empty() && self.conn.obuf.is_empty() {
            self.teardown(None);
        } else {
            // Keep the flush moving; the read side finishes the job.
            self.add_write();
        }
    }

    /// Tears the connection down immediately, delivering `None` to every
    /// pending callback.
    ///
    /// Called from inside a callback, the teardown is deferred until the
    /// dispatcher regains control, so a handler may end its own
    /// connection without upsetting the reply pump.
    pub fn shutdown(&mut self) {
        self.conn.flags.insert(ConnectionFlags::FREEING);
        if !self.conn.flags.contains(ConnectionFlags::IN_CALLBACK) {
            self.teardown(None);
        }
    }

    // An I/O or protocol failure: drain every pending callback with a
    // `None` reply and report the failure through the disconnect hook.
    fn hard_disconnect(&mut self, err: Error) {
        warn!("disconnecting after error: {}", err);
        self.conn.flags.insert(ConnectionFlags::DISCONNECTING);
        self.teardown(Some(err));
    }

    // Drains pending callbacks, releases the event-loop registration,
    // runs the disconnect hook, and closes the socket.
    fn teardown(&mut self, err: Option<Error>) {
        if self.is_closed() {
            return;
        }

        // No request may be encoded past this point, including from the
        // callbacks drained below.
        self.conn.flags.insert(ConnectionFlags::DISCONNECTING);

        // Deliver pending callbacks in registration order; ids are
        // assigned in increasing order, so sorting recovers it.
        let mut pending: Vec<(u32, ReplyCallback)> = self.callbacks.drain().collect();
        pending.sort_by_key(|&(id, _)| id);
        for (id, mut callback) in pending {
            trace!("draining request {} with no reply", id);
            self.conn.flags.insert(ConnectionFlags::IN_CALLBACK);
            callback(self, None);
            self.conn.flags.remove(ConnectionFlags::IN_CALLBACK);
        }

        // Signal the event loop to release this connection.
        if let Some(ref mut notifier) = self.notifier {
            notifier.cleanup();
        }
        self.notifier = None;

        // The disconnect hook only fires for connections that were
        // actually established; a failed connect reports through the
        // connect hook instead.
        let was_connected = self.conn.is_connected();
        if was_connected {
            if let Some(callback) = self.on_disconnect.take() {
                let status = match err {
                    None => Ok(()),
                    Some(err) => Err(err),
                };
                callback(self, status);
            }
        }

        self.conn.stream = None;
        self.conn.flags.remove(ConnectionFlags::CONNECTED);
        debug!("async connection closed");
    }
}
