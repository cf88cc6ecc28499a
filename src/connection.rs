//! Blocking connections to a single MongoDB server.

use bitflags::bitflags;
use bson::{bson, doc, Document};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

use crate::buffer::OutputBuffer;
use crate::cursor::Cursor;
use crate::error::Error::{self, OperationError};
use crate::error::Result;
use crate::net;
use crate::reader::FrameReader;
use crate::wire_protocol::flags::{OpDeleteFlags, OpInsertFlags, OpQueryFlags, OpUpdateFlags};
use crate::wire_protocol::operations::Message;
use crate::wire_protocol::reply::Reply;

/// Size of the scratch buffer used for each socket read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

bitflags! {
    /// Connection state flags.
    pub(crate) struct ConnectionFlags: u8 {
        /// The connection performs blocking request/response I/O.
        const BLOCKING      = 0x01;
        /// The transport-level connection has been established.
        const CONNECTED     = 0x02;
        /// No new requests are accepted; buffered work is being drained.
        const DISCONNECTING = 0x04;
        /// Teardown was requested from inside a callback and is deferred.
        const FREEING       = 0x08;
        /// A user callback is currently running.
        const IN_CALLBACK   = 0x10;
        /// Set SO_REUSEADDR before binding the source address.
        const REUSEADDR     = 0x80;
    }
}

/// The underlying byte transport of a connection.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match *self {
            Stream::Tcp(ref stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
            Stream::Unix(ref stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
        }
    }

    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        match *self {
            Stream::Tcp(ref stream) => stream.take_error(),
            Stream::Unix(ref stream) => stream.take_error(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match *self {
            Stream::Tcp(ref stream) => stream.as_raw_fd(),
            Stream::Unix(ref stream) => stream.as_raw_fd(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Stream::Tcp(ref mut stream) => stream.read(buf),
            Stream::Unix(ref mut stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Stream::Tcp(ref mut stream) => stream.write(buf),
            Stream::Unix(ref mut stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Stream::Tcp(ref mut stream) => stream.flush(),
            Stream::Unix(ref mut stream) => stream.flush(),
        }
    }
}

// Saved connection parameters, reused by `reconnect`.
#[derive(Debug, Clone)]
enum ConnectAddr {
    Tcp {
        host: String,
        port: u16,
        source_addr: Option<String>,
    },
    Unix {
        path: PathBuf,
    },
    // Adopted from an existing stream; cannot be re-established.
    Attached,
}

/// A connection to a single MongoDB server.
///
/// The connection owns its socket, an output buffer of encoded requests,
/// and a frame reader that reassembles replies from the byte stream. In
/// blocking mode, `get_reply` flushes pending requests and waits for the
/// next reply; in non-blocking mode the same machinery is driven by
/// [`AsyncConnection`](crate::nonblock::AsyncConnection).
pub struct Connection {
    pub(crate) stream: Option<Stream>,
    pub(crate) flags: ConnectionFlags,
    pub(crate) obuf: OutputBuffer,
    pub(crate) reader: FrameReader,
    addr: ConnectAddr,
    timeout: Option<Duration>,
    req_id: u32,
    err: Option<String>,
}

fn namespace(db: &str, col: &str) -> String {
    format!("{}.{}", db, col)
}

fn encode_doc(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    bson::encode_document(&mut buf, doc)?;
    Ok(buf)
}

// Lifts reply-level failure flags into errors.
fn check_reply(reply: Reply) -> Result<Reply> {
    if reply.is_cursor_not_found() {
        return Err(Error::CursorNotFoundError);
    }
    if reply.is_query_failure() {
        let msg = reply
            .documents
            .get(0)
            .and_then(|doc| doc.get_str("$err").ok())
            .unwrap_or("query failure")
            .to_owned();
        return Err(OperationError(msg));
    }
    Ok(reply)
}

impl Connection {
    fn new(stream: Stream, flags: ConnectionFlags, addr: ConnectAddr) -> Connection {
        Connection {
            stream: Some(stream),
            flags,
            obuf: OutputBuffer::new(),
            reader: FrameReader::new(),
            addr,
            timeout: None,
            req_id: 0,
            err: None,
        }
    }

    /// Connects to a server over TCP in blocking mode.
    pub fn connect(host: &str, port: u16) -> Result<Connection> {
        let stream = net::tcp_connect(host, port, None)?;
        debug!("connected to {}:{}", host, port);
        Ok(Connection::new(
            Stream::Tcp(stream),
            ConnectionFlags::BLOCKING | ConnectionFlags::CONNECTED,
            ConnectAddr::Tcp {
                host: host.to_owned(),
                port,
                source_addr: None,
            },
        ))
    }

    /// Connects over TCP in blocking mode, bounding both the connect and
    /// later reads and writes by `timeout`.
    pub fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Connection> {
        let stream = net::tcp_connect(host, port, Some(timeout))?;
        debug!("connected to {}:{}", host, port);
        let mut conn = Connection::new(
            Stream::Tcp(stream),
            ConnectionFlags::BLOCKING | ConnectionFlags::CONNECTED,
            ConnectAddr::Tcp {
                host: host.to_owned(),
                port,
                source_addr: None,
            },
        );
        conn.set_timeout(Some(timeout))?;
        Ok(conn)
    }

    /// Initiates a non-blocking TCP connect.
    ///
    /// The handshake is usually still in flight when this returns; the
    /// connection is not usable until the first writable event confirms it.
    pub fn connect_nonblock(host: &str, port: u16) -> Result<Connection> {
        Connection::connect_nonblock_inner(host, port, None, false)
    }

    /// Initiates a non-blocking TCP connect from a bound source address.
    pub fn connect_bind_nonblock(host: &str, port: u16, source_addr: &str) -> Result<Connection> {
        Connection::connect_nonblock_inner(host, port, Some(source_addr), false)
    }

    /// Initiates a non-blocking TCP connect from a bound source address,
    /// setting SO_REUSEADDR before the bind.
    pub fn connect_bind_nonblock_with_reuse(
        host: &str,
        port: u16,
        source_addr: &str,
    ) -> Result<Connection> {
        Connection::connect_nonblock_inner(host, port, Some(source_addr), true)
    }

    fn connect_nonblock_inner(
        host: &str,
        port: u16,
        source_addr: Option<&str>,
        reuse: bool,
    ) -> Result<Connection> {
        let stream = net::tcp_connect_nonblock(host, port, source_addr, reuse)?;
        debug!("connect to {}:{} initiated", host, port);
        let mut flags = ConnectionFlags::CONNECTED;
        if reuse {
            flags |= ConnectionFlags::REUSEADDR;
        }
        Ok(Connection::new(
            Stream::Tcp(stream),
            flags,
            ConnectAddr::Tcp {
                host: host.to_owned(),
                port,
                source_addr: source_addr.map(str::to_owned),
            },
        ))
    }

    /// Connects to a Unix-domain socket in blocking mode.
    pub fn connect_unix<P: AsRef<Path>>(path: P) -> Result<Connection> {
        let path = path.as_ref();
        let stream = net::unix_connect(path)?;
        debug!("connected to {}", path.display());
        Ok(Connection::new(
            Stream::Unix(stream),
            ConnectionFlags::BLOCKING | ConnectionFlags::CONNECTED,
            ConnectAddr::Unix {
                path: path.to_owned(),
            },
        ))
    }

    /// Connects to a Unix-domain socket in blocking mode with a read/write
    /// timeout.
    pub fn connect_unix_with_timeout<P: AsRef<Path>>(
        path: P,
        timeout: Duration,
    ) -> Result<Connection> {
        let mut conn = Connection::connect_unix(path)?;
        conn.set_timeout(Some(timeout))?;
        Ok(conn)
    }

    /// Initiates a non-blocking Unix-domain connect.
    pub fn connect_unix_nonblock<P: AsRef<Path>>(path: P) -> Result<Connection> {
        let path = path.as_ref();
        let stream = net::unix_connect_nonblock(path)?;
        debug!("connect to {} initiated", path.display());
        Ok(Connection::new(
            Stream::Unix(stream),
            ConnectionFlags::CONNECTED,
            ConnectAddr::Unix {
                path: path.to_owned(),
            },
        ))
    }

    /// Adopts an already-connected TCP stream as a blocking connection.
    pub fn from_tcp_stream(stream: TcpStream) -> Connection {
        Connection::new(
            Stream::Tcp(stream),
            ConnectionFlags::BLOCKING | ConnectionFlags::CONNECTED,
            ConnectAddr::Attached,
        )
    }

    /// Adopts an already-connected Unix-domain stream as a blocking
    /// connection.
    pub fn from_unix_stream(stream: UnixStream) -> Connection {
        Connection::new(
            Stream::Unix(stream),
            ConnectionFlags::BLOCKING | ConnectionFlags::CONNECTED,
            ConnectAddr::Attached,
        )
    }

    /// Consumes the connection and hands back the underlying stream.
    pub fn into_stream(mut self) -> Option<Stream> {
        self.stream.take()
    }

    /// Re-establishes the connection using the saved parameters.
    ///
    /// The output buffer and frame reader are replaced wholesale; nothing
    /// queued or half-parsed before the reconnect survives it.
    pub fn reconnect(&mut self) -> Result<()> {
        self.err = None;
        self.obuf = OutputBuffer::new();
        self.reader = FrameReader::new();
        self.stream = None;
        self.flags.remove(
            ConnectionFlags::CONNECTED | ConnectionFlags::DISCONNECTING | ConnectionFlags::FREEING,
        );

        let blocking = self.flags.contains(ConnectionFlags::BLOCKING);
        let stream = match self.addr.clone() {
            ConnectAddr::Tcp {
                host,
                port,
                source_addr,
            } => {
                debug!("reconnecting to {}:{}", host, port);
                if blocking {
                    Stream::Tcp(net::tcp_connect(&host, port, self.timeout)?)
                } else {
                    Stream::Tcp(net::tcp_connect_nonblock(
                        &host,
                        port,
                        source_addr.as_deref(),
                        self.flags.contains(ConnectionFlags::REUSEADDR),
                    )?)
                }
            }
            ConnectAddr::Unix { path } => {
                debug!("reconnecting to {}", path.display());
                if blocking {
                    Stream::Unix(net::unix_connect(&path)?)
                } else {
                    Stream::Unix(net::unix_connect_nonblock(&path)?)
                }
            }
            ConnectAddr::Attached => {
                return Err(OperationError(
                    "not enough information to reconnect".to_owned(),
                ));
            }
        };

        if blocking {
            stream.set_timeouts(self.timeout)?;
        }
        self.stream = Some(stream);
        self.flags.insert(ConnectionFlags::CONNECTED);
        Ok(())
    }

    /// Sets the read/write timeout of a blocking connection.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.flags.contains(ConnectionFlags::BLOCKING) {
            return Err(OperationError(
                "timeouts only apply to blocking connections".to_owned(),
            ));
        }
        if let Some(ref stream) = self.stream {
            stream.set_timeouts(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    /// Enables TCP keepalive probing on the connection.
    pub fn enable_keepalive(&mut self) -> Result<()> {
        match self.stream {
            Some(Stream::Tcp(ref stream)) => net::enable_keepalive(stream),
            Some(Stream::Unix(_)) => Err(OperationError(
                "keepalive requires a TCP connection".to_owned(),
            )),
            None => Err(OperationError("connection is closed".to_owned())),
        }
    }

    /// Whether the connection performs blocking I/O.
    pub fn is_blocking(&self) -> bool {
        self.flags.contains(ConnectionFlags::BLOCKING)
    }

    /// Whether the transport-level connection has been established.
    pub fn is_connected(&self) -> bool {
        self.flags.contains(ConnectionFlags::CONNECTED)
    }

    /// The description of the fatal error this connection has seen, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// The encoded request bytes not yet written to the socket.
    pub fn pending_output(&self) -> &[u8] {
        self.obuf.as_slice()
    }

    /// The raw file descriptor of the underlying socket, for wiring the
    /// connection into an event loop.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(Stream::as_raw_fd)
    }

    /// Checks a pending non-blocking connect, handing back the socket
    /// error if the attempt failed.
    pub(crate) fn take_socket_error(&mut self) -> Result<Option<io::Error>> {
        match self.stream {
            Some(ref stream) => Ok(stream.take_error()?),
            None => Err(OperationError("connection is closed".to_owned())),
        }
    }

    fn next_request_id(&mut self) -> i32 {
        // Wraps modulo 2^32; correlation treats the id as unsigned.
        self.req_id = self.req_id.wrapping_add(1);
        self.req_id as i32
    }

    // Records the first fatal failure so later operations refuse to touch
    // a connection in an unknown state.
    pub(crate) fn fail(&mut self, err: &Error) {
        if self.err.is_none() {
            self.err = Some(err.to_string());
        }
    }

    fn check_open(&self) -> Result<()> {
        if let Some(ref msg) = self.err {
            return Err(OperationError(msg.clone()));
        }
        if self.stream.is_none() {
            return Err(OperationError("connection is closed".to_owned()));
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self
            .flags
            .intersects(ConnectionFlags::DISCONNECTING | ConnectionFlags::FREEING)
        {
            return Err(OperationError("connection is shutting down".to_owned()));
        }
        self.check_open()
    }

    fn require_blocking(&self) -> Result<()> {
        if !self.flags.contains(ConnectionFlags::BLOCKING) {
            return Err(OperationError(
                "operation requires a blocking connection".to_owned(),
            ));
        }
        Ok(())
    }

    fn append_message(&mut self, message: &Message) -> Result<i32> {
        message.write(&mut self.obuf)?;
        trace!(
            "queued {} request {}",
            match *message {
                Message::OpUpdate { .. } => "OP_UPDATE",
                Message::OpInsert { .. } => "OP_INSERT",
                Message::OpQuery { .. } => "OP_QUERY",
                Message::OpGetMore { .. } => "OP_GET_MORE",
                Message::OpDelete { .. } => "OP_DELETE",
                Message::OpKillCursors { .. } => "OP_KILL_CURSORS",
            },
            message.request_id()
        );
        Ok(message.request_id())
    }

    /// Encodes an update request into the output buffer.
    ///
    /// Returns the assigned request id.
    pub fn append_update(
        &mut self,
        db: &str,
        col: &str,
        flags: OpUpdateFlags,
        selector: &Document,
        update: &Document,
    ) -> Result<i32> {
        self.check_writable()?;
        let id = self.next_request_id();
        let message = Message::new_update(
            id,
            namespace(db, col),
            flags,
            encode_doc(selector)?,
            encode_doc(update)?,
        )?;
        self.append_message(&message)
    }

    /// Encodes an insertion request into the output buffer.
    ///
    /// Returns the assigned request id.
    pub fn append_insert(
        &mut self,
        flags: OpInsertFlags,
        db: &str,
        col: &str,
        documents: &[Document],
    ) -> Result<i32> {
        self.check_writable()?;
        let mut encoded = Vec::with_capacity(documents.len());
        for doc in documents {
            encoded.push(encode_doc(doc)?);
        }
        let id = self.next_request_id();
        let message = Message::new_insert(id, flags, namespace(db, col), encoded)?;
        self.append_message(&message)
    }

    /// Encodes a query request into the output buffer.
    ///
    /// Returns the assigned request id, which the matching reply will carry
    /// in its `responseTo` field.
    pub fn append_query(
        &mut self,
        flags: OpQueryFlags,
        db: &str,
        col: &str,
        number_to_skip: i32,
        number_to_return: i32,
        query: &Document,
        return_field_selector: Option<&Document>,
    ) -> Result<i32> {
        self.check_writable()?;
        let selector = match return_field_selector {
            Some(doc) => Some(encode_doc(doc)?),
            None => None,
        };
        let id = self.next_request_id();
        let message = Message::new_query(
            id,
            flags,
            namespace(db, col),
            number_to_skip,
            number_to_return,
            encode_doc(query)?,
            selector,
        )?;
        self.append_message(&message)
    }

    /// Encodes a "get more" request into the output buffer.
    ///
    /// Returns the assigned request id.
    pub fn append_get_more(
        &mut self,
        db: &str,
        col: &str,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<i32> {
        self.check_writable()?;
        let id = self.next_request_id();
        let message = Message::new_get_more(id, namespace(db, col), number_to_return, cursor_id)?;
        self.append_message(&message)
    }

    /// Encodes a deletion request into the output buffer.
    ///
    /// Returns the assigned request id.
    pub fn append_delete(
        &mut self,
        db: &str,
        col: &str,
        flags: OpDeleteFlags,
        selector: &Document,
    ) -> Result<i32> {
        self.check_writable()?;
        let id = self.next_request_id();
        let message =
            Message::new_delete(id, namespace(db, col), flags, encode_doc(selector)?)?;
        self.append_message(&message)
    }

    /// Encodes a "kill cursors" request into the output buffer.
    ///
    /// Returns the assigned request id.
    pub fn append_kill_cursors(&mut self, cursor_ids: &[i64]) -> Result<i32> {
        self.check_writable()?;
        let id = self.next_request_id();
        let message = Message::new_kill_cursors(id, cursor_ids.to_vec());
        self.append_message(&message)
    }

    /// Reads whatever the socket has available and feeds it to the frame
    /// reader.
    ///
    /// On a non-blocking socket with nothing to deliver this is a no-op.
    /// A read of zero bytes means the peer closed the connection.
    pub fn buffer_read(&mut self) -> Result<()> {
        self.check_open()?;

        let blocking = self.flags.contains(ConnectionFlags::BLOCKING);
        let mut scratch = [0u8; READ_CHUNK_SIZE];
        let outcome = match self.stream {
            Some(ref mut stream) => stream.read(&mut scratch),
            None => return Err(OperationError("connection is closed".to_owned())),
        };

        match outcome {
            Ok(0) => {
                let err = Error::EofError;
                self.fail(&err);
                Err(err)
            }
            Ok(n) => match self.reader.feed(&scratch[..n]) {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.fail(&err);
                    Err(err)
                }
            },
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock && !blocking => Ok(()),
            Err(err) => {
                let err = Error::IoError(err);
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Writes as much of the output buffer as the socket accepts.
    ///
    /// Returns `true` once the buffer is empty.
    pub fn buffer_write(&mut self) -> Result<bool> {
        self.check_open()?;

        if self.obuf.is_empty() {
            return Ok(true);
        }

        let blocking = self.flags.contains(ConnectionFlags::BLOCKING);
        let outcome = match self.stream {
            Some(ref mut stream) => stream.write(self.obuf.as_slice()),
            None => return Err(OperationError("connection is closed".to_owned())),
        };

        match outcome {
            Ok(0) => {
                let err = Error::IoError(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                ));
                self.fail(&err);
                Err(err)
            }
            Ok(n) => {
                self.obuf.consume(n);
                Ok(self.obuf.is_empty())
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock && !blocking => Ok(false),
            Err(err) => {
                let err = Error::IoError(err);
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Pulls the next reply out of the frame reader, lifting reader errors
    /// into the connection.
    pub fn reply_from_reader(&mut self) -> Result<Option<Reply>> {
        match self.reader.next_reply() {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Returns the next reply.
    ///
    /// In a blocking context this first checks for unconsumed replies and
    /// returns one if present; otherwise it flushes the output buffer and
    /// reads until a reply arrives. In a non-blocking context it only
    /// drains replies that are already buffered, returning `None` when
    /// more socket input is required.
    pub fn get_reply(&mut self) -> Result<Option<Reply>> {
        if let Some(reply) = self.reply_from_reader()? {
            return Ok(Some(reply));
        }

        if !self.flags.contains(ConnectionFlags::BLOCKING) {
            return Ok(None);
        }

        // Write until done
        let mut done = false;
        while !done {
            done = self.buffer_write()?;
        }

        // Read until there is a reply
        loop {
            self.buffer_read()?;
            if let Some(reply) = self.reply_from_reader()? {
                return Ok(Some(reply));
            }
        }
    }

    fn read_reply(&mut self) -> Result<Reply> {
        match self.get_reply()? {
            Some(reply) => check_reply(reply),
            None => Err(OperationError("no reply available".to_owned())),
        }
    }

    /// Runs a query and blocks until its first reply arrives.
    pub fn query(
        &mut self,
        flags: OpQueryFlags,
        db: &str,
        col: &str,
        number_to_skip: i32,
        number_to_return: i32,
        query: &Document,
        return_field_selector: Option<&Document>,
    ) -> Result<Reply> {
        self.require_blocking()?;
        self.append_query(
            flags,
            db,
            col,
            number_to_skip,
            number_to_return,
            query,
            return_field_selector,
        )?;
        self.read_reply()
    }

    /// Fetches the next batch of an open cursor and blocks for the reply.
    pub fn get_more(
        &mut self,
        db: &str,
        col: &str,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<Reply> {
        self.require_blocking()?;
        self.append_get_more(db, col, number_to_return, cursor_id)?;
        self.read_reply()
    }

    /// Starts a query and returns a cursor over every matching document.
    pub fn find(
        &mut self,
        db: &str,
        col: &str,
        filter: &Document,
        return_field_selector: Option<&Document>,
        batch_size: i32,
    ) -> Result<Cursor> {
        Cursor::new(self, db, col, filter, return_field_selector, batch_size)
    }

    /// Returns at most one matching document.
    pub fn find_one(
        &mut self,
        db: &str,
        col: &str,
        filter: &Document,
        return_field_selector: Option<&Document>,
    ) -> Result<Option<Document>> {
        let mut reply = self.query(
            OpQueryFlags::no_flags(),
            db,
            col,
            0,
            -1,
            filter,
            return_field_selector,
        )?;
        if reply.documents.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reply.documents.remove(0)))
        }
    }

    /// Runs a database command against `<db>.$cmd` and blocks for its
    /// single-document reply.
    pub fn run_command(&mut self, db: &str, command: Document) -> Result<Reply> {
        self.query(OpQueryFlags::no_flags(), db, "$cmd", 0, 1, &command, None)
    }

    /// Runs `listCollections` and returns the raw reply.
    pub fn list_collections(&mut self, db: &str) -> Result<Reply> {
        self.run_command(db, doc! { "listCollections": 1 })
    }

    /// Collects the collection names of a database, streaming every batch
    /// of the listing without issuing get-more requests.
    pub fn collection_names(&mut self, db: &str) -> Result<Vec<String>> {
        self.require_blocking()?;
        self.append_query(
            OpQueryFlags::EXHAUST,
            db,
            "$cmd",
            0,
            1,
            &doc! { "listCollections": 1 },
            None,
        )?;

        let mut names = Vec::new();
        loop {
            let reply = match self.get_reply()? {
                Some(reply) => check_reply(reply)?,
                None => break,
            };
            for doc in &reply.documents {
                if let Ok(name) = doc.get_str("name") {
                    names.push(name.to_owned());
                }
            }
            if reply.cursor_id == 0 {
                break;
            }
        }
        Ok(names)
    }

    /// Drops the database named `db`.
    pub fn drop_database(&mut self, db: &str) -> Result<Reply> {
        self.run_command(db, doc! { "dropDatabase": 1 })
    }

    /// Runs `getLastError`, reporting the outcome of the preceding write
    /// operations on this connection.
    pub fn get_last_error(&mut self, db: &str) -> Result<Reply> {
        self.run_command(db, doc! { "getLastError": 1 })
    }

    /// Flushes the output buffer to the socket, blocking until it drains.
    pub fn flush(&mut self) -> Result<()> {
        let mut done = false;
        while !done {
            done = self.buffer_write()?;
        }
        Ok(())
    }
}
