//! A minimalist client for the legacy MongoDB wire protocol.
//!
//! The crate speaks the pre-OP_MSG opcodes (OP_QUERY, OP_INSERT,
//! OP_UPDATE, OP_DELETE, OP_GET_MORE, OP_KILL_CURSORS, OP_REPLY) over
//! TCP or Unix-domain sockets, through two interfaces sharing one codec:
//!
//! - [`Connection`]: blocking request/response calls, plus a [`Cursor`]
//!   iterator over multi-batch query results;
//! - [`AsyncConnection`]: a non-blocking connection driven by an
//!   external event loop through the [`EventNotifier`] readiness hooks,
//!   dispatching replies to per-request callbacks.
//!
//! Documents are plain [`bson::Document`] values; the crate frames them
//! onto the wire and hands decoded batches back.
//!
//! ```no_run
//! use bson::{bson, doc};
//! use mongowire::Connection;
//!
//! fn main() -> mongowire::Result<()> {
//!     let mut conn = Connection::connect("127.0.0.1", 27017)?;
//!     let reply = conn.run_command("admin", doc! { "ping": 1 })?;
//!     println!("{:?}", reply.documents);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod nonblock;
pub mod reader;
pub mod wire_protocol;

mod net;

#[cfg(feature = "mio")]
pub mod adapters;

pub use crate::connection::{Connection, Stream};
pub use crate::cursor::Cursor;
pub use crate::error::{Error, Result};
pub use crate::net::KEEPALIVE_INTERVAL;
pub use crate::nonblock::{AsyncConnection, EventNotifier};
pub use crate::reader::FrameReader;
pub use crate::wire_protocol::reply::Reply;
