//! Iteration over multi-batch query results.

use bson::Document;
use std::collections::VecDeque;

use crate::connection::Connection;
use crate::error::Result;
use crate::wire_protocol::flags::OpQueryFlags;

/// Iterates the documents of a query on a blocking connection, issuing
/// "get more" requests between batches.
///
/// The server-side cursor is not closed automatically: dropping a
/// partially-consumed cursor leaves it alive until the server's idle
/// timeout. Call [`kill`](Cursor::kill) to release it eagerly.
pub struct Cursor<'a> {
    conn: &'a mut Connection,
    db: String,
    col: String,
    batch_size: i32,
    cursor_id: i64,
    buffer: VecDeque<Document>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        conn: &'a mut Connection,
        db: &str,
        col: &str,
        filter: &Document,
        return_field_selector: Option<&Document>,
        batch_size: i32,
    ) -> Result<Cursor<'a>> {
        let reply = conn.query(
            OpQueryFlags::no_flags(),
            db,
            col,
            0,
            batch_size,
            filter,
            return_field_selector,
        )?;

        Ok(Cursor {
            conn,
            db: db.to_owned(),
            col: col.to_owned(),
            batch_size,
            cursor_id: reply.cursor_id,
            buffer: reply.documents.into_iter().collect(),
        })
    }

    /// The server-assigned cursor id; zero once the cursor is exhausted.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    /// Closes the server-side cursor without consuming the remaining
    /// documents.
    pub fn kill(mut self) -> Result<()> {
        if self.cursor_id == 0 {
            return Ok(());
        }
        let id = self.cursor_id;
        self.cursor_id = 0;
        self.conn.append_kill_cursors(&[id])?;
        // OP_KILL_CURSORS elicits no reply; pushing the frame out is enough.
        self.conn.flush()
    }

    fn load_batch(&mut self) -> Result<()> {
        let reply = self
            .conn
            .get_more(&self.db, &self.col, self.batch_size, self.cursor_id)?;
        self.cursor_id = reply.cursor_id;
        self.buffer.extend(reply.documents);
        Ok(())
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Result<Document>> {
        while self.buffer.is_empty() {
            if self.cursor_id == 0 {
                return None;
            }
            if let Err(err) = self.load_batch() {
                self.cursor_id = 0;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
