//! OP_REPLY frame parsing.

use bson::Document;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::Error::ResponseError;
use crate::error::Result;
use crate::wire_protocol::flags::OpReplyFlags;
use crate::wire_protocol::header::{Header, OpCode};

/// The serialized length of the fixed OP_REPLY fields behind the header.
const PREAMBLE_LENGTH: i32 = 20;

/// A decoded OP_REPLY message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The message header.
    pub header: Header,
    /// A bit vector of reply options.
    pub flags: OpReplyFlags,
    /// Uniquely identifies the cursor being returned; zero once the server
    /// cursor is exhausted.
    pub cursor_id: i64,
    /// The starting position within the cursor.
    pub starting_from: i32,
    /// The total number of documents being returned.
    pub number_returned: i32,
    /// The documents in this batch.
    pub documents: Vec<Document>,
}

impl Reply {
    /// Parses a reply from one complete frame of exactly `messageLength`
    /// bytes, as produced by the frame reader.
    ///
    /// # Return value
    ///
    /// Returns the decoded reply, or an error when the opcode is not
    /// OP_REPLY, the document stream is truncated, or trailing bytes
    /// remain after the declared document count.
    pub fn from_frame(frame: &[u8]) -> Result<Reply> {
        if (frame.len() as i32) < Header::LENGTH + PREAMBLE_LENGTH {
            return Err(ResponseError(format!(
                "reply frame of {} bytes is too short to hold a reply header",
                frame.len()
            )));
        }

        let mut buffer = Cursor::new(frame);
        let header = Header::read(&mut buffer)?;

        if header.op_code != OpCode::Reply {
            return Err(ResponseError(format!(
                "expected to read OP_REPLY but instead found opcode {}",
                header.op_code
            )));
        }

        if header.message_length as usize != frame.len() {
            return Err(ResponseError(format!(
                "reply header declares {} bytes but the frame holds {}",
                header.message_length,
                frame.len()
            )));
        }

        let flags = buffer.read_i32::<LittleEndian>()?;
        let cursor_id = buffer.read_i64::<LittleEndian>()?;
        let starting_from = buffer.read_i32::<LittleEndian>()?;
        let number_returned = buffer.read_i32::<LittleEndian>()?;

        if number_returned < 0 {
            return Err(ResponseError(format!(
                "reply declares a negative document count {}",
                number_returned
            )));
        }

        // The smallest BSON document is five bytes; a count that cannot fit
        // in the remaining frame is corrupt without reading further.
        let remaining = frame.len() - buffer.position() as usize;
        if number_returned as usize > remaining / 5 {
            return Err(ResponseError(format!(
                "reply declares {} documents but only {} bytes follow",
                number_returned, remaining
            )));
        }

        let mut documents = Vec::with_capacity(number_returned as usize);
        for _ in 0..number_returned {
            let document = bson::decode_document(&mut buffer)?;
            documents.push(document);
        }

        if (buffer.position() as usize) < frame.len() {
            return Err(ResponseError(format!(
                "{} trailing bytes after the last reply document",
                frame.len() - buffer.position() as usize
            )));
        }

        Ok(Reply {
            header,
            flags: OpReplyFlags::from_i32(flags),
            cursor_id,
            starting_from,
            number_returned,
            documents,
        })
    }

    /// The request id this reply answers.
    pub fn response_to(&self) -> i32 {
        self.header.response_to
    }

    /// Whether the server signalled a failed query; the batch then holds a
    /// single document with an `$err` string.
    pub fn is_query_failure(&self) -> bool {
        self.flags.contains(OpReplyFlags::QUERY_FAILURE)
    }

    /// Whether the server reported the requested cursor as already gone.
    pub fn is_cursor_not_found(&self) -> bool {
        self.flags.contains(OpReplyFlags::CURSOR_NOT_FOUND)
    }
}
