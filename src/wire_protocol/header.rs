//! Message headers for client-server communication.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

use crate::error::Error::ResponseError;
use crate::error::Result;

/// Represents an opcode in the MongoDB Wire Protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    /// Maps integer values to opcodes.
    pub fn from_i32(i: i32) -> Option<OpCode> {
        match i {
            1 => Some(OpCode::Reply),
            2001 => Some(OpCode::Update),
            2002 => Some(OpCode::Insert),
            2004 => Some(OpCode::Query),
            2005 => Some(OpCode::GetMore),
            2006 => Some(OpCode::Delete),
            2007 => Some(OpCode::KillCursors),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OpCode::Reply => write!(fmt, "OP_REPLY"),
            OpCode::Update => write!(fmt, "OP_UPDATE"),
            OpCode::Insert => write!(fmt, "OP_INSERT"),
            OpCode::Query => write!(fmt, "OP_QUERY"),
            OpCode::GetMore => write!(fmt, "OP_GET_MORE"),
            OpCode::Delete => write!(fmt, "OP_DELETE"),
            OpCode::KillCursors => write!(fmt, "OP_KILL_CURSORS"),
        }
    }
}

/// Represents a standard message header in the MongoDB Wire Protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// The length of the entire message in bytes, including the header.
    pub message_length: i32,
    /// Identifies the request; assigned by the connection that encodes it.
    pub request_id: i32,
    /// In a reply, the `request_id` of the message being answered.
    pub response_to: i32,
    /// The operation being performed.
    pub op_code: OpCode,
}

impl Header {
    /// The serialized length of a standard header, in bytes.
    pub const LENGTH: i32 = 16;

    /// Constructs a new message header.
    fn new(message_length: i32, request_id: i32, response_to: i32, op_code: OpCode) -> Header {
        Header {
            message_length,
            request_id,
            response_to,
            op_code,
        }
    }

    /// Constructs a new header for an update request.
    pub fn new_update(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::Update)
    }

    /// Constructs a new header for an insertion request.
    pub fn new_insert(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::Insert)
    }

    /// Constructs a new header for a query request.
    pub fn new_query(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::Query)
    }

    /// Constructs a new header for a "get more" request.
    pub fn new_get_more(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::GetMore)
    }

    /// Constructs a new header for a deletion request.
    pub fn new_delete(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::Delete)
    }

    /// Constructs a new header for a "kill cursors" request.
    pub fn new_kill_cursors(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, 0, OpCode::KillCursors)
    }

    /// Writes the serialized header to a buffer.
    ///
    /// All fields are encoded as little-endian 32-bit integers.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        buffer.write_i32::<LittleEndian>(self.message_length)?;
        buffer.write_i32::<LittleEndian>(self.request_id)?;
        buffer.write_i32::<LittleEndian>(self.response_to)?;
        buffer.write_i32::<LittleEndian>(self.op_code as i32)?;
        Ok(())
    }

    /// Reads a serialized header from a buffer.
    ///
    /// Returns the parsed header on success, or an error if the opcode is
    /// not part of the wire protocol.
    pub fn read<R: Read>(buffer: &mut R) -> Result<Header> {
        let message_length = buffer.read_i32::<LittleEndian>()?;
        let request_id = buffer.read_i32::<LittleEndian>()?;
        let response_to = buffer.read_i32::<LittleEndian>()?;

        let op_code_i32 = buffer.read_i32::<LittleEndian>()?;
        let op_code = match OpCode::from_i32(op_code_i32) {
            Some(code) => code,
            None => {
                return Err(ResponseError(format!(
                    "invalid opcode {} in message header",
                    op_code_i32
                )))
            }
        };

        Ok(Header::new(message_length, request_id, response_to, op_code))
    }
}
