//! Wire protocol request construction.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::mem;

use crate::error::Error::ArgumentError;
use crate::error::Result;
use crate::wire_protocol::flags::{OpDeleteFlags, OpInsertFlags, OpQueryFlags, OpUpdateFlags};
use crate::wire_protocol::header::Header;

/// Represents a client request message in the MongoDB Wire Protocol.
///
/// Documents are carried as raw BSON bytes, including their own
/// little-endian length prefix, exactly as they appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpUpdate {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// A bit vector of update options.
        flags: OpUpdateFlags,
        /// Identifies the document(s) to be updated.
        selector: Vec<u8>,
        /// Instruction document for how to update the document(s).
        update: Vec<u8>,
    },
    OpInsert {
        /// The message header.
        header: Header,
        /// A bit vector of insert options.
        flags: OpInsertFlags,
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The documents to be inserted.
        documents: Vec<Vec<u8>>,
    },
    OpQuery {
        /// The message header.
        header: Header,
        /// A bit vector of query options.
        flags: OpQueryFlags,
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The number of initial documents to skip over in the query results.
        number_to_skip: i32,
        /// The total number of documents that should be returned by the query.
        number_to_return: i32,
        /// Specifies which documents to return.
        query: Vec<u8>,
        /// An optional projection of which fields should be present in the
        /// documents to be returned by the query.
        return_field_selector: Option<Vec<u8>>,
    },
    OpGetMore {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The total number of documents that should be returned by the query.
        number_to_return: i32,
        /// Uniquely identifies the cursor being iterated.
        cursor_id: i64,
    },
    OpDelete {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// A bit vector of delete options.
        flags: OpDeleteFlags,
        /// Identifies the document(s) to be removed.
        selector: Vec<u8>,
    },
    OpKillCursors {
        /// The message header.
        header: Header,
        // The wire protocol specifies a 32-bit 0 field followed by the
        // cursor count here.
        /// The server cursors to close.
        cursor_ids: Vec<i64>,
    },
}

// A namespace is written as a NUL-terminated cstring; an interior NUL
// would truncate the frame on the server side.
fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.as_bytes().contains(&0) {
        return Err(ArgumentError(format!(
            "namespace '{}' contains an interior NUL byte",
            namespace.escape_default()
        )));
    }
    Ok(())
}

impl Message {
    /// Constructs a new message request for an update.
    pub fn new_update(
        request_id: i32,
        namespace: String,
        flags: OpUpdateFlags,
        selector: Vec<u8>,
        update: Vec<u8>,
    ) -> Result<Message> {
        validate_namespace(&namespace)?;

        // Add an extra byte after the string for null-termination.
        let string_length = namespace.len() as i32 + 1;

        // There are two i32 fields: the wire protocol-specified ZERO field,
        // and `flags`, represented in the struct as a bit vector.
        let i32_length = 2 * mem::size_of::<i32>() as i32;

        let selector_length = selector.len() as i32;
        let update_length = update.len() as i32;

        let total_length =
            Header::LENGTH + string_length + i32_length + selector_length + update_length;

        let header = Header::new_update(total_length, request_id);

        Ok(Message::OpUpdate {
            header,
            namespace,
            flags,
            selector,
            update,
        })
    }

    /// Constructs a new message request for an insertion.
    pub fn new_insert(
        request_id: i32,
        flags: OpInsertFlags,
        namespace: String,
        documents: Vec<Vec<u8>>,
    ) -> Result<Message> {
        validate_namespace(&namespace)?;

        let flags_length = mem::size_of::<i32>() as i32;

        // Add an extra byte after the string for null-termination.
        let string_length = namespace.len() as i32 + 1;

        let mut total_length = Header::LENGTH + flags_length + string_length;
        for doc in &documents {
            total_length += doc.len() as i32;
        }

        let header = Header::new_insert(total_length, request_id);

        Ok(Message::OpInsert {
            header,
            flags,
            namespace,
            documents,
        })
    }

    /// Constructs a new message request for a query.
    pub fn new_query(
        request_id: i32,
        flags: OpQueryFlags,
        namespace: String,
        number_to_skip: i32,
        number_to_return: i32,
        query: Vec<u8>,
        return_field_selector: Option<Vec<u8>>,
    ) -> Result<Message> {
        validate_namespace(&namespace)?;

        // There are three i32 fields in an OpQuery (since OpQueryFlags is
        // represented as a 32-bit vector in the wire protocol).
        let i32_length = 3 * mem::size_of::<i32>() as i32;

        // Add an extra byte after the string for null-termination.
        let string_length = namespace.len() as i32 + 1;

        let bson_length = query.len() as i32;

        // Add the length of the optional BSON document only if it exists.
        let option_length = match return_field_selector {
            Some(ref bson) => bson.len() as i32,
            None => 0,
        };

        let total_length =
            Header::LENGTH + i32_length + string_length + bson_length + option_length;

        let header = Header::new_query(total_length, request_id);

        Ok(Message::OpQuery {
            header,
            flags,
            namespace,
            number_to_skip,
            number_to_return,
            query,
            return_field_selector,
        })
    }

    /// Constructs a new "get more" request message.
    pub fn new_get_more(
        request_id: i32,
        namespace: String,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<Message> {
        validate_namespace(&namespace)?;

        // There are two i32 fields because of the reserved "ZERO".
        let i32_length = 2 * mem::size_of::<i32>() as i32;

        // Add an extra byte after the string for null-termination.
        let string_length = namespace.len() as i32 + 1;

        let i64_length = mem::size_of::<i64>() as i32;
        let total_length = Header::LENGTH + i32_length + string_length + i64_length;

        let header = Header::new_get_more(total_length, request_id);

        Ok(Message::OpGetMore {
            header,
            namespace,
            number_to_return,
            cursor_id,
        })
    }

    /// Constructs a new message request for a deletion.
    pub fn new_delete(
        request_id: i32,
        namespace: String,
        flags: OpDeleteFlags,
        selector: Vec<u8>,
    ) -> Result<Message> {
        validate_namespace(&namespace)?;

        // There are two i32 fields: the reserved "ZERO" and `flags`.
        let i32_length = 2 * mem::size_of::<i32>() as i32;

        // Add an extra byte after the string for null-termination.
        let string_length = namespace.len() as i32 + 1;

        let selector_length = selector.len() as i32;

        let total_length = Header::LENGTH + i32_length + string_length + selector_length;

        let header = Header::new_delete(total_length, request_id);

        Ok(Message::OpDelete {
            header,
            namespace,
            flags,
            selector,
        })
    }

    /// Constructs a new "kill cursors" request message.
    pub fn new_kill_cursors(request_id: i32, cursor_ids: Vec<i64>) -> Message {
        // The reserved "ZERO" and the cursor count.
        let i32_length = 2 * mem::size_of::<i32>() as i32;
        let ids_length = (cursor_ids.len() * mem::size_of::<i64>()) as i32;

        let total_length = Header::LENGTH + i32_length + ids_length;

        let header = Header::new_kill_cursors(total_length, request_id);

        Message::OpKillCursors { header, cursor_ids }
    }

    /// The request id assigned to this message.
    pub fn request_id(&self) -> i32 {
        match *self {
            Message::OpUpdate { ref header, .. }
            | Message::OpInsert { ref header, .. }
            | Message::OpQuery { ref header, .. }
            | Message::OpGetMore { ref header, .. }
            | Message::OpDelete { ref header, .. }
            | Message::OpKillCursors { ref header, .. } => header.request_id,
        }
    }

    /// Writes a serialized update message to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `namespace` - The full qualified name of the collection, beginning with
    ///               the database name and a dot.
    /// `flags` - Bit vector of update options.
    /// `selector` - Identifies the document(s) to be updated.
    /// `update` - Instructs how to update the document(s).
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_update<W: Write>(
        buffer: &mut W,
        header: &Header,
        namespace: &str,
        flags: &OpUpdateFlags,
        selector: &[u8],
        update: &[u8],
    ) -> Result<()> {
        header.write(buffer)?;

        // Write ZERO field
        buffer.write_i32::<LittleEndian>(0)?;

        for byte in namespace.bytes() {
            buffer.write_u8(byte)?;
        }

        // Writes the null terminator for the collection name string.
        buffer.write_u8(0)?;

        buffer.write_i32::<LittleEndian>(flags.bits())?;

        buffer.write_all(selector)?;
        buffer.write_all(update)?;

        let _ = buffer.flush();
        Ok(())
    }

    /// Writes a serialized insertion message to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `flags` - Bit vector of insert options.
    /// `namespace` - The full qualified name of the collection, beginning with
    ///               the database name and a dot.
    /// `documents` - The documents to insert.
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_insert<W: Write>(
        buffer: &mut W,
        header: &Header,
        flags: &OpInsertFlags,
        namespace: &str,
        documents: &[Vec<u8>],
    ) -> Result<()> {
        header.write(buffer)?;
        buffer.write_i32::<LittleEndian>(flags.bits())?;

        for byte in namespace.bytes() {
            buffer.write_u8(byte)?;
        }

        // Writes the null terminator for the collection name string.
        buffer.write_u8(0)?;

        for doc in documents {
            buffer.write_all(doc)?;
        }

        let _ = buffer.flush();
        Ok(())
    }

    /// Writes a serialized query message to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `flags` - Bit vector of query options.
    /// `namespace` - The full qualified name of the collection, beginning with
    ///               the database name and a dot.
    /// `number_to_skip` - The number of initial documents to skip over in the
    ///                    query results.
    /// `number_to_return` - The total number of documents that should be
    ///                      returned by the query.
    /// `query` - Specifies which documents to return.
    /// `return_field_selector` - An optional projection of which fields should
    ///                           be present in the documents to be returned by
    ///                           the query.
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_query<W: Write>(
        buffer: &mut W,
        header: &Header,
        flags: &OpQueryFlags,
        namespace: &str,
        number_to_skip: i32,
        number_to_return: i32,
        query: &[u8],
        return_field_selector: &Option<Vec<u8>>,
    ) -> Result<()> {
        header.write(buffer)?;
        buffer.write_i32::<LittleEndian>(flags.bits())?;

        for byte in namespace.bytes() {
            buffer.write_u8(byte)?;
        }

        // Writes the null terminator for the collection name string.
        buffer.write_u8(0)?;

        buffer.write_i32::<LittleEndian>(number_to_skip)?;
        buffer.write_i32::<LittleEndian>(number_to_return)?;
        buffer.write_all(query)?;

        if let Some(ref doc) = *return_field_selector {
            buffer.write_all(doc)?;
        }

        let _ = buffer.flush();
        Ok(())
    }

    /// Writes a serialized "get more" request to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `namespace` - The full qualified name of the collection, beginning with
    ///               the database name and a dot.
    /// `number_to_return` - The total number of documents that should be
    ///                      returned by the query.
    /// `cursor_id` - Specifies which cursor to get more documents from.
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_get_more<W: Write>(
        buffer: &mut W,
        header: &Header,
        namespace: &str,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<()> {
        header.write(buffer)?;

        // Write ZERO field
        buffer.write_i32::<LittleEndian>(0)?;

        for byte in namespace.bytes() {
            buffer.write_u8(byte)?;
        }

        // Writes the null terminator for the collection name string.
        buffer.write_u8(0)?;

        buffer.write_i32::<LittleEndian>(number_to_return)?;
        buffer.write_i64::<LittleEndian>(cursor_id)?;

        let _ = buffer.flush();
        Ok(())
    }

    /// Writes a serialized deletion message to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `namespace` - The full qualified name of the collection, beginning with
    ///               the database name and a dot.
    /// `flags` - Bit vector of delete options.
    /// `selector` - Identifies the document(s) to be removed.
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_delete<W: Write>(
        buffer: &mut W,
        header: &Header,
        namespace: &str,
        flags: &OpDeleteFlags,
        selector: &[u8],
    ) -> Result<()> {
        header.write(buffer)?;

        // Write ZERO field
        buffer.write_i32::<LittleEndian>(0)?;

        for byte in namespace.bytes() {
            buffer.write_u8(byte)?;
        }

        // Writes the null terminator for the collection name string.
        buffer.write_u8(0)?;

        buffer.write_i32::<LittleEndian>(flags.bits())?;
        buffer.write_all(selector)?;

        let _ = buffer.flush();
        Ok(())
    }

    /// Writes a serialized "kill cursors" request to a given buffer.
    ///
    /// # Arguments
    ///
    /// `buffer` - The buffer to write to.
    /// `header` - The header for the given message.
    /// `cursor_ids` - The server cursors to close.
    ///
    /// # Return value
    ///
    /// Returns nothing on success, or an Error on failure.
    fn write_kill_cursors<W: Write>(
        buffer: &mut W,
        header: &Header,
        cursor_ids: &[i64],
    ) -> Result<()> {
        header.write(buffer)?;

        // Write ZERO field
        buffer.write_i32::<LittleEndian>(0)?;

        buffer.write_i32::<LittleEndian>(cursor_ids.len() as i32)?;
        for id in cursor_ids {
            buffer.write_i64::<LittleEndian>(*id)?;
        }

        let _ = buffer.flush();
        Ok(())
    }

    /// Attempts to write the serialized message to a buffer.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Message::OpUpdate {
                ref header,
                ref namespace,
                ref flags,
                ref selector,
                ref update,
            } => Message::write_update(buffer, header, namespace, flags, selector, update),
            Message::OpInsert {
                ref header,
                ref flags,
                ref namespace,
                ref documents,
            } => Message::write_insert(buffer, header, flags, namespace, documents),
            Message::OpQuery {
                ref header,
                ref flags,
                ref namespace,
                number_to_skip,
                number_to_return,
                ref query,
                ref return_field_selector,
            } => Message::write_query(
                buffer,
                header,
                flags,
                namespace,
                number_to_skip,
                number_to_return,
                query,
                return_field_selector,
            ),
            Message::OpGetMore {
                ref header,
                ref namespace,
                number_to_return,
                cursor_id,
            } => Message::write_get_more(buffer, header, namespace, number_to_return, cursor_id),
            Message::OpDelete {
                ref header,
                ref namespace,
                ref flags,
                ref selector,
            } => Message::write_delete(buffer, header, namespace, flags, selector),
            Message::OpKillCursors {
                ref header,
                ref cursor_ids,
            } => Message::write_kill_cursors(buffer, header, cursor_ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Message;
    use crate::wire_protocol::flags::OpQueryFlags;

    #[test]
    fn interior_nul_in_namespace_is_rejected() {
        let res = Message::new_query(
            1,
            OpQueryFlags::no_flags(),
            "test\0oops.$cmd".to_owned(),
            0,
            1,
            Vec::new(),
            None,
        );
        assert!(res.is_err());
    }
}
