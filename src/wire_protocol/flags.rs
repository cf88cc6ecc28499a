//! Operation flag bit vectors defined by the wire protocol.

use bitflags::bitflags;

bitflags! {
    /// Represents the bit vector of flags in an OP_REPLY message.
    pub struct OpReplyFlags: i32 {
        /// The cursor referenced by a get-more request no longer exists.
        const CURSOR_NOT_FOUND  = 0b00000001;
        /// The query failed; the reply holds a single `$err` document.
        const QUERY_FAILURE     = 0b00000010;
        /// The server supports the AWAIT_DATA query option.
        const AWAIT_CAPABLE     = 0b00001000;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_UPDATE message.
    pub struct OpUpdateFlags: i32 {
        /// Insert the supplied document if no document matches the selector.
        const UPSERT = 0b00000001;
        /// Update every matching document, not just the first.
        const MULTI  = 0b00000010;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_INSERT message.
    pub struct OpInsertFlags: i32 {
        /// Keep inserting remaining documents after an individual failure.
        const CONTINUE_ON_ERROR = 0b00000001;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_QUERY message.
    pub struct OpQueryFlags: i32 {
        /// Leave the cursor open after the first batch is exhausted.
        const TAILABLE_CURSOR   = 0b00000010;
        /// Allow the query to run against a replica slave.
        const SLAVE_OK          = 0b00000100;
        /// Internal replication use only.
        const OPLOG_REPLAY      = 0b00001000;
        /// Keep the server cursor alive past the idle timeout.
        const NO_CURSOR_TIMEOUT = 0b00010000;
        /// Block at the end of a tailable cursor until data arrives.
        const AWAIT_DATA        = 0b00100000;
        /// Stream every batch back without waiting for get-more requests.
        const EXHAUST           = 0b01000000;
        /// Accept partial results when a shard is down.
        const PARTIAL           = 0b10000000;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_DELETE message.
    pub struct OpDeleteFlags: i32 {
        /// Remove only the first matching document.
        const SINGLE_REMOVE = 0b00000001;
    }
}

impl OpReplyFlags {
    /// Constructs a flag set from the bits of a reply, ignoring unknown bits.
    pub fn from_i32(i: i32) -> OpReplyFlags {
        OpReplyFlags::from_bits_truncate(i)
    }
}

impl OpUpdateFlags {
    /// Constructs a new struct with no flags set.
    pub fn no_flags() -> OpUpdateFlags {
        OpUpdateFlags::empty()
    }
}

impl OpInsertFlags {
    /// Constructs a new struct with no flags set.
    pub fn no_flags() -> OpInsertFlags {
        OpInsertFlags::empty()
    }
}

impl OpQueryFlags {
    /// Constructs a new struct with no flags set.
    pub fn no_flags() -> OpQueryFlags {
        OpQueryFlags::empty()
    }
}

impl OpDeleteFlags {
    /// Constructs a new struct with no flags set.
    pub fn no_flags() -> OpDeleteFlags {
        OpDeleteFlags::empty()
    }
}
