//! Shared fixtures for the integration tests: server-side frame
//! encoding and decoding over plain streams.

#![allow(dead_code)]

use bson::Document;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};

use mongowire::Connection;

/// Encodes an OP_REPLY frame the way a server would.
pub fn reply_frame(response_to: i32, flags: i32, cursor_id: i64, docs: &[Document]) -> Vec<u8> {
    let mut body = Vec::new();
    for doc in docs {
        bson::encode_document(&mut body, doc).unwrap();
    }

    let mut frame = Vec::new();
    frame
        .write_i32::<LittleEndian>(36 + body.len() as i32)
        .unwrap();
    frame.write_i32::<LittleEndian>(90).unwrap(); // server-assigned requestID
    frame.write_i32::<LittleEndian>(response_to).unwrap();
    frame.write_i32::<LittleEndian>(1).unwrap(); // OP_REPLY
    frame.write_i32::<LittleEndian>(flags).unwrap();
    frame.write_i64::<LittleEndian>(cursor_id).unwrap();
    frame.write_i32::<LittleEndian>(0).unwrap(); // startingFrom
    frame.write_i32::<LittleEndian>(docs.len() as i32).unwrap();
    frame.extend_from_slice(&body);
    frame
}

/// Reads one length-prefixed request frame off a stream.
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = i32::from_le_bytes(len_buf) as usize;

    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&len_buf);
    stream.read_exact(&mut frame[4..])?;
    Ok(frame)
}

/// The request id a request frame carries in bytes 4..8.
pub fn request_id(frame: &[u8]) -> i32 {
    i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]])
}

/// The opcode a frame carries in bytes 12..16.
pub fn op_code(frame: &[u8]) -> i32 {
    i32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]])
}

/// A blocking client connection paired with the server end of its socket.
pub fn connected_pair() -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (Connection::from_tcp_stream(client), server)
}
