//! Length-prefixed message framing over a reliable byte-stream.
//!
//! Every message on the wire is a 4-byte big-endian unsigned length followed by
//! exactly that many payload bytes. Short reads and writes are retried until the
//! message is complete; a zero-length payload is legal. End-of-stream on the
//! length prefix is the one clean way for a peer to go away and surfaces as
//! [`PokedexError::Disconnected`].

use crate::error::{PokedexError, Result};
use std::io::{self, Read, Write};

/// Reads one complete frame, blocking until the payload is fully received.
///
/// Returns [`PokedexError::Disconnected`] when the stream ends exactly at a
/// frame boundary; end-of-stream anywhere inside a frame is an I/O error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Err(PokedexError::Disconnected);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame length prefix",
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Writes one complete frame, blocking until every byte is flushed.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| PokedexError::StringErr("frame payload too large".to_string()))?;

    // one packet so the prefix and payload leave in a single write
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(payload);
    writer.write_all(&packet)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"REQ_TRAINER_ID 1").unwrap();
        write_frame(&mut wire, b"DONE").unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"REQ_TRAINER_ID 1");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"DONE");
    }

    #[test]
    fn zero_length_payload_is_legal() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"").unwrap();
        assert_eq!(wire, [0, 0, 0, 0]);

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn eof_at_frame_boundary_is_disconnect() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            read_frame(&mut cursor),
            Err(PokedexError::Disconnected)
        ));
    }

    #[test]
    fn eof_inside_prefix_is_an_io_error() {
        let mut cursor = Cursor::new(vec![0u8, 0]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(PokedexError::Io { .. })
        ));
    }

    #[test]
    fn eof_inside_payload_is_an_io_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"SENDING").unwrap();
        wire.truncate(wire.len() - 3);

        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(PokedexError::Io { .. })
        ));
    }
}
