//! Wire protocol for the report channel.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::report::FrameReport;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest message accepted from a peer.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Protocol version handshake.
    Hello { version: u8 },
    /// Collated frame.
    Report(FrameReport),
    /// Server is shutting down.
    Goodbye,
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request protocol version.
    Hello,
    /// Clear the call ranking and draw-call counts.
    Reset,
    /// Read this ring slot from now on.
    SelectFrame(u32),
    /// Fold or unfold the call-graph row with this raw path.
    ToggleScope(u64),
    /// Client disconnecting.
    Goodbye,
}

/// Encode a message to bytes with length prefix.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(msg)?;
    let len = u32::try_from(data.len())
        .map_err(|_| ProfilerError::Serialization(format!("message of {} bytes", data.len())))?;
    let mut result = Vec::with_capacity(4 + data.len());
    result.extend_from_slice(&len.to_le_bytes());
    result.extend(data);
    Ok(result)
}

/// Decode a message from bytes (without length prefix).
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

/// Split one complete length-prefixed message off the front of `buf`.
///
/// Returns the payload range and the total bytes consumed, or `None` if
/// `buf` does not hold a whole message yet.
pub fn split_frame(buf: &[u8]) -> Result<Option<(std::ops::Range<usize>, usize)>> {
    let Some(prefix) = buf.get(..4) else {
        return Ok(None);
    };
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(prefix);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProfilerError::Serialization(format!(
            "message of {len} bytes exceeds {MAX_MESSAGE_LEN}"
        )));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    Ok(Some((4..4 + len, 4 + len)))
}

/// Read one length-prefixed message from a blocking stream.
pub fn read_message<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProfilerError::Serialization(format!(
            "message of {len} bytes exceeds {MAX_MESSAGE_LEN}"
        )));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    decode(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::{call_graph, ExpansionState};
    use crate::report::ThreadReport;
    use crate::tree::TreeBuilder;
    use crate::view::ScopeSource;

    #[test]
    fn collated_report_reaches_viewer_intact() {
        let mut tree = TreeBuilder::new(4);
        let update = tree.open("update", 0).unwrap();
        tree.leaf("physics", 2, 8);
        tree.close(update, 10);
        let mut expansion = ExpansionState::new();
        expansion.set_expand_all(true);

        let report = FrameReport {
            frame: 42,
            threads: vec![ThreadReport {
                thread_name: "main".into(),
                scope_count: tree.scope_count(),
                call_graph: call_graph(&tree, &expansion, 20),
                ..ThreadReport::default()
            }],
            ..FrameReport::default()
        };
        let encoded = encode(&ServerMessage::Report(report.clone())).unwrap();
        let prefix = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - 4);

        let received = match read_message::<ServerMessage>(&mut encoded.as_slice()).unwrap() {
            ServerMessage::Report(received) => received,
            other => panic!("expected report, got {other:?}"),
        };
        assert_eq!(received, report);
        let rows: Vec<_> = received.threads[0]
            .call_graph
            .iter()
            .map(|r| (r.name.as_str(), r.depth))
            .collect();
        assert_eq!(rows, [("update", 0), ("physics", 1)]);

        // The viewer folds a row by echoing its path back.
        let path = received.threads[0].call_graph[1].path;
        let toggle = encode(&ClientMessage::ToggleScope(path)).unwrap();
        let echoed: ClientMessage = decode(&toggle[4..]).unwrap();
        assert_eq!(echoed, ClientMessage::ToggleScope(path));
    }

    #[test]
    fn split_frame_waits_for_whole_message() {
        let encoded = encode(&ClientMessage::ToggleScope(7)).unwrap();
        assert!(split_frame(&encoded[..3]).unwrap().is_none());
        assert!(split_frame(&encoded[..encoded.len() - 1]).unwrap().is_none());

        let mut two = encoded.clone();
        two.extend(encode(&ClientMessage::Reset).unwrap());
        let (payload, consumed) = split_frame(&two).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        let first: ClientMessage = decode(&two[payload]).unwrap();
        assert_eq!(first, ClientMessage::ToggleScope(7));
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let bogus = u32::MAX.to_le_bytes();
        assert!(split_frame(&bogus).is_err());
        assert!(read_message::<ClientMessage>(&mut &bogus[..]).is_err());
    }

    #[test]
    fn read_message_from_stream() {
        let encoded = encode(&ClientMessage::SelectFrame(3)).unwrap();
        let msg: ClientMessage = read_message(&mut encoded.as_slice()).unwrap();
        assert_eq!(msg, ClientMessage::SelectFrame(3));
    }
}
