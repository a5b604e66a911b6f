//! Incremental Server-Sent-Events decoder for streaming completions.
//!
//! Providers frame streaming responses as `data: <json>` records
//! separated by blank lines, terminated by a literal `[DONE]` line or a
//! family-specific terminator event. The decoder owns the byte buffer;
//! the adapter feeds it network chunks and drains complete records.

/// One decoded `data:` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// JSON payload following `data: `
    Data(String),
    /// The literal `[DONE]` terminator
    Done,
}

/// Buffering line decoder. Network chunks can split records anywhere,
/// including mid-UTF-8; undecodable trailing bytes stay buffered until
/// the next chunk completes them.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and drain every complete record.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']).trim();

            let payload = match line.strip_prefix("data:") {
                Some(rest) => rest.trim_start(),
                // Blank separators, comments, and `event:` lines carry
                // no payload we act on.
                None => continue,
            };

            if payload == "[DONE]" {
                records.push(SseRecord::Done);
            } else if !payload.is_empty() {
                records.push(SseRecord::Data(payload.to_string()));
            }
        }
        records
    }
}
