//! Newline-delimited frame splitting for byte-stream transports.
//!
//! Stream reads deliver arbitrary byte fragments; a JSON-RPC message only
//! becomes complete once a newline is observed. `LineBuffer` is the small
//! explicit state machine for that: it accumulates bytes and emits every
//! complete frame, keeping the unterminated tail for the next read.
//!
//! The type performs no I/O so the split logic can be tested without any
//! pipe or socket behind it.

/// Accumulates stream fragments and emits complete newline-terminated frames.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends `chunk` and returns every frame completed by it.
    ///
    /// Frames are split on `\n`; a trailing `\r` is stripped. Blank frames
    /// are skipped. A frame whose bytes are not valid UTF-8 is dropped with
    /// a warning rather than poisoning the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
            frame.pop(); // the newline
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }

            match String::from_utf8(frame) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        frames.push(line);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping non-UTF-8 frame");
                }
            }
        }

        frames
    }

    /// Returns the number of buffered bytes awaiting a delimiter.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_frame() {
        let mut buf = LineBuffer::new();
        let frames = buf.push(b"{\"a\":1}\n");
        assert_eq!(frames, vec!["{\"a\":1}"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn frame_split_across_reads() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"method\":").is_empty());
        assert!(buf.push(b"\"ping\"}").is_empty());
        let frames = buf.push(b"\n");
        assert_eq!(frames, vec!["{\"method\":\"ping\"}"]);
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut buf = LineBuffer::new();
        let frames = buf.push(b"one\ntwo\nthree");
        assert_eq!(frames, vec!["one", "two"]);
        assert_eq!(buf.pending_len(), 5);

        let frames = buf.push(b"\n");
        assert_eq!(frames, vec!["three"]);
    }

    #[test]
    fn carriage_return_stripped() {
        let mut buf = LineBuffer::new();
        let frames = buf.push(b"hello\r\nworld\r\n");
        assert_eq!(frames, vec!["hello", "world"]);
    }

    #[test]
    fn blank_frames_skipped() {
        let mut buf = LineBuffer::new();
        let frames = buf.push(b"\n  \nreal\n\n");
        assert_eq!(frames, vec!["real"]);
    }

    #[test]
    fn non_utf8_frame_dropped() {
        let mut buf = LineBuffer::new();
        let frames = buf.push(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']);
        assert_eq!(frames, vec!["ok"]);
    }

    #[test]
    fn tail_retained_across_many_pushes() {
        let mut buf = LineBuffer::new();
        for byte in b"abcdef" {
            assert!(buf.push(&[*byte]).is_empty());
        }
        let frames = buf.push(b"\n");
        assert_eq!(frames, vec!["abcdef"]);
    }
}
