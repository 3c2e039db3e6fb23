//! Incremental framing of a raw TCP byte stream into JSON objects.
//!
//! Clients write bare JSON objects back to back with no length prefix or
//! delimiter. A frame is complete when the brace depth returns to zero after
//! having been opened. Bytes are pushed as they arrive, in any chunking, and
//! the accumulator never blocks.
//!
//! The default [`FrameMode::BraceCount`] counts every `{` and `}` it sees,
//! including those inside string literals, so a payload such as
//! `{"label":"}"}` ends the frame early. All traffic the mock sees is
//! machine generated and never contains such strings.
//! [`FrameMode::QuoteAware`] skips braces inside strings for callers that
//! need it.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Default upper bound on a single buffered frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameMode {
    /// Plain `{`/`}` counting.
    #[default]
    BraceCount,
    /// Ignore braces that appear inside JSON string literals.
    QuoteAware,
}

#[derive(Debug)]
pub struct FrameAccumulator {
    mode: FrameMode,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(FrameMode::default(), DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameAccumulator {
    pub fn new(mode: FrameMode, max_frame_bytes: usize) -> Self {
        Self {
            mode,
            max_frame_bytes: max_frame_bytes.max(2),
            buffer: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Bytes currently held for an incomplete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Push a chunk of bytes, returning every frame it completes in order.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        chunk
            .iter()
            .filter_map(|&byte| self.push_byte(byte))
            .collect()
    }

    /// Push a single byte. Returns the frame it completes, if any.
    pub fn push_byte(&mut self, byte: u8) -> Option<String> {
        if self.depth == 0 && byte.is_ascii_whitespace() {
            // Whitespace between frames, e.g. a client that newline-terminates.
            return None;
        }

        self.buffer.push(byte);

        if self.mode == FrameMode::QuoteAware && self.track_string(byte) {
            return self.check_size();
        }

        match byte {
            b'{' => self.depth += 1,
            // A stray closing brace before any opening one is kept as noise
            // and surfaces as a decode error once the next frame completes.
            b'}' if self.depth > 0 => {
                self.depth -= 1;
                if self.depth == 0 {
                    return Some(self.take_frame());
                }
            }
            _ => {}
        }

        self.check_size()
    }

    /// Drop any partially buffered frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Returns true while `byte` belongs to (or delimits) a string literal.
    fn track_string(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return true;
        }
        if byte == b'"' && self.depth > 0 {
            self.in_string = true;
            return true;
        }
        false
    }

    fn check_size(&mut self) -> Option<String> {
        if self.buffer.len() > self.max_frame_bytes {
            warn!(
                buffered = self.buffer.len(),
                limit = self.max_frame_bytes,
                "frame exceeds size limit, dropping buffered input"
            );
            self.reset();
        }
        None
    }

    fn take_frame(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        self.reset();
        let frame = match String::from_utf8(bytes) {
            Ok(frame) => frame,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };
        trace!(frame = %frame, "frame complete");
        frame
    }
}
