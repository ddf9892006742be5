//! ffmpeg stderr handling
//!
//! ffmpeg writes its banner, stream descriptions and progress to stderr.
//! Progress lines end in `\r` rather than `\n`, so both count as line ends.

use std::collections::VecDeque;

/// Longer lines are split at this many bytes
const MAX_LINE_BYTES: usize = 4096;

/// Splits a byte stream into lines on `\r` or `\n`
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every completed non-empty line
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                if self.pending.len() >= MAX_LINE_BYTES {
                    self.flush_into(&mut lines);
                }
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Return the trailing partial line, if any
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

/// Bounded buffer of the most recent stderr lines
#[derive(Debug)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Tracks stream descriptions to find the output video size
///
/// ffmpeg prints `Input #0` and `Output #0` sections, each followed by
/// `Stream #0:0: Video: ..., 640x480 ...` lines. Only the output section
/// describes what viewers receive.
#[derive(Debug, Default)]
pub struct OutputProbe {
    in_output: bool,
    reported: bool,
}

impl OutputProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one stderr line, returning the output size the first time it is seen
    pub fn inspect(&mut self, line: &str) -> Option<(u16, u16)> {
        if line.starts_with("Output #") {
            self.in_output = true;
            return None;
        }
        if line.starts_with("Input #") {
            self.in_output = false;
            return None;
        }
        if !self.in_output || self.reported {
            return None;
        }

        let size = parse_video_size(line)?;
        self.reported = true;
        Some(size)
    }
}

/// Extract `WIDTHxHEIGHT` from an ffmpeg `Stream ... Video:` line
pub fn parse_video_size(line: &str) -> Option<(u16, u16)> {
    let (_, description) = line.split_once("Video:")?;

    description
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|token| {
            let (w, h) = token.split_once('x')?;
            if w.is_empty() || h.is_empty() {
                return None;
            }
            if !w.bytes().all(|b| b.is_ascii_digit()) || !h.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let width: u16 = w.parse().ok()?;
            let height: u16 = h.parse().ok()?;
            (width > 0 && height > 0).then_some((width, height))
        })
        .next()
}
