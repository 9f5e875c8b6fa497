//! Mixed ASCII/binary stream separation
//!
//! The receiver interleaves NMEA sentences with RISE frames on one wire.
//! A `'$'` switches to line mode until the next `'\n'`; everything else goes
//! through the frame parser. Bytes the parser throws away while hunting for
//! sync are kept as text, so plain replies without a leading `'$'` still
//! surface as lines.
//!
//! A payload byte equal to `'$'` inside a frame also switches to line mode.
//! That frame is then lost.

use crate::protocol::{FrameParser, ParserState, SYNC1};

const LINE_START: u8 = b'$';
const LINE_END: u8 = b'\n';

/// Something the demultiplexer recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A complete raw frame
    Frame(Vec<u8>),
    /// A complete, non-empty text line without its CR/LF
    Line(String),
}

/// Splits a byte stream into frames and text lines
#[derive(Debug, Default)]
pub struct StreamDemux {
    parser: FrameParser,
    line: Vec<u8>,
    in_line: bool,
}

impl StreamDemux {
    /// Create a demultiplexer with a fresh parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes collected toward the next line
    pub fn pending_line(&self) -> &[u8] {
        &self.line
    }

    /// Process a chunk and return what completed, in arrival order
    pub fn feed(&mut self, data: &[u8]) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        for &byte in data {
            self.push(byte, &mut events);
        }
        events
    }

    fn push(&mut self, byte: u8, events: &mut Vec<DemuxEvent>) {
        if self.in_line {
            self.line.push(byte);
            if byte == LINE_END {
                self.in_line = false;
                self.flush_lines(events);
            }
            return;
        }

        if byte == LINE_START {
            self.in_line = true;
            self.line.push(byte);
            return;
        }

        let before = self.parser.state();
        if let Some(frame) = self.parser.take_frame(byte) {
            events.push(DemuxEvent::Frame(frame));
            return;
        }

        if self.parser.state() == ParserState::WaitSync1 {
            match before {
                ParserState::WaitSync1 if byte != SYNC1 => self.line.push(byte),
                ParserState::WaitSync2 => {
                    self.line.push(SYNC1);
                    self.line.push(byte);
                }
                _ => {}
            }
            if byte == LINE_END {
                self.flush_lines(events);
            }
        }
    }

    fn flush_lines(&mut self, events: &mut Vec<DemuxEvent>) {
        while let Some(pos) = self.line.iter().position(|&b| b == LINE_END) {
            let raw: Vec<u8> = self.line.drain(..=pos).collect();
            let text: String = raw
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect();
            let text = text.trim_end_matches(['\r', '\n']);
            if !text.is_empty() {
                events.push(DemuxEvent::Line(text.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use pretty_assertions::assert_eq;

    fn line(s: &str) -> DemuxEvent {
        DemuxEvent::Line(s.to_string())
    }

    #[test]
    fn test_nmea_and_frame_interleaved() {
        let frame = encode(0x0001, 0x6A, &[1, 2]).unwrap();
        let mut data = b"$GPGGA,1*00\r\n".to_vec();
        data.extend_from_slice(&frame);
        data.extend_from_slice(b"$GPRMC,2*00\r\n");

        let mut demux = StreamDemux::new();
        assert_eq!(
            demux.feed(&data),
            vec![
                line("$GPGGA,1*00"),
                DemuxEvent::Frame(frame),
                line("$GPRMC,2*00"),
            ]
        );
    }

    #[test]
    fn test_plain_text_reply_surfaces_as_line() {
        let mut demux = StreamDemux::new();
        assert_eq!(demux.feed(b"OK\r\n"), vec![line("OK")]);
    }

    #[test]
    fn test_failed_sync_keeps_both_bytes() {
        let mut demux = StreamDemux::new();
        assert_eq!(demux.feed(b"RX\n"), vec![line("RX")]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut demux = StreamDemux::new();
        assert!(demux.feed(b"$GPG").is_empty());
        assert_eq!(demux.pending_line(), b"$GPG");
        assert_eq!(demux.feed(b"SV*00\n"), vec![line("$GPGSV*00")]);
        assert!(demux.pending_line().is_empty());
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut demux = StreamDemux::new();
        assert!(demux.feed(b"\r\n\n").is_empty());
    }

    #[test]
    fn test_dollar_inside_frame_switches_to_line_mode() {
        let frame = encode(0x0001, 0x6A, b"$").unwrap();
        let mut demux = StreamDemux::new();
        let events = demux.feed(&frame);
        assert!(!events.iter().any(|e| matches!(e, DemuxEvent::Frame(_))));
    }
}
