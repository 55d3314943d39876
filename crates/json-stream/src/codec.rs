use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::error::JsonStreamError;

/// Splits a byte stream of concatenated JSON values into individual values.
///
/// The codec never parses partial input. It scans for the end of the current
/// top-level value by tracking nesting depth and string/escape state, and
/// keeps its cursor between calls so bytes that arrived in earlier reads are
/// not scanned twice. Only when the depth returns to zero is the span handed
/// to `serde_json`.
///
/// Whitespace between values is ignored. Bare scalars (`42`, `true`, `null`)
/// are terminated by the next whitespace or structural byte, or by
/// [`Decoder::decode_eof`].
#[derive(Debug, Default, Clone)]
pub struct JsonStreamCodec {
    state: ScanState,
    max_value_len: Option<usize>,
}

/// Saved scanner position for the value currently being buffered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScanState {
    /// Bytes of the current value already scanned.
    scanned: usize,
    /// Open `{`/`[` count.
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// The current value is a bare number/literal.
    scalar: bool,
    /// A value has started at offset 0 of the buffer.
    started: bool,
}

enum Scan {
    Complete(usize),
    Incomplete,
}

impl JsonStreamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the buffered size of a single value.
    pub fn with_max_value_len(limit: usize) -> Self {
        Self {
            state: ScanState::default(),
            max_value_len: Some(limit),
        }
    }

    /// Depth of the value currently being buffered. Zero between values.
    pub fn depth(&self) -> usize {
        self.state.depth
    }

    /// Whether a value has been partially received.
    pub fn is_mid_value(&self) -> bool {
        self.state.started
    }

    fn reset(&mut self) {
        self.state = ScanState::default();
    }

    /// Drop leading whitespace and classify the first byte of the next value.
    fn begin(&mut self, src: &mut BytesMut) -> Result<bool, JsonStreamError> {
        let skip = src
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(skip);

        let Some(&first) = src.first() else {
            return Ok(false);
        };

        match first {
            b'{' | b'[' => self.state.depth = 1,
            b'"' => self.state.in_string = true,
            b'}' | b']' => {
                src.advance(1);
                return Err(JsonStreamError::UnexpectedClose(first as char));
            }
            _ => self.state.scalar = true,
        }

        self.state.started = true;
        self.state.scanned = 1;
        Ok(true)
    }

    fn scan(&mut self, src: &[u8]) -> Scan {
        let state = &mut self.state;

        for (offset, &byte) in src[state.scanned..].iter().enumerate() {
            let pos = state.scanned + offset;

            if state.in_string {
                if state.escaped {
                    state.escaped = false;
                } else if byte == b'\\' {
                    state.escaped = true;
                } else if byte == b'"' {
                    state.in_string = false;
                    if state.depth == 0 {
                        return Scan::Complete(pos + 1);
                    }
                }
                continue;
            }

            if state.scalar {
                if byte.is_ascii_whitespace()
                    || matches!(byte, b'{' | b'[' | b'"' | b'}' | b']' | b',')
                {
                    return Scan::Complete(pos);
                }
                continue;
            }

            match byte {
                b'"' => state.in_string = true,
                b'{' | b'[' => state.depth += 1,
                b'}' | b']' => {
                    state.depth -= 1;
                    if state.depth == 0 {
                        return Scan::Complete(pos + 1);
                    }
                }
                _ => {}
            }
        }

        state.scanned = src.len();
        Scan::Incomplete
    }

    fn take_value(&mut self, src: &mut BytesMut, end: usize) -> Result<Value, JsonStreamError> {
        let span = src.split_to(end);
        self.reset();
        serde_json::from_slice(&span).map_err(|source| JsonStreamError::Malformed {
            len: span.len(),
            source,
        })
    }
}

impl Decoder for JsonStreamCodec {
    type Item = Value;
    type Error = JsonStreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.state.started && !self.begin(src)? {
            return Ok(None);
        }

        match self.scan(src) {
            Scan::Complete(end) => self.take_value(src, end).map(Some),
            Scan::Incomplete => {
                if let Some(limit) = self.max_value_len
                    && src.len() > limit
                {
                    src.clear();
                    self.reset();
                    return Err(JsonStreamError::ValueTooLarge { limit });
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }

        if self.state.started && self.state.scalar {
            let end = src.len();
            return self.take_value(src, end).map(Some);
        }

        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            self.reset();
            return Ok(None);
        }

        let buffered = src.len();
        src.clear();
        self.reset();
        Err(JsonStreamError::Truncated { buffered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn decode_all(codec: &mut JsonStreamCodec, buf: &mut BytesMut) -> Vec<Value> {
        let mut values = Vec::new();
        while let Some(value) = codec.decode(buf).unwrap() {
            values.push(value);
        }
        values
    }

    #[test]
    fn test_single_object() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"host":"web1","state":2}"#[..]);

        let values = decode_all(&mut codec, &mut buf);
        assert_eq!(values, vec![json!({"host": "web1", "state": 2})]);
        assert!(buf.is_empty());
        assert!(!codec.is_mid_value());
    }

    #[test]
    fn test_concatenated_values_without_separator() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"a":1}{"b":[1,2]}  [3]"#[..]);

        let values = decode_all(&mut codec, &mut buf);
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": [1, 2]}), json!([3])]);
    }

    #[test]
    fn test_value_split_across_reads() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(br#"{"host":{"na"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.depth(), 2);
        assert!(codec.is_mid_value());

        buf.extend_from_slice(br#"me":"web1"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.depth(), 1);

        buf.extend_from_slice(b"}\n{");
        let value = codec.decode(&mut buf).unwrap();
        assert_eq!(value, Some(json!({"host": {"name": "web1"}})));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"{");
    }

    #[test]
    fn test_brackets_and_quotes_inside_strings() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"output":"disk } full [\"/var\"] \\"}{"n":1}"#[..]);

        let values = decode_all(&mut codec, &mut buf);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["output"], r#"disk } full ["/var"] \"#);
        assert_eq!(values[1], json!({"n": 1}));
    }

    #[test]
    fn test_escape_split_between_reads() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"s":"a\"#[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(br#""}"}"#);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({"s": "a\"}"})));
    }

    #[test]
    fn test_top_level_scalars() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&b"12 true \"x\" null"[..]);

        let values = decode_all(&mut codec, &mut buf);
        assert_eq!(values, vec![json!(12), json!(true), json!("x")]);

        // the trailing scalar has no terminator until the stream ends
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Value::Null));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_span_is_skipped() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"a":}{"b":2}"#[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, JsonStreamError::Malformed { len: 6, .. }));

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn test_stray_closing_bracket() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&b"] {}"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, JsonStreamError::UnexpectedClose(']')));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({})));
    }

    #[test]
    fn test_eof_inside_value() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&br#"{"a":[1,"#[..]);

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, JsonStreamError::Truncated { buffered: 8 }));
        assert!(buf.is_empty());
        assert!(!codec.is_mid_value());
    }

    #[test]
    fn test_eof_with_trailing_whitespace() {
        let mut codec = JsonStreamCodec::new();
        let mut buf = BytesMut::from(&b"{}\r\n  "[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(json!({})));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_value_too_large() {
        let mut codec = JsonStreamCodec::with_max_value_len(16);
        let mut buf = BytesMut::from(&br#"{"output":"aaaaaaaaaaaaaaaa"#[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, JsonStreamError::ValueTooLarge { limit: 16 }));

        buf.extend_from_slice(b"{}");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({})));
    }

    fn event_strategy() -> impl Strategy<Value = Value> {
        (
            "[a-z0-9{}\\[\\]\"\\\\ ]{0,12}",
            0u8..4,
            any::<bool>(),
            prop::collection::vec(any::<i32>(), 0..4),
        )
            .prop_map(|(output, state, hard, attempts)| {
                json!({
                    "type": "StateChange",
                    "host": "web1",
                    "state": state,
                    "state_type": u8::from(hard),
                    "check_result": {
                        "output": output,
                        "vars_after": { "attempt": attempts.len() },
                        "history": attempts,
                    }
                })
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// N concatenated values decode to exactly N values no matter where
        /// the network splits the byte stream.
        #[test]
        fn prop_chunk_boundaries_do_not_matter(
            events in prop::collection::vec(event_strategy(), 1..16),
            chunk_sizes in prop::collection::vec(1usize..48, 1..64),
            newline in any::<bool>(),
        ) {
            let separator: &[u8] = if newline { b"\n" } else { b"" };
            let mut body = Vec::new();
            for event in &events {
                body.extend_from_slice(&serde_json::to_vec(event).unwrap());
                body.extend_from_slice(separator);
            }

            let mut codec = JsonStreamCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut offset = 0;
            let mut sizes = chunk_sizes.iter().cycle();

            while offset < body.len() {
                let size = (*sizes.next().unwrap()).min(body.len() - offset);
                buf.extend_from_slice(&body[offset..offset + size]);
                offset += size;

                while let Some(value) = codec.decode(&mut buf).unwrap() {
                    decoded.push(value);
                }
            }
            while let Some(value) = codec.decode_eof(&mut buf).unwrap() {
                decoded.push(value);
            }

            prop_assert_eq!(decoded, events);
        }
    }
}
