//! CR-delimited record framing.
//!
//! Every wire record is one carriage-return-terminated chunk of text. The
//! codec hands complete records to the parser and appends the terminator
//! on the way out; anything between delimiters is opaque here, including
//! stray `\n` bytes, which the tolerant parser treats as blank lines.

use crate::config::TransportConfig;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const RECORD_DELIMITER: u8 = b'\r';

/// Tokio codec splitting a byte stream into CR-terminated records.
///
/// Inbound bytes are decoded lossily, so a peer sending invalid UTF-8
/// gets replacement characters instead of killing the connection. A
/// record that grows past `max_line_length` without a delimiter is a
/// protocol violation and errors the stream.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_line_length: usize,
}

impl RecordCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.max_line_length)
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

impl Decoder for RecordCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == RECORD_DELIMITER) {
            Some(at) => {
                let record = src.split_to(at);
                src.advance(1);
                Ok(Some(String::from_utf8_lossy(&record).into_owned()))
            }
            None if src.len() > self.max_line_length => {
                Err(ProtocolError::OversizedLine(src.len()))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None if src.is_empty() => Ok(None),
            None => {
                // Peer closed without a final delimiter; surface what we have.
                let record = src.split_to(src.len());
                Ok(Some(String::from_utf8_lossy(&record).into_owned()))
            }
        }
    }
}

impl Encoder<String> for RecordCodec {
    type Error = ProtocolError;

    fn encode(&mut self, record: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(record.len() + 1);
        dst.put(record.as_bytes());
        dst.put_u8(RECORD_DELIMITER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> RecordCodec {
        RecordCodec::default()
    }

    #[test]
    fn splits_records_on_carriage_return() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"Field: A {}\rField: B {}\r"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("Field: A {}"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("Field: B {}"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_the_delimiter() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"Field: Crypto"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"Handshake {}\r");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("Field: CryptoHandshake {}")
        );
    }

    #[test]
    fn multi_line_record_stays_one_record() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"Field: Doc\n{\n\tkey: \"v\"\n}\r"[..]);

        let record = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record, "Field: Doc\n{\n\tkey: \"v\"\n}");
    }

    #[test]
    fn oversized_record_errors() {
        let mut codec = RecordCodec::new(16);
        let mut buf = BytesMut::from(&b"0123456789abcdef0"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedLine(17))
        ));
    }

    #[test]
    fn eof_flushes_the_unterminated_tail() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"Field: A {}\rtail"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("Field: A {}"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("tail"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"abc\xFFdef\r"[..]);

        let record = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record, "abc\u{FFFD}def");
    }

    #[test]
    fn encode_appends_the_delimiter() {
        let mut codec = codec();
        let mut buf = BytesMut::new();

        codec.encode("Field: A {}".to_string(), &mut buf).unwrap();
        codec.encode("Field: B {}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"Field: A {}\rField: B {}\r");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let record = "Field: CryptoCommunication {(iv: \"AA==\"), (content: \"AQ==\")}";

        codec.encode(record.to_string(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(record));
    }
}
