use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::types::{FetchOutput, ScrapeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub text: String,
    pub encoding_label: String,
    /// Malformed sequences were replaced with U+FFFD.
    pub lossy: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response body is empty")]
    Empty,
    #[error("body decoded with {encoding} is mostly replacement characters")]
    Garbled { encoding: String },
}

impl From<DecodeError> for ScrapeError {
    fn from(err: DecodeError) -> Self {
        ScrapeError::Parsing(err.to_string())
    }
}

/// Decode raw bytes into UTF-8 using: BOM -> Content-Type charset -> chardetng fallback.
///
/// Stray bad bytes are tolerated (portals often mix encodings in one page);
/// a body that is mostly undecodable is an error.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedBody, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, enc);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let enc = detector.guess(None, true);
    decode_with(bytes, enc)
}

/// Convenience for the common fetch-then-decode path.
pub fn decode_output(output: &FetchOutput) -> Result<DecodedBody, DecodeError> {
    decode_body(&output.bytes, output.metadata.content_type.as_deref())
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim_matches([' ', '"', '\''].as_ref()).to_string())
        } else {
            None
        }
    })
}

fn decode_with(bytes: &[u8], enc: &'static Encoding) -> Result<DecodedBody, DecodeError> {
    let (text, _, had_errors) = enc.decode(bytes);
    if had_errors {
        let total = text.chars().count().max(1);
        let replaced = text.chars().filter(|c| *c == '\u{FFFD}').count();
        if replaced * 2 > total {
            return Err(DecodeError::Garbled {
                encoding: enc.name().to_string(),
            });
        }
    }
    Ok(DecodedBody {
        text: text.into_owned(),
        encoding_label: enc.name().to_string(),
        lossy: had_errors,
    })
}
