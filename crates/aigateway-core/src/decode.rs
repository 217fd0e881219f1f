//! Response body decoding (spec §4.3 step 2): gzip, brotli, or identity. Unknown
//! encodings are treated as identity, grounded on the teacher's
//! `http/compression/mod.rs` `EncodingDecision` handling.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder};
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::error::ProcessorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Brotli,
    Unknown,
}

pub fn detect_encoding(header_value: Option<&str>) -> ContentEncoding {
    match header_value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("identity") => ContentEncoding::Identity,
        Some("gzip") => ContentEncoding::Gzip,
        Some("br") => ContentEncoding::Brotli,
        Some(_) => ContentEncoding::Unknown,
    }
}

/// The outcome of decoding a response body: the decoded bytes plus whether any
/// encoding was actually applied (matching the `{reader, isEncoded}` shape in spec §3).
#[derive(Clone, Debug)]
pub struct DecodingResult {
    pub data: Bytes,
    pub is_encoded: bool,
}

async fn decompress_all(encoding: ContentEncoding, data: &[u8]) -> Result<Bytes, ProcessorError> {
    match encoding {
        ContentEncoding::Identity | ContentEncoding::Unknown => Ok(Bytes::copy_from_slice(data)),
        ContentEncoding::Gzip => {
            let mut decoder = GzipDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .await
                .map_err(|e| ProcessorError::DecodeError(format!("gzip: {e}")))?;
            Ok(Bytes::from(out))
        }
        ContentEncoding::Brotli => {
            let mut decoder = BrotliDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .await
                .map_err(|e| ProcessorError::DecodeError(format!("brotli: {e}")))?;
            Ok(Bytes::from(out))
        }
    }
}

/// Decodes one complete body (the common case: non-streaming responses, and error
/// bodies, which are always buffered in full before `ResponseError` is invoked).
pub async fn decode_complete(encoding: ContentEncoding, data: &[u8]) -> Result<DecodingResult, ProcessorError> {
    let is_encoded = !matches!(encoding, ContentEncoding::Identity);
    let decoded = decompress_all(encoding, data).await?;
    Ok(DecodingResult {
        data: decoded,
        is_encoded,
    })
}

/// Accumulates a streaming response body across chunks. Identity bodies are forwarded
/// chunk-by-chunk as they arrive. Compressed streaming bodies are buffered and decoded
/// once at `end_of_stream`, since gzip/brotli frames are not independently decodable
/// per network chunk; interim calls report no decoded bytes.
pub struct StreamingDecoder {
    encoding: ContentEncoding,
    buffer: Vec<u8>,
}

impl StreamingDecoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        StreamingDecoder {
            encoding,
            buffer: Vec::new(),
        }
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    pub async fn push(&mut self, chunk: &[u8], end_of_stream: bool) -> Result<DecodingResult, ProcessorError> {
        match self.encoding {
            ContentEncoding::Identity | ContentEncoding::Unknown => Ok(DecodingResult {
                data: Bytes::copy_from_slice(chunk),
                is_encoded: !matches!(self.encoding, ContentEncoding::Identity),
            }),
            ContentEncoding::Gzip | ContentEncoding::Brotli => {
                self.buffer.extend_from_slice(chunk);
                if end_of_stream {
                    let decoded = decompress_all(self.encoding, &self.buffer).await?;
                    Ok(DecodingResult {
                        data: decoded,
                        is_encoded: true,
                    })
                } else {
                    Ok(DecodingResult {
                        data: Bytes::new(),
                        is_encoded: true,
                    })
                }
            }
        }
    }
}
