//! `Content-Encoding` shim.
//!
//! Non-stream responses are inspected as a whole, so the gateway has to
//! undo the upstream's compression before parsing and redo it before
//! writing a substituted body back out. Event streams are decoded
//! incrementally with [`StreamDecoder`].

use std::borrow::Cow;
use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::{DeflateDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};
use http::header::CONTENT_ENCODING;
use http::HeaderMap;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LG_WINDOW: u32 = 22;

/// Supported `Content-Encoding` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Parse a header value. Unknown codings fall back to identity.
    #[must_use]
    pub fn from_header_value(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Self::Gzip
        } else if value.eq_ignore_ascii_case("deflate") {
            Self::Deflate
        } else if value.eq_ignore_ascii_case("br") {
            Self::Brotli
        } else {
            Self::Identity
        }
    }

    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map_or(Self::Identity, Self::from_header_value)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// The input ends before the compressed stream does; more bytes may
    /// still complete it.
    #[error("incomplete {0} stream")]
    Incomplete(&'static str),
    #[error("corrupt {encoding} stream: {source}")]
    Corrupt {
        encoding: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {encoding} body: {source}")]
    Encode {
        encoding: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Decompress `data` according to `encoding`.
///
/// # Errors
///
/// Returns [`CompressError::Incomplete`] for a truncated stream and
/// [`CompressError::Corrupt`] for input that can never decode.
pub fn decode(encoding: ContentEncoding, data: &[u8]) -> Result<Cow<'_, [u8]>, CompressError> {
    let decoded = match encoding {
        ContentEncoding::Identity => return Ok(Cow::Borrowed(data)),
        _ if data.is_empty() => return Err(CompressError::Incomplete(encoding.as_str())),
        ContentEncoding::Gzip => gunzip(data)?,
        ContentEncoding::Deflate => inflate(data)?,
        ContentEncoding::Brotli => brotli_decompress(data)?,
    };
    Ok(Cow::Owned(decoded))
}

/// Compress `data` according to `encoding`.
///
/// # Errors
///
/// Returns [`CompressError::Encode`] when the encoder fails.
pub fn encode(encoding: ContentEncoding, data: &[u8]) -> Result<Cow<'_, [u8]>, CompressError> {
    let name = encoding.as_str();
    let encoded = match encoding {
        ContentEncoding::Identity => return Ok(Cow::Borrowed(data)),
        ContentEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|source| CompressError::Encode { encoding: name, source })?
        }
        ContentEncoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|source| CompressError::Encode { encoding: name, source })?
        }
        ContentEncoding::Brotli => {
            let mut encoder = brotli::CompressorWriter::new(
                Vec::with_capacity(data.len() / 2),
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_LG_WINDOW,
            );
            encoder
                .write_all(data)
                .and_then(|()| encoder.flush())
                .map_err(|source| CompressError::Encode { encoding: name, source })?;
            encoder.into_inner()
        }
    };
    Ok(Cow::Owned(encoded))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    match GzDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(CompressError::Incomplete("gzip"))
        }
        Err(source) => Err(CompressError::Corrupt {
            encoding: "gzip",
            source,
        }),
    }
}

/// Whether `data` starts with a zlib header (RFC 1950). `deflate` bodies
/// come both wrapped and raw.
fn is_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    if data.len() < 2 {
        return Err(CompressError::Incomplete("deflate"));
    }
    let mut inflater = Decompress::new(is_zlib_header(data));
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(256));
    loop {
        let consumed = usize::try_from(inflater.total_in()).unwrap_or(data.len());
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&data[consumed.min(data.len())..], &mut out, FlushDecompress::None)
            .map_err(|err| CompressError::Corrupt {
                encoding: "deflate",
                source: io::Error::new(io::ErrorKind::InvalidData, err),
            })?;

        if status == Status::StreamEnd {
            return Ok(out);
        }
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(4096));
            continue;
        }
        let progressed = inflater.total_in() != consumed as u64 || inflater.total_out() != produced;
        if !progressed || inflater.total_in() >= data.len() as u64 {
            return Err(CompressError::Incomplete("deflate"));
        }
    }
}

// The brotli decoder reports truncation and corruption the same way, so
// every failure is treated as "need more bytes". Callers bound how long
// they keep buffering.
fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE)
        .read_to_end(&mut out)
        .map_err(|_| CompressError::Incomplete("br"))?;
    Ok(out)
}

enum StreamInner {
    Identity,
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    /// Waiting for enough bytes to tell zlib from raw deflate.
    DeflateHeader(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    RawDeflate(DeflateDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
}

/// Incremental decoder for a compressed body consumed as it arrives.
///
/// Each call returns whatever plain bytes the new input completes.
pub struct StreamDecoder {
    encoding: ContentEncoding,
    inner: StreamInner,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(encoding: ContentEncoding) -> Self {
        let inner = match encoding {
            ContentEncoding::Identity => StreamInner::Identity,
            ContentEncoding::Gzip => StreamInner::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            ContentEncoding::Deflate => StreamInner::DeflateHeader(Vec::new()),
            ContentEncoding::Brotli => StreamInner::Brotli(Box::new(
                brotli::DecompressorWriter::new(Vec::new(), BROTLI_BUFFER_SIZE),
            )),
        };
        Self { encoding, inner }
    }

    #[must_use]
    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Feed the next slice of the body.
    ///
    /// # Errors
    ///
    /// Returns [`CompressError::Corrupt`] once the input can no longer
    /// decode.
    pub fn decode<'a>(&mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>, CompressError> {
        let name = self.encoding.as_str();
        let corrupt = |source: io::Error| CompressError::Corrupt { encoding: name, source };

        if let StreamInner::DeflateHeader(head) = &mut self.inner {
            head.extend_from_slice(data);
            if head.len() < 2 {
                return Ok(Cow::Owned(Vec::new()));
            }
            let head = std::mem::take(head);
            self.inner = if is_zlib_header(&head) {
                StreamInner::Zlib(ZlibDecoder::new(Vec::new()))
            } else {
                StreamInner::RawDeflate(DeflateDecoder::new(Vec::new()))
            };
            return self.decode(&head).map(|out| Cow::Owned(out.into_owned()));
        }

        let out = match &mut self.inner {
            StreamInner::Identity => return Ok(Cow::Borrowed(data)),
            StreamInner::DeflateHeader(_) => Vec::new(),
            StreamInner::Gzip(decoder) => {
                decoder.write_all(data).and_then(|()| decoder.flush()).map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
            StreamInner::Zlib(decoder) => {
                decoder.write_all(data).and_then(|()| decoder.flush()).map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
            StreamInner::RawDeflate(decoder) => {
                decoder.write_all(data).and_then(|()| decoder.flush()).map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
            StreamInner::Brotli(decoder) => {
                decoder.write_all(data).map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
        };
        Ok(Cow::Owned(out))
    }
}
