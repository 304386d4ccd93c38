//! Streaming multipart/form-data decoder
//!
//! Parses a request body straight off the connection into [`FormPart`]s,
//! one part at a time. Only the part currently being read is buffered; the
//! body is bounded by the declared `Content-Length`, so a short body fails
//! with [`MultipartError::Truncated`] instead of blocking.
//!
//! Framing follows the browser `FormData` encoding:
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Disposition: form-data; name="file"; filename="a.bin"\r\n
//! Content-Type: application/octet-stream\r\n
//! \r\n
//! <payload>\r\n
//! --BOUNDARY--\r\n
//! ```

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, Take};

/// Multipart decoding errors
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("Expected multipart/form-data")]
    NotMultipart,

    #[error("Missing boundary parameter in Content-Type")]
    MissingBoundary,

    #[error("Missing or invalid Content-Length")]
    MissingContentLength,

    #[error("Content does not start with the declared boundary")]
    BoundaryMismatch,

    #[error("Body ended before the closing boundary")]
    Truncated,

    #[error("Part exceeds the {limit} byte limit")]
    PartTooLarge { limit: usize },

    #[error("Field {0} is not valid UTF-8")]
    InvalidText(String),

    #[error("Failed to read request body: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A plain value field
    Text { name: String, value: String },
    /// A field carrying a `filename` attribute
    File {
        name: String,
        filename: String,
        data: Vec<u8>,
    },
}

impl FormPart {
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Extract the boundary token from a `multipart/form-data` content type
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|boundary| !boundary.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Preamble,
    Parts,
    Done,
}

/// Lazy decoder over a body stream
pub struct StreamBodyDecoder<R> {
    reader: BufReader<Take<R>>,
    delimiter: Vec<u8>,
    max_part_size: usize,
    state: DecoderState,
}

impl<R: AsyncRead + Unpin> StreamBodyDecoder<R> {
    /// `content_length` bounds how much of `reader` is ever consumed
    pub fn new(reader: R, boundary: &str, content_length: u64, max_part_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader.take(content_length)),
            delimiter: format!("--{}", boundary).into_bytes(),
            max_part_size,
            state: DecoderState::Preamble,
        }
    }

    /// Decode the next part, or `None` once the form is finished
    pub async fn next_part(&mut self) -> Result<Option<FormPart>, MultipartError> {
        if self.state == DecoderState::Preamble {
            self.read_opening_boundary().await?;
        }
        if self.state == DecoderState::Done {
            return Ok(None);
        }

        let Some(headers) = self.read_headers().await? else {
            // Declared length exhausted between parts
            self.state = DecoderState::Done;
            return Ok(None);
        };

        let Some(disposition) = PartHeaders::parse(&headers) else {
            // Unnamed part: stop here, keep whatever was already decoded
            tracing::debug!("Multipart part without a field name, ending form");
            self.state = DecoderState::Done;
            return Ok(None);
        };

        let data = self.read_payload().await?;

        let part = match disposition.filename {
            Some(filename) => FormPart::File {
                name: disposition.name,
                filename,
                data,
            },
            None => {
                let value = String::from_utf8(data)
                    .map_err(|_| MultipartError::InvalidText(disposition.name.clone()))?;
                FormPart::Text {
                    name: disposition.name,
                    value: value.trim().to_string(),
                }
            }
        };

        Ok(Some(part))
    }

    async fn read_opening_boundary(&mut self) -> Result<(), MultipartError> {
        let mut line = Vec::new();
        self.read_line(&mut line).await?;

        match self.classify(&line) {
            Some(Delimiter::Next) => self.state = DecoderState::Parts,
            Some(Delimiter::Close) => self.state = DecoderState::Done,
            None => return Err(MultipartError::BoundaryMismatch),
        }
        Ok(())
    }

    /// Header lines up to the blank separator; `None` if the body ended first
    async fn read_headers(&mut self) -> Result<Option<Vec<String>>, MultipartError> {
        let mut headers = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = self.read_line(&mut line).await?;
            if n == 0 {
                return if headers.is_empty() {
                    Ok(None)
                } else {
                    Err(MultipartError::Truncated)
                };
            }
            let text = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();
            if text.is_empty() {
                return Ok(Some(headers));
            }
            headers.push(text);
        }
    }

    /// Payload bytes up to the next delimiter line, minus the CRLF that
    /// belongs to the delimiter.
    async fn read_payload(&mut self) -> Result<Vec<u8>, MultipartError> {
        let mut data = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = self.read_line(&mut line).await?;
            if n == 0 {
                return Err(MultipartError::Truncated);
            }

            if let Some(delimiter) = self.classify(&line) {
                let payload_len = trim_line_ending(&data).len();
                data.truncate(payload_len);
                if delimiter == Delimiter::Close {
                    self.state = DecoderState::Done;
                }
                return Ok(data);
            }

            data.extend_from_slice(&line);
            // The CRLF before the delimiter is not payload, so allow for it
            if data.len() > self.max_part_size + 2 {
                return Err(MultipartError::PartTooLarge {
                    limit: self.max_part_size,
                });
            }
        }
    }

    async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize, MultipartError> {
        Ok(self.reader.read_until(b'\n', buf).await?)
    }

    fn classify(&self, line: &[u8]) -> Option<Delimiter> {
        let line = trim_line_ending(line);
        let rest = line.strip_prefix(self.delimiter.as_slice())?;
        match rest {
            b"" => Some(Delimiter::Next),
            b"--" => Some(Delimiter::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Next,
    Close,
}

/// The parts of `Content-Disposition` the decoder cares about
struct PartHeaders {
    name: String,
    filename: Option<String>,
}

impl PartHeaders {
    fn parse(headers: &[String]) -> Option<Self> {
        let disposition = headers.iter().find_map(|header| {
            let (key, value) = header.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-disposition")
                .then_some(value)
        })?;

        let mut name = None;
        let mut filename = None;
        for param in disposition.split(';').skip(1) {
            let Some((key, value)) = param.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(value),
                "filename" => filename = Some(value),
                _ => {}
            }
        }

        Some(Self {
            name: name.filter(|n| !n.is_empty())?,
            filename,
        })
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
