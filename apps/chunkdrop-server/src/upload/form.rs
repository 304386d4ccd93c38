//! Upload form fields
//!
//! Collects decoded multipart parts into the fields the upload protocol
//! knows about and turns them into a validated [`UploadRequest`].

use tokio::io::AsyncRead;

use super::multipart::{FormPart, StreamBodyDecoder};
use super::types::{ChunkSpec, UploadError, UploadLimits, UploadRequest};

pub const FIELD_FILE: &str = "file";
pub const FIELD_ORIGINAL_NAME: &str = "original_name";
pub const FIELD_CHUNK_INDEX: &str = "chunk_index";
pub const FIELD_TOTAL_CHUNKS: &str = "total_chunks";

/// Raw upload fields as sent by the client
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub payload: Option<Vec<u8>>,
    pub original_name: Option<String>,
    pub chunk_index: Option<String>,
    pub total_chunks: Option<String>,
}

impl UploadForm {
    /// Drain `decoder`, keeping the fields of interest; unknown fields are
    /// ignored and a repeated field keeps its last value.
    pub async fn read_from<R: AsyncRead + Unpin>(
        decoder: &mut StreamBodyDecoder<R>,
    ) -> Result<Self, UploadError> {
        let mut form = Self::default();
        while let Some(part) = decoder.next_part().await? {
            form.apply(part);
        }
        Ok(form)
    }

    fn apply(&mut self, part: FormPart) {
        match part {
            FormPart::File { name, data, .. } if name == FIELD_FILE => self.payload = Some(data),
            // Some clients send the payload without a filename attribute
            FormPart::Text { name, value } if name == FIELD_FILE => {
                self.payload = Some(value.into_bytes())
            }
            FormPart::Text { name, value } => match name.as_str() {
                FIELD_ORIGINAL_NAME => self.original_name = Some(value),
                FIELD_CHUNK_INDEX => self.chunk_index = Some(value),
                FIELD_TOTAL_CHUNKS => self.total_chunks = Some(value),
                _ => tracing::debug!(field = %name, "Ignoring unknown form field"),
            },
            FormPart::File { name, .. } => {
                tracing::debug!(field = %name, "Ignoring unknown file field")
            }
        }
    }

    /// Validate required fields and chunk parameters.
    ///
    /// The payload size is left to the caller, which reports oversize
    /// uploads as security events.
    pub fn into_request(self, limits: &UploadLimits) -> Result<UploadRequest, UploadError> {
        let original_name = self
            .original_name
            .filter(|name| !name.is_empty())
            .ok_or(UploadError::MissingField(FIELD_ORIGINAL_NAME))?;
        let payload = self.payload.ok_or(UploadError::MissingField(FIELD_FILE))?;

        let chunk = match (self.chunk_index, self.total_chunks) {
            (None, None) => None,
            (Some(index), Some(total)) => Some(parse_chunk_spec(&index, &total, limits)?),
            _ => {
                return Err(UploadError::InvalidChunkParameters(format!(
                    "{} and {} must be sent together",
                    FIELD_CHUNK_INDEX, FIELD_TOTAL_CHUNKS
                )))
            }
        };

        Ok(UploadRequest {
            original_name,
            payload,
            chunk,
        })
    }
}

fn parse_chunk_spec(
    index: &str,
    total: &str,
    limits: &UploadLimits,
) -> Result<ChunkSpec, UploadError> {
    let (Ok(index), Ok(total)) = (index.parse::<i64>(), total.parse::<i64>()) else {
        return Err(UploadError::InvalidChunkParameters(
            "Invalid chunk parameter format".into(),
        ));
    };

    if index < 0 || total < 1 {
        return Err(UploadError::InvalidChunkParameters(
            "Invalid chunk parameters".into(),
        ));
    }
    if index >= total {
        return Err(UploadError::InvalidChunkParameters(
            "Chunk index exceeds total chunks".into(),
        ));
    }
    if total > i64::from(limits.max_chunks) {
        return Err(UploadError::TooManyChunks {
            total: u32::try_from(total).unwrap_or(u32::MAX),
            max: limits.max_chunks,
        });
    }

    // Both fit: index < total <= max_chunks
    Ok(ChunkSpec {
        index: index as u32,
        total: total as u32,
    })
}
