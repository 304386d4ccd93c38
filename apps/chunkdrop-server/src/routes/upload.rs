//! Upload Route
//!
//! `POST /` with a `multipart/form-data` body carrying `file`,
//! `original_name` and optionally `chunk_index` + `total_chunks`.
//! The body is decoded as it arrives; nothing is buffered ahead of the
//! decoder.

use std::io;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::security::SecurityEventKind;
use crate::state::AppState;
use crate::upload::{
    boundary_from_content_type, MultipartError, StreamBodyDecoder, UploadError, UploadForm,
};

/// POST /
///
/// Responds with a plain-text status line.
pub async fn upload_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<String, UploadError> {
    let service = state.upload_service();
    let limits = service.limits();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(MultipartError::NotMultipart)?;
    let boundary = boundary_from_content_type(content_type)?;

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(MultipartError::MissingContentLength)?;

    let max = limits.max_request_size();
    if content_length > max {
        service
            .security()
            .record(
                SecurityEventKind::FileSizeExceeded,
                &format!("Request body of {} bytes exceeds limit", content_length),
                Some(addr.ip()),
            )
            .await;
        return Err(UploadError::RequestTooLarge {
            size: content_length,
            max,
        });
    }

    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let mut decoder =
        StreamBodyDecoder::new(reader, &boundary, content_length, limits.max_artifact_size);

    let form = match UploadForm::read_from(&mut decoder).await {
        Ok(form) => form,
        Err(UploadError::Multipart(MultipartError::PartTooLarge { limit })) => {
            service
                .security()
                .record(
                    SecurityEventKind::FileSizeExceeded,
                    &format!("Form part exceeded limit of {} bytes", limit),
                    Some(addr.ip()),
                )
                .await;
            return Err(MultipartError::PartTooLarge { limit }.into());
        }
        Err(e) => return Err(e),
    };

    let request = form.into_request(limits)?;
    let receipt = service.accept(request, addr.ip()).await?;

    Ok(receipt.to_string())
}
