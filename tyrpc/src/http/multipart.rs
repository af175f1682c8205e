use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;

use crate::{BatchBody, Result, Upload};

const DEFAULT_ENCODING: &str = "7bit";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Decodes a buffered `multipart/form-data` body. Parts with a filename
/// become uploads; all other parts are text fields.
pub async fn decode(body: Bytes, boundary: String) -> Result<BatchBody> {
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut batch = BatchBody::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let Some(filename) = field.file_name().map(str::to_string) else {
            batch.fields.insert(name, field.text().await?);
            continue;
        };
        let mime_type = field
            .content_type()
            .map_or_else(|| DEFAULT_MIME_TYPE.to_string(), ToString::to_string);
        let encoding = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_ENCODING)
            .to_string();
        let buffer = field.bytes().await?;
        batch.uploads.insert(
            name,
            Arc::new(Upload {
                buffer,
                filename,
                encoding,
                mime_type,
            }),
        );
    }
    Ok(batch)
}
