//! Best-effort pixel dimensions from the image header.

use image::ImageReader;
use imgbed_storage::ByteSource;
use std::io::Cursor;

/// Width and height, or `None` when the format is unknown or the header is
/// unreadable. Only the header is decoded.
pub async fn probe_dimensions(source: &ByteSource) -> Option<(u32, u32)> {
    let source = source.clone();
    let result = tokio::task::spawn_blocking(move || match source {
        ByteSource::File(path) => ImageReader::open(&path)
            .map_err(|e| e.to_string())?
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string()),
        ByteSource::Memory(bytes) => ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string()),
    })
    .await;

    match result {
        Ok(Ok(dims)) => Some(dims),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Could not read image dimensions");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dimension probe task failed");
            None
        }
    }
}
