use crate::error::AppError;

use super::config::AppConfig;

/// Upload preconditions, checked before anything is persisted or stored.
///
/// Content type must be exactly the PDF media type; anything else is a
/// client error rather than something to sniff or coerce.
pub fn validate_upload(
    config: &AppConfig,
    content_type: &str,
    size_bytes: usize,
) -> Result<(), AppError> {
    if content_type != mime::APPLICATION_PDF.as_ref() {
        return Err(AppError::InvalidFileType(content_type.to_string()));
    }

    if size_bytes > config.max_upload_size_bytes {
        return Err(AppError::FileTooLarge {
            size_bytes,
            max_bytes: config.max_upload_size_bytes,
        });
    }

    Ok(())
}
