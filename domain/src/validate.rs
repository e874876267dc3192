//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::{ArticlePatch, CoreError, NewArticle};

pub const FIELDS_REQUIRED: &str = "All fields are required";
pub const IMAGE_REQUIRED: &str = "Image file is required";

/// Check that a new article carries all three text fields and an image.
/// Text fields are checked first so a request missing both reports the
/// text-field error.
pub fn validate_new_article(input: &NewArticle) -> Result<(), CoreError> {
    if input.title.is_empty() || input.excerpt.is_empty() || input.content.is_empty() {
        return Err(CoreError::ValidationFailed(FIELDS_REQUIRED.into()));
    }
    if input.image.is_none() {
        return Err(CoreError::ValidationFailed(IMAGE_REQUIRED.into()));
    }
    Ok(())
}

/// Reject patches that would blank out a required text field.
pub fn validate_patch(patch: &ArticlePatch) -> Result<(), CoreError> {
    let fields = [
        ("title", &patch.title),
        ("excerpt", &patch.excerpt),
        ("content", &patch.content),
    ];
    for (name, value) in fields {
        if value.as_deref() == Some("") {
            return Err(CoreError::ValidationFailed(format!("{} cannot be empty", name)));
        }
    }
    Ok(())
}

/// Reduce a client-supplied upload name to its final path component.
///
/// Both `/` and `\` count as separators so a Windows-style path cannot smuggle
/// directories through. Names that collapse to nothing, `.` or `..` are
/// rejected.
pub fn upload_file_name(raw: &str) -> Result<&str, CoreError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(CoreError::ValidationFailed(format!(
            "invalid image file name: {:?}",
            raw
        )));
    }
    Ok(name)
}
