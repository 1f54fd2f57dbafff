use crate::models::Category;
use uuid::Uuid;

/// Fresh random token (UUID v4, 122 random bits).
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Generates the staged name `{token}_{suffix}.{ext}` for an upload.
pub fn staged_name(category: Category) -> String {
    format!("{}_{}", new_token(), category.file_suffix())
}
