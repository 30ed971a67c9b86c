use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Content type по умолчанию, если его не удалось определить по имени файла.
pub const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

/// Максимальный размер изображения для нового поста (1 MiB).
pub const MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Определяет content type изображения по расширению файла.
///
/// `photo.JPG` -> `image/jpeg`, `map.png` -> `image/png`,
/// без расширения -> [`DEFAULT_IMAGE_TYPE`].
pub fn infer_content_type(file_name: Option<&str>) -> String {
    let ext = file_name
        .map(Path::new)
        .and_then(Path::extension)
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match ext.as_deref() {
        Some("jpg") => DEFAULT_IMAGE_TYPE.to_string(),
        Some(ext) => format!("image/{ext}"),
        None => DEFAULT_IMAGE_TYPE.to_string(),
    }
}

/// Кодирует изображение в data URI: `data:<type>;base64,<payload>`.
pub fn encode_data_uri(bytes: &[u8], file_name: Option<&str>) -> String {
    let content_type = infer_content_type(file_name);
    format!("data:{content_type};base64,{}", BASE64.encode(bytes))
}
