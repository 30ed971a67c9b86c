use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ClientError, ClientResult};
use crate::media::MAX_IMAGE_BYTES;

/// Минимальная оценка поста.
pub const MIN_RATING: u8 = 1;
/// Максимальная оценка поста.
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Аутентифицированный пользователь.
pub struct User {
    /// Идентификатор пользователя.
    #[serde(alias = "_id")]
    pub id: String,
    /// Логин.
    pub username: String,
    /// Email.
    pub email: String,
    /// URL аватара.
    #[serde(
        default,
        rename = "profilePicture",
        alias = "profileImage",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_picture_url: Option<String>,
    /// Дата и время регистрации (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Снимок автора поста. Не владеющая ссылка на пользователя.
pub struct AuthorRef {
    /// Идентификатор автора, если сервер его прислал.
    pub id: Option<String>,
    /// Логин автора.
    pub username: String,
    /// URL аватара автора.
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Пост (рекомендация) из ленты.
pub struct Post {
    /// Идентификатор, выданный сервером.
    pub id: String,
    /// Автор. `None` для постов, у которых сервер не заполнил `user`.
    pub author: Option<AuthorRef>,
    /// Заголовок (название места).
    pub title: String,
    /// Комментарий.
    pub caption: String,
    /// Оценка, всегда в диапазоне `1..=5`.
    pub rating: u8,
    /// URL сохранённого изображения.
    pub image_url: String,
    /// Дата и время публикации (UTC).
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ответ после успешной регистрации или входа.
pub struct AuthResponse {
    /// Bearer-токен.
    pub token: String,
    /// Данные пользователя.
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Одна страница ленты в том виде, в каком её вернул сервер.
pub struct FeedPage {
    /// Посты страницы в серверном порядке.
    pub posts: Vec<Post>,
    /// Общее число страниц, если сервер его сообщил.
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Изображение, выбранное пользователем для нового поста.
pub struct ImageAttachment {
    /// Сырые байты файла.
    pub bytes: Vec<u8>,
    /// Имя исходного файла; по расширению определяется content type.
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Validate)]
/// Черновик нового поста.
pub struct PostDraft {
    /// Заголовок.
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    /// Комментарий.
    #[validate(length(min = 1, message = "caption is required"))]
    pub caption: String,
    /// Оценка `1..=5`.
    #[validate(
        required(message = "rating is required"),
        range(min = 1, max = 5, message = "rating must be 1..5")
    )]
    pub rating: Option<u8>,
    /// Изображение; наличие и размер проверяет `validate_draft`.
    pub image: Option<ImageAttachment>,
}

impl PostDraft {
    /// Проверяет предусловия создания поста. Сетевой запрос не выполняется.
    pub fn validate_draft(&self) -> ClientResult<()> {
        self.validate().map_err(validation_error)?;

        if self.title.trim().is_empty() {
            return Err(ClientError::Validation("title is required".to_string()));
        }
        if self.caption.trim().is_empty() {
            return Err(ClientError::Validation("caption is required".to_string()));
        }

        let image_len = self.image.as_ref().map_or(0, |image| image.bytes.len());
        if image_len == 0 {
            return Err(ClientError::Validation("image is required".to_string()));
        }
        if image_len > MAX_IMAGE_BYTES {
            return Err(ClientError::Validation(format!(
                "image too large: {image_len} bytes, limit is {MAX_IMAGE_BYTES}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Validate)]
/// Изменения существующего поста.
///
/// `rating` хранится строкой, как его ввёл пользователь; нечисловое значение
/// отклоняется как ошибка валидации, а не приводится к нулю.
pub struct PostPatch {
    /// Новый заголовок.
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    /// Новый комментарий.
    #[validate(length(min = 1, message = "caption is required"))]
    pub caption: String,
    /// Новая оценка в том виде, как её ввёл пользователь.
    pub rating: String,
    /// Новый URL изображения; `None`: отправить текущий URL поста.
    pub image_url: Option<String>,
}

impl PostPatch {
    /// Проверяет поля и возвращает оценку в числовом виде.
    pub fn validate_patch(&self) -> ClientResult<u8> {
        self.validate().map_err(validation_error)?;
        parse_rating(&self.rating)
    }
}

/// Разбирает введённую пользователем оценку.
pub fn parse_rating(raw: &str) -> ClientResult<u8> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| ClientError::Validation(format!("rating must be a number, got '{raw}'")))?;

    if !(i64::from(MIN_RATING)..=i64::from(MAX_RATING)).contains(&value) {
        return Err(ClientError::Validation(format!(
            "rating must be {MIN_RATING}..{MAX_RATING}, got {value}"
        )));
    }
    Ok(value as u8)
}

/// Приводит оценку из ответа сервера к диапазону `1..=5`.
///
/// Сервер хранит оценку то числом, то строкой (при создании она уходит
/// строкой). Всё, что не удаётся прочитать как число, становится минимальной
/// оценкой.
pub(crate) fn clamp_rating(value: &serde_json::Value) -> u8 {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw {
        Some(v) if v.is_finite() => v
            .round()
            .clamp(f64::from(MIN_RATING), f64::from(MAX_RATING)) as u8,
        _ => MIN_RATING,
    }
}

fn validation_error(errors: validator::ValidationErrors) -> ClientError {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| match &err.message {
                Some(message) => message.to_string(),
                None => format!("{field} is invalid"),
            })
        })
        .collect();
    messages.sort();
    messages.dedup();
    ClientError::Validation(messages.join(", "))
}
