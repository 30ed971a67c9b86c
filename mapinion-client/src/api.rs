use async_trait::async_trait;

use crate::error::ClientResult;
use crate::models::{AuthResponse, FeedPage, Post};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Тело запроса на создание поста.
pub struct NewPostPayload {
    /// Заголовок.
    pub title: String,
    /// Комментарий.
    pub caption: String,
    /// Оценка; на сервер уходит строкой.
    pub rating: u8,
    /// Изображение в виде data URI.
    pub image_data_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Тело запроса на обновление поста.
pub struct UpdatePostPayload {
    /// Заголовок.
    pub title: String,
    /// Комментарий.
    pub caption: String,
    /// Оценка; на сервер уходит числом.
    pub rating: u8,
    /// URL изображения (текущий, если пользователь его не менял).
    pub image: String,
}

/// Удалённый API, через который работают `SessionStore` и `FeedCache`.
///
/// Основная реализация: [`crate::HttpClient`]; в тестах подставляется
/// фейк.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `POST /auth/register`.
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> ClientResult<AuthResponse>;

    /// `POST /auth/login`.
    async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse>;

    /// `GET /posts?page={page}&limit={limit}`.
    async fn list_posts(&self, token: &str, page: u32, limit: u32) -> ClientResult<FeedPage>;

    /// `GET /posts/user`.
    async fn list_user_posts(&self, token: &str) -> ClientResult<Vec<Post>>;

    /// `POST /posts`. Созданный пост возвращается, если сервер его прислал.
    async fn create_post(
        &self,
        token: &str,
        payload: &NewPostPayload,
    ) -> ClientResult<Option<Post>>;

    /// `PUT /posts/{id}`. Возвращает обновлённый пост, если сервер его прислал.
    async fn update_post(
        &self,
        token: &str,
        id: &str,
        payload: &UpdatePostPayload,
    ) -> ClientResult<Option<Post>>;

    /// `DELETE /posts/{id}`.
    async fn delete_post(&self, token: &str, id: &str) -> ClientResult<()>;
}
