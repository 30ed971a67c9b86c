use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;

use crate::api::{NewPostPayload, RemoteApi, UpdatePostPayload};
use crate::error::{ClientError, ClientResult, GENERIC_SERVER_ERROR};
use crate::models::{AuthResponse, AuthorRef, FeedPage, Post, User, clamp_rating};
use crate::settings::ClientSettings;

const UNKNOWN_AUTHOR: &str = "unknown user";

#[derive(Debug, Serialize)]
struct RegisterRequestDto<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequestDto<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePostRequestDto<'a> {
    title: &'a str,
    caption: &'a str,
    rating: String,
    image: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdatePostRequestDto<'a> {
    title: &'a str,
    caption: &'a str,
    rating: u8,
    image: &'a str,
}

#[derive(Serialize)]
struct ListPostsQuery {
    page: u32,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseDto {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponseDto {
    new_user: Option<User>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponseDto {
    user: Option<User>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostDto {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    caption: String,
    #[serde(default)]
    rating: Value,
    #[serde(default)]
    image: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDto {
    #[serde(default, alias = "_id")]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "profileImage")]
    profile_picture: Option<String>,
}

/// Форма ответа `GET /posts`: сервер отдаёт либо `{posts, totalPages?}`,
/// либо голый массив.
#[derive(Debug)]
pub(crate) enum PageShape {
    Wrapped {
        posts: Vec<Value>,
        total_pages: Option<u32>,
    },
    Bare(Vec<Value>),
}

impl PageShape {
    fn into_page(self) -> FeedPage {
        let (raw, total_pages) = match self {
            Self::Wrapped { posts, total_pages } => (posts, total_pages),
            Self::Bare(posts) => (posts, None),
        };
        FeedPage {
            posts: decode_posts(raw),
            total_pages,
        }
    }
}

pub(crate) fn parse_page_shape(body: Value) -> ClientResult<PageShape> {
    match body {
        Value::Array(posts) => Ok(PageShape::Bare(posts)),
        Value::Object(mut map) => match map.remove("posts") {
            Some(Value::Array(posts)) => {
                let total_pages = map
                    .get("totalPages")
                    .and_then(Value::as_u64)
                    .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
                Ok(PageShape::Wrapped { posts, total_pages })
            }
            _ => Err(ClientError::MalformedResponse(
                "posts response has neither `posts` array nor array body".to_string(),
            )),
        },
        other => Err(ClientError::MalformedResponse(format!(
            "unexpected posts response: {other}"
        ))),
    }
}

impl From<AuthorDto> for AuthorRef {
    fn from(value: AuthorDto) -> Self {
        Self {
            id: value.id,
            username: value
                .username
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            profile_picture_url: value.profile_picture,
        }
    }
}

impl From<PostDto> for Post {
    fn from(value: PostDto) -> Self {
        // `user` бывает не заполнен (голый id или null), такой пост остаётся без автора.
        let author = value
            .user
            .filter(Value::is_object)
            .and_then(|user| serde_json::from_value::<AuthorDto>(user).ok())
            .map(AuthorRef::from);

        Self {
            id: value.id,
            author,
            title: value.title,
            caption: value.caption,
            rating: clamp_rating(&value.rating),
            image_url: value.image,
            created_at: value.created_at,
        }
    }
}

fn decode_post(raw: Value) -> ClientResult<Post> {
    serde_json::from_value::<PostDto>(raw)
        .map(Post::from)
        .map_err(|err| ClientError::MalformedResponse(format!("invalid post: {err}")))
}

fn decode_posts(raw: Vec<Value>) -> Vec<Post> {
    raw.into_iter()
        .filter_map(|item| match decode_post(item) {
            Ok(post) => Some(post),
            Err(err) => {
                tracing::warn!(error = %err, "skipping undecodable post");
                None
            }
        })
        .collect()
}

/// Превращает тело неуспешного ответа в ошибку клиента.
///
/// HTML-страницы (прокси, падение сервера) не показываются пользователю как
/// есть, вместо них подставляется [`GENERIC_SERVER_ERROR`].
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> ClientError {
    ClientError::from_http_status(status, Some(body_message(status, body)))
}

/// То же для `/auth/*`: там 401/403 означают неверные учётные данные, а не
/// истёкшую сессию, поэтому сообщение сервера сохраняется.
pub(crate) fn auth_error_from_body(status: StatusCode, body: &str) -> ClientError {
    ClientError::Server {
        status: status.as_u16(),
        message: body_message(status, body),
    }
}

fn body_message(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('<') {
        return GENERIC_SERVER_ERROR.to_string();
    }
    serde_json::from_str::<ErrorResponseDto>(trimmed)
        .ok()
        .and_then(|dto| dto.message.or(dto.error))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback_message(status))
}

fn fallback_message(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "bad request".to_string(),
        404 => "resource not found".to_string(),
        409 => "conflict (for example, user already exists)".to_string(),
        500..=599 => "server error".to_string(),
        code => format!("http error {code}"),
    }
}

#[derive(Debug, Clone)]
/// HTTP-клиент для REST API Mapinion.
pub struct HttpClient {
    base_url: String,
    client: Client,
}

impl HttpClient {
    /// Создаёт клиент с базовым URL и таймаутами по умолчанию (5s/15s).
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        Self::with_timeouts(base_url, Duration::from_secs(5), Duration::from_secs(15))
    }

    /// Создаёт клиент по настройкам приложения.
    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        Self::with_timeouts(
            settings.api_url.clone(),
            settings.connect_timeout,
            settings.request_timeout,
        )
    }

    /// Создаёт клиент с явными таймаутами.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|err| ClientError::Network(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let request = self.client.request(method, self.endpoint(path));
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Отправляет запрос и возвращает тело успешного ответа как текст.
    async fn send(request: RequestBuilder) -> ClientResult<String> {
        Self::send_with(request, error_from_body).await
    }

    async fn send_with(
        request: RequestBuilder,
        on_error: fn(StatusCode, &str) -> ClientError,
    ) -> ClientResult<String> {
        let response = request.send().await.map_err(ClientError::from_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(ClientError::from_reqwest)?;

        if !status.is_success() {
            return Err(on_error(status, &body));
        }
        Ok(body)
    }

    fn parse_json<T: DeserializeOwned>(body: &str) -> ClientResult<T> {
        serde_json::from_str::<T>(body)
            .map_err(|err| ClientError::MalformedResponse(format!("invalid json: {err}")))
    }

    /// Пустое тело или тело без распознаваемого поста не считается ошибкой.
    fn parse_optional_post(body: &str) -> Option<Post> {
        let value = serde_json::from_str::<Value>(body).ok()?;
        let value = match value {
            Value::Object(mut map) if map.contains_key("post") => map.remove("post")?,
            other => other,
        };
        decode_post(value).ok()
    }
}

#[async_trait]
impl RemoteApi for HttpClient {
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> ClientResult<AuthResponse> {
        let payload = RegisterRequestDto {
            username,
            email,
            password,
        };
        let body = Self::send_with(
            self.request(Method::POST, "/auth/register", None)
                .json(&payload),
            auth_error_from_body,
        )
        .await?;

        let dto: RegisterResponseDto = Self::parse_json(&body)?;
        match (dto.new_user, dto.token) {
            (Some(user), Some(token)) if !token.trim().is_empty() => {
                Ok(AuthResponse { token, user })
            }
            _ => Err(ClientError::MalformedResponse(
                "Incomplete registration data".to_string(),
            )),
        }
    }

    async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let payload = LoginRequestDto { email, password };
        let body = Self::send_with(
            self.request(Method::POST, "/auth/login", None).json(&payload),
            auth_error_from_body,
        )
        .await?;

        let dto: LoginResponseDto = Self::parse_json(&body)?;
        match (dto.user, dto.token) {
            (Some(user), Some(token)) if !token.trim().is_empty() => {
                Ok(AuthResponse { token, user })
            }
            _ => Err(ClientError::MalformedResponse(
                "Incomplete login data".to_string(),
            )),
        }
    }

    async fn list_posts(&self, token: &str, page: u32, limit: u32) -> ClientResult<FeedPage> {
        let query = ListPostsQuery { page, limit };
        let body = Self::send(
            self.request(Method::GET, "/posts", Some(token))
                .query(&query),
        )
        .await?;

        let shape = parse_page_shape(Self::parse_json::<Value>(&body)?)?;
        Ok(shape.into_page())
    }

    async fn list_user_posts(&self, token: &str) -> ClientResult<Vec<Post>> {
        let body = Self::send(self.request(Method::GET, "/posts/user", Some(token))).await?;

        let shape = parse_page_shape(Self::parse_json::<Value>(&body)?)?;
        Ok(shape.into_page().posts)
    }

    async fn create_post(
        &self,
        token: &str,
        payload: &NewPostPayload,
    ) -> ClientResult<Option<Post>> {
        let dto = CreatePostRequestDto {
            title: &payload.title,
            caption: &payload.caption,
            rating: payload.rating.to_string(),
            image: &payload.image_data_uri,
        };
        let body = Self::send(self.request(Method::POST, "/posts", Some(token)).json(&dto)).await?;
        Ok(Self::parse_optional_post(&body))
    }

    async fn update_post(
        &self,
        token: &str,
        id: &str,
        payload: &UpdatePostPayload,
    ) -> ClientResult<Option<Post>> {
        let dto = UpdatePostRequestDto {
            title: &payload.title,
            caption: &payload.caption,
            rating: payload.rating,
            image: &payload.image,
        };
        let body = Self::send(
            self.request(Method::PUT, &format!("/posts/{id}"), Some(token))
                .json(&dto),
        )
        .await?;
        Ok(Self::parse_optional_post(&body))
    }

    async fn delete_post(&self, token: &str, id: &str) -> ClientResult<()> {
        Self::send(self.request(Method::DELETE, &format!("/posts/{id}"), Some(token))).await?;
        Ok(())
    }
}
