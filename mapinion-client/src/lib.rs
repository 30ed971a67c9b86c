//! Клиентское ядро Mapinion: сессия пользователя и лента постов с оценками
//! мест.
//!
//! - [`SessionStore`] хранит пользователя и токен, переживает перезапуск
//!   через [`DurableStorage`] и сбрасывает сессию на 401/403.
//! - [`FeedCache`] грузит ленту постранично, убирает повторы и применяет
//!   правки и удаления только после подтверждения сервера.
//! - [`HttpClient`] ходит в REST API по HTTP (`reqwest`); в тестах вместо
//!   него подставляется своя реализация [`RemoteApi`].
//!
//! Все операции, которые видит пользователь, возвращают [`Outcome`] и не
//! паникуют.
#![warn(missing_docs)]

mod api;
mod error;
mod feed;
mod http_client;
mod media;
mod models;
mod route;
mod session;
mod settings;
mod storage;

pub use api::{NewPostPayload, RemoteApi, UpdatePostPayload};
pub use error::{ClientError, ClientResult, ErrorKind, GENERIC_SERVER_ERROR, Outcome};
pub use feed::{FeedCache, FeedState, FetchMode, PaginationCursor, PaginationPhase};
pub use http_client::HttpClient;
pub use media::{DEFAULT_IMAGE_TYPE, MAX_IMAGE_BYTES, encode_data_uri, infer_content_type};
pub use models::{
    AuthResponse, AuthorRef, FeedPage, ImageAttachment, MAX_RATING, MIN_RATING, Post, PostDraft,
    PostPatch, User, parse_rating,
};
pub use route::{RouteGroup, Screen, resolve_redirect};
pub use session::{Authenticated, Lifecycle, SessionState, SessionStore};
pub use settings::{
    ClientSettings, DEFAULT_API_URL, DEFAULT_PAGE_SIZE, DEFAULT_STORAGE_PATH, normalize_api_url,
};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, TOKEN_KEY, USER_KEY};
