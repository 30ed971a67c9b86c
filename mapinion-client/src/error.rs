use thiserror::Error;

/// Сообщение, которое показывается вместо сырого HTML-ответа сервера.
pub const GENERIC_SERVER_ERROR: &str = "server error (unexpected HTML response)";

#[derive(Debug, Error)]
/// Ошибки клиентской библиотеки `mapinion-client`.
pub enum ClientError {
    /// Не заполнены обязательные локальные поля; до сети запрос не доходит.
    #[error("validation error: {0}")]
    Validation(String),

    /// Нет токена или сервер ответил 401/403.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Сервер вернул не-2xx с разборчивым сообщением.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-статус ответа.
        status: u16,
        /// Сообщение для пользователя.
        message: String,
    },

    /// 2xx без обязательных полей или тело, которое не удалось разобрать.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Запрос не удалось выполнить (соединение, таймаут).
    #[error("network error: {0}")]
    Network(String),

    /// Ошибка локального хранилища сессии.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Результат операций `mapinion-client`.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Категория ошибки без полезной нагрузки, удобна для ветвления во view-слое.
pub enum ErrorKind {
    /// См. [`ClientError::Validation`].
    Validation,
    /// См. [`ClientError::Unauthenticated`].
    Unauthenticated,
    /// См. [`ClientError::Server`].
    Server,
    /// См. [`ClientError::MalformedResponse`].
    MalformedResponse,
    /// См. [`ClientError::Network`].
    Network,
    /// См. [`ClientError::Storage`].
    Storage,
}

impl ClientError {
    /// Категория ошибки.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Server { .. } => ErrorKind::Server,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::Network(_) => ErrorKind::Network,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Текст, который можно показать пользователю как есть.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Unauthenticated => "session expired, please log in again".to_string(),
            Self::Server { status, message } => format!("{message} (status: {status})"),
            Self::MalformedResponse(detail) => {
                format!("unexpected response from server: {detail}")
            }
            Self::Network(_) => "network error, check your connection and try again".to_string(),
            Self::Storage(_) => "server error".to_string(),
        }
    }

    pub(crate) fn from_http_status(status: reqwest::StatusCode, message: Option<String>) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::Unauthenticated
            }
            _ => {
                let message = message.unwrap_or_else(|| format!("http status {status}"));
                Self::Server {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status, None);
        }
        if err.is_decode() {
            return Self::MalformedResponse(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Единый результат операций хранилищ: `{success, message}`.
///
/// Операции `SessionStore`/`FeedCache` не пробрасывают ошибки наружу,
/// а сворачивают их в `Outcome`, чтобы view-слою не приходилось
/// обрабатывать ожидаемые сбои как исключения.
pub struct Outcome {
    /// Успешно ли завершилась операция.
    pub success: bool,
    /// Сообщение для пользователя при неудаче.
    pub message: Option<String>,
    /// Категория ошибки при неудаче.
    pub kind: Option<ErrorKind>,
}

impl Outcome {
    /// Успешный результат без сообщения.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            kind: None,
        }
    }

    /// Неудачный результат из ошибки клиента; ошибка пишется в лог.
    pub fn from_error(err: ClientError) -> Self {
        tracing::warn!(error = %err, "operation failed");
        Self {
            success: false,
            message: Some(err.user_message()),
            kind: Some(err.kind()),
        }
    }

    /// `true`, если операция упала из-за отсутствия/отзыва авторизации.
    pub fn is_unauthenticated(&self) -> bool {
        self.kind == Some(ErrorKind::Unauthenticated)
    }
}

impl From<ClientResult<()>> for Outcome {
    fn from(value: ClientResult<()>) -> Self {
        match value {
            Ok(()) => Self::ok(),
            Err(err) => Self::from_error(err),
        }
    }
}
