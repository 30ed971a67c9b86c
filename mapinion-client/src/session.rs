//! Сессия пользователя: текущий пользователь, токен и их сохранение между
//! запусками.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::RemoteApi;
use crate::error::{ClientError, Outcome};
use crate::models::{AuthResponse, User};
use crate::storage::{self, DurableStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Жизненный цикл сессии на старте процесса.
pub enum Lifecycle {
    /// Сохранённая сессия ещё не прочитана.
    #[default]
    Uninitialized,
    /// `restore()` завершился; можно решать, какой экран показывать.
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Пользователь и его токен. Хранятся только вместе.
pub struct Authenticated {
    /// Текущий пользователь.
    pub user: User,
    /// Bearer-токен.
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Наблюдаемое состояние сессии.
pub struct SessionState {
    /// Пользователь с токеном; `None`, если вход не выполнен.
    pub auth: Option<Authenticated>,
    /// Стадия инициализации.
    pub lifecycle: Lifecycle,
    /// Идёт запрос `login`/`register`.
    pub is_loading: bool,
    epoch: u64,
}

impl SessionState {
    /// Текущий пользователь.
    pub fn identity(&self) -> Option<&User> {
        self.auth.as_ref().map(|auth| &auth.user)
    }

    /// Текущий токен.
    pub fn credential(&self) -> Option<&str> {
        self.auth.as_ref().map(|auth| auth.token.as_str())
    }

    /// Выполнен ли вход.
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Номер сессии; меняется при каждом входе, выходе и сбросе токена.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    pub(crate) fn for_tests(auth: Option<Authenticated>, lifecycle: Lifecycle) -> Self {
        Self {
            auth,
            lifecycle,
            is_loading: false,
            epoch: 0,
        }
    }
}

struct SessionInner {
    api: Arc<dyn RemoteApi>,
    storage: Arc<dyn DurableStorage>,
    state: watch::Sender<SessionState>,
}

#[derive(Clone)]
/// Хранилище сессии. Дешёвый `Clone`-хэндл на общее состояние.
///
/// Изменяется только через `restore`, `login`, `register`, `logout` и сброс
/// токена после ответа 401/403. Подписчики получают новое состояние через
/// [`SessionStore::subscribe`].
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Создаёт хранилище в состоянии `Uninitialized`.
    pub fn new(api: Arc<dyn RemoteApi>, storage: Arc<dyn DurableStorage>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                api,
                storage,
                state,
            }),
        }
    }

    /// Снимок текущего состояния.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Подписка на изменения состояния.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Текущий токен.
    pub fn credential(&self) -> Option<String> {
        self.inner.state.borrow().credential().map(str::to_string)
    }

    /// Токен вместе с номером сессии, в которой он выдан.
    pub(crate) fn credential_with_epoch(&self) -> Option<(String, u64)> {
        let state = self.inner.state.borrow();
        state
            .credential()
            .map(|token| (token.to_string(), state.epoch))
    }

    /// Номер текущей сессии.
    pub fn epoch(&self) -> u64 {
        self.inner.state.borrow().epoch
    }

    /// Восстанавливает сессию из хранилища на старте процесса.
    ///
    /// Никогда не падает: при отсутствии или порче данных сессия очищается.
    /// Последним действием переводит `lifecycle` в `Ready`; повторный вызов
    /// ничего не делает.
    pub fn restore(&self) {
        if self.inner.state.borrow().lifecycle == Lifecycle::Ready {
            tracing::debug!("session already restored");
            return;
        }

        let restored = match storage::load_session(self.inner.storage.as_ref()) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read persisted session");
                None
            }
        };

        match &restored {
            Some((user, _)) => tracing::info!(user_id = %user.id, "session restored"),
            None => tracing::info!("no persisted session"),
        }

        self.inner.state.send_modify(|state| {
            state.auth = restored.map(|(user, token)| Authenticated { user, token });
            state.lifecycle = Lifecycle::Ready;
        });
    }

    /// Регистрирует пользователя и сразу выполняет вход.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Outcome {
        self.set_loading(true);
        let result = self.inner.api.register(username, email, password).await;
        self.finish_auth(result)
    }

    /// Выполняет вход по email и паролю.
    pub async fn login(&self, email: &str, password: &str) -> Outcome {
        self.set_loading(true);
        let result = self.inner.api.login(email, password).await;
        self.finish_auth(result)
    }

    /// Выходит из аккаунта.
    ///
    /// Хранилище очищается по возможности; состояние в памяти очищается
    /// в любом случае.
    pub fn logout(&self) {
        if let Err(err) = storage::clear_session(self.inner.storage.as_ref()) {
            tracing::warn!(error = %err, "failed to clear persisted session");
        }
        self.inner.state.send_modify(|state| {
            state.auth = None;
            state.epoch += 1;
        });
        tracing::info!("logged out");
    }

    /// Сбрасывает текущую сессию, если сервер отверг токен.
    pub fn clear_unauthorized(&self) {
        self.invalidate(self.epoch());
    }

    /// Сбрасывает сессию после ответа 401/403.
    ///
    /// Срабатывает только если с момента запроса сессия не сменилась, иначе
    /// запоздавший ответ мог бы выкинуть пользователя из новой сессии.
    /// Возвращает `true`, если сессия была сброшена.
    pub(crate) fn invalidate(&self, epoch: u64) -> bool {
        let cleared = self.inner.state.send_if_modified(|state| {
            if state.epoch != epoch || state.auth.is_none() {
                return false;
            }
            state.auth = None;
            state.epoch += 1;
            true
        });

        if cleared {
            tracing::warn!("server rejected credential, session cleared");
            if let Err(err) = storage::clear_session(self.inner.storage.as_ref()) {
                tracing::warn!(error = %err, "failed to clear persisted session");
            }
        }
        cleared
    }

    fn set_loading(&self, loading: bool) {
        self.inner.state.send_if_modified(|state| {
            if state.is_loading == loading {
                return false;
            }
            state.is_loading = loading;
            true
        });
    }

    fn finish_auth(&self, result: Result<AuthResponse, ClientError>) -> Outcome {
        match result {
            Ok(AuthResponse { token, user }) => {
                if let Err(err) = storage::save_session(self.inner.storage.as_ref(), &user, &token)
                {
                    tracing::warn!(error = %err, "failed to persist session");
                }
                tracing::info!(user_id = %user.id, "authenticated");

                self.inner.state.send_modify(|state| {
                    state.auth = Some(Authenticated { user, token });
                    state.is_loading = false;
                    state.lifecycle = Lifecycle::Ready;
                    state.epoch += 1;
                });
                Outcome::ok()
            }
            Err(err) => {
                self.set_loading(false);
                Outcome::from_error(err)
            }
        }
    }
}
