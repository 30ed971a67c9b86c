//! Лента постов: постраничная загрузка, дедупликация по `id`,
//! подтверждённые правки и удаления.
//!
//! Ответы сервера могут приходить не в том порядке, в котором ушли запросы.
//! Каждый `Initial`/`Refresh` увеличивает поколение ленты; ответ, выданный
//! под старым поколением или в рамках другой сессии, отбрасывается до того,
//! как тронет состояние.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{NewPostPayload, RemoteApi, UpdatePostPayload};
use crate::error::{ClientError, ClientResult, Outcome};
use crate::media::encode_data_uri;
use crate::models::{FeedPage, Post, PostDraft, PostPatch};
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Режим загрузки страницы.
pub enum FetchMode {
    /// Первая загрузка экрана: заменяет ленту.
    Initial,
    /// Подгрузка следующей страницы: дописывает новые посты в конец.
    Append,
    /// Pull-to-refresh: сбрасывает курсор и заменяет ленту.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Позиция постраничной загрузки.
pub struct PaginationCursor {
    /// Номер последней успешно загруженной страницы (с 1).
    pub page_number: u32,
    /// Есть ли ещё страницы.
    pub has_more: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            page_number: 1,
            has_more: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Состояние автомата пагинации.
pub enum PaginationPhase {
    /// Можно подгружать.
    Idle,
    /// Идёт загрузка.
    Fetching,
    /// Страниц больше нет; выйти можно только через `refresh()`.
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Наблюдаемое состояние ленты.
pub struct FeedState {
    /// Посты ленты без повторов `id`, в порядке загрузки.
    pub items: Vec<Post>,
    /// Курсор пагинации.
    pub cursor: PaginationCursor,
    /// Идёт первая загрузка.
    pub is_loading_initial: bool,
    /// Идёт pull-to-refresh.
    pub is_refreshing: bool,
    /// Идёт подгрузка следующей страницы.
    pub is_appending: bool,
    /// Посты текущего пользователя (экран профиля).
    pub own_posts: Vec<Post>,
    /// Идёт загрузка постов пользователя.
    pub is_loading_own: bool,
    generation: u64,
}

impl FeedState {
    /// Идёт ли какая-либо загрузка ленты.
    pub fn is_fetching(&self) -> bool {
        self.is_loading_initial || self.is_refreshing || self.is_appending
    }

    /// Текущее состояние автомата пагинации.
    pub fn phase(&self) -> PaginationPhase {
        if self.is_fetching() {
            PaginationPhase::Fetching
        } else if !self.cursor.has_more {
            PaginationPhase::Exhausted
        } else {
            PaginationPhase::Idle
        }
    }

    fn find(&self, id: &str) -> Option<&Post> {
        self.items
            .iter()
            .chain(self.own_posts.iter())
            .find(|post| post.id == id)
    }
}

/// Запрос страницы, выданный под конкретным поколением ленты и сессией.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    page_number: u32,
    mode: FetchMode,
    generation: u64,
    epoch: u64,
}

struct FeedInner {
    api: Arc<dyn RemoteApi>,
    session: SessionStore,
    page_size: u32,
    state: watch::Sender<FeedState>,
}

#[derive(Clone)]
/// Кэш ленты. Дешёвый `Clone`-хэндл на общее состояние.
pub struct FeedCache {
    inner: Arc<FeedInner>,
}

impl std::fmt::Debug for FeedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCache")
            .field("page_size", &self.inner.page_size)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl FeedCache {
    /// Создаёт пустую ленту. `page_size` меньше 1 поднимается до 1.
    pub fn new(api: Arc<dyn RemoteApi>, session: SessionStore, page_size: u32) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            inner: Arc::new(FeedInner {
                api,
                session,
                page_size: page_size.max(1),
                state,
            }),
        }
    }

    /// Снимок текущего состояния.
    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    /// Подписка на изменения состояния.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    /// Размер страницы, с которым запрашивается лента.
    pub fn page_size(&self) -> u32 {
        self.inner.page_size
    }

    /// Загружает страницу `page_number` в режиме `mode`.
    ///
    /// Без токена сразу возвращает `Unauthenticated`, не обращаясь к сети.
    /// При ошибке лента и курсор не меняются; повторных попыток нет.
    pub async fn fetch_page(&self, page_number: u32, mode: FetchMode) -> Outcome {
        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        let ticket = self.begin(page_number, mode, epoch);
        self.run(ticket, &token).await
    }

    /// Первая загрузка ленты.
    pub async fn load_initial(&self) -> Outcome {
        self.fetch_page(1, FetchMode::Initial).await
    }

    /// Подгружает следующую страницу, если она есть и ничего не грузится.
    ///
    /// Одновременно выполняется не больше одной подгрузки: повторный вызов
    /// во время загрузки ничего не делает и возвращает успех.
    pub async fn load_more(&self) -> Outcome {
        let mut claimed = None;
        self.inner.state.send_if_modified(|state| {
            if !state.cursor.has_more || state.is_fetching() {
                return false;
            }
            state.is_appending = true;
            claimed = Some((state.cursor.page_number + 1, state.generation));
            true
        });

        let Some((page_number, generation)) = claimed else {
            tracing::debug!("load_more skipped: nothing to load or fetch in flight");
            return Outcome::ok();
        };

        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            self.inner.state.send_modify(|state| state.is_appending = false);
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        let ticket = Ticket {
            page_number,
            mode: FetchMode::Append,
            generation,
            epoch,
        };
        self.run(ticket, &token).await
    }

    /// Pull-to-refresh: курсор сбрасывается в `{1, true}` и лента
    /// загружается заново.
    pub async fn refresh(&self) -> Outcome {
        self.fetch_page(1, FetchMode::Refresh).await
    }

    /// Загружает посты текущего пользователя (`GET /posts/user`).
    pub async fn load_own_posts(&self) -> Outcome {
        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        self.inner
            .state
            .send_modify(|state| state.is_loading_own = true);
        let result = self.inner.api.list_user_posts(&token).await;

        let same_session = self.inner.session.epoch() == epoch;
        self.inner.state.send_modify(|state| {
            state.is_loading_own = false;
            if let (true, Ok(posts)) = (same_session, &result) {
                state.own_posts = dedupe(posts.clone());
            }
        });

        self.finish(result.map(|_| ()), epoch)
    }

    /// Создаёт пост.
    ///
    /// Черновик проверяется локально; при неполных данных сеть не
    /// трогается. Новый пост в ленту не вставляется: после успеха ленту
    /// нужно обновить через `refresh()`, чтобы порядок и поля совпали с
    /// серверными.
    pub async fn create_post(&self, draft: PostDraft) -> Outcome {
        if let Err(err) = draft.validate_draft() {
            return Outcome::from_error(err);
        }
        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        let PostDraft {
            title,
            caption,
            rating,
            image,
        } = draft;
        let (Some(rating), Some(image)) = (rating, image) else {
            return Outcome::from_error(ClientError::Validation(
                "rating and image are required".to_string(),
            ));
        };

        let payload = NewPostPayload {
            title,
            caption,
            rating,
            image_data_uri: encode_data_uri(&image.bytes, image.file_name.as_deref()),
        };
        let result = self.inner.api.create_post(&token, &payload).await;
        if let Ok(Some(post)) = &result {
            tracing::info!(post_id = %post.id, "post created");
        }
        self.finish(result.map(|_| ()), epoch)
    }

    /// Обновляет пост и после подтверждения сервера заменяет его на месте.
    pub async fn update_post(&self, id: &str, patch: PostPatch) -> Outcome {
        let rating = match patch.validate_patch() {
            Ok(rating) => rating,
            Err(err) => return Outcome::from_error(err),
        };
        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        let current = self.inner.state.borrow().find(id).cloned();
        let image = match (patch.image_url, &current) {
            (Some(url), _) => url,
            (None, Some(post)) => post.image_url.clone(),
            (None, None) => {
                return Outcome::from_error(ClientError::Validation(format!(
                    "post {id} is not loaded, refresh and try again"
                )));
            }
        };

        let payload = UpdatePostPayload {
            title: patch.title,
            caption: patch.caption,
            rating,
            image,
        };
        let result = self.inner.api.update_post(&token, id, &payload).await;

        if let Ok(returned) = &result {
            if self.inner.session.epoch() == epoch {
                let updated = merge_update(current, returned.clone(), id, &payload);
                self.inner.state.send_modify(|state| {
                    replace_in_place(&mut state.items, &updated);
                    replace_in_place(&mut state.own_posts, &updated);
                });
            }
        }
        self.finish(result.map(|_| ()), epoch)
    }

    /// Удаляет пост. Из ленты он убирается только после ответа 2xx.
    pub async fn delete_post(&self, id: &str) -> Outcome {
        let Some((token, epoch)) = self.inner.session.credential_with_epoch() else {
            return Outcome::from_error(ClientError::Unauthenticated);
        };

        let result = self.inner.api.delete_post(&token, id).await;
        if result.is_ok() && self.inner.session.epoch() == epoch {
            self.inner.state.send_modify(|state| {
                state.items.retain(|post| post.id != id);
                state.own_posts.retain(|post| post.id != id);
            });
            tracing::info!(post_id = %id, "post deleted");
        }
        self.finish(result, epoch)
    }

    /// Очищает ленту (например, после выхода). Ответы, которые ещё в пути,
    /// будут отброшены.
    pub fn clear(&self) {
        self.inner.state.send_modify(|state| {
            let generation = state.generation + 1;
            *state = FeedState {
                generation,
                ..FeedState::default()
            };
        });
    }

    /// Отмечает начало загрузки и выдаёт билет запроса.
    fn begin(&self, page_number: u32, mode: FetchMode, epoch: u64) -> Ticket {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            match mode {
                FetchMode::Initial | FetchMode::Refresh => {
                    state.generation += 1;
                    state.is_loading_initial = mode == FetchMode::Initial;
                    state.is_refreshing = mode == FetchMode::Refresh;
                    if mode == FetchMode::Refresh {
                        state.cursor = PaginationCursor::default();
                    }
                }
                FetchMode::Append => state.is_appending = true,
            }
            generation = state.generation;
        });

        Ticket {
            page_number,
            mode,
            generation,
            epoch,
        }
    }

    async fn run(&self, ticket: Ticket, token: &str) -> Outcome {
        let result = self
            .inner
            .api
            .list_posts(token, ticket.page_number, self.inner.page_size)
            .await;

        let same_session = self.inner.session.epoch() == ticket.epoch;
        let page_size = self.inner.page_size;
        let mut applied = false;

        self.inner.state.send_modify(|state| {
            let current = state.generation == ticket.generation;
            match ticket.mode {
                FetchMode::Append => state.is_appending = false,
                FetchMode::Initial | FetchMode::Refresh if current => {
                    state.is_loading_initial = false;
                    state.is_refreshing = false;
                }
                _ => {}
            }

            if !current || !same_session {
                return;
            }
            if let Ok(page) = &result {
                apply_page(state, page, ticket, page_size);
                applied = true;
            }
        });

        if result.is_ok() && !applied {
            tracing::debug!(
                page = ticket.page_number,
                mode = ?ticket.mode,
                "discarding stale feed response"
            );
        }
        self.finish(result.map(|_| ()), ticket.epoch)
    }

    /// Переводит результат в `Outcome`; на 401/403 сбрасывает сессию.
    fn finish(&self, result: ClientResult<()>, epoch: u64) -> Outcome {
        if let Err(ClientError::Unauthenticated) = &result {
            self.inner.session.invalidate(epoch);
        }
        Outcome::from(result)
    }
}

fn apply_page(state: &mut FeedState, page: &FeedPage, ticket: Ticket, page_size: u32) {
    let received = page.posts.len();
    let renderable = page.posts.iter().filter(|post| {
        if post.author.is_none() {
            tracing::warn!(post_id = %post.id, "post without author, excluded from feed");
            return false;
        }
        true
    });

    match ticket.mode {
        FetchMode::Initial | FetchMode::Refresh => {
            state.items = dedupe(renderable.cloned().collect());
        }
        FetchMode::Append => {
            let mut known: HashSet<String> =
                state.items.iter().map(|post| post.id.clone()).collect();
            for post in renderable {
                if known.insert(post.id.clone()) {
                    state.items.push(post.clone());
                }
            }
        }
    }

    let has_more = match page.total_pages {
        _ if received == 0 => false,
        Some(total) => ticket.page_number < total,
        None => received >= page_size as usize,
    };
    state.cursor = PaginationCursor {
        page_number: ticket.page_number,
        has_more,
    };

    tracing::debug!(
        page = ticket.page_number,
        received,
        total_items = state.items.len(),
        has_more,
        "feed page applied"
    );
}

/// Убирает повторы `id`, сохраняя первое вхождение.
fn dedupe(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::with_capacity(posts.len());
    posts
        .into_iter()
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

fn replace_in_place(posts: &mut [Post], updated: &Post) {
    if let Some(slot) = posts.iter_mut().find(|post| post.id == updated.id) {
        *slot = updated.clone();
    }
}

/// Собирает обновлённый пост: ответ сервера, если он есть, иначе локальный
/// пост с применёнными полями. Автор берётся из кэша, если сервер его не
/// прислал.
fn merge_update(
    current: Option<Post>,
    returned: Option<Post>,
    id: &str,
    payload: &UpdatePostPayload,
) -> Post {
    let author = current.as_ref().and_then(|post| post.author.clone());
    match (returned, current) {
        (Some(mut post), _) => {
            post.id = id.to_string();
            if post.author.is_none() {
                post.author = author;
            }
            post
        }
        (None, current) => {
            let created_at = current.and_then(|post| post.created_at);
            Post {
                id: id.to_string(),
                author,
                title: payload.title.clone(),
                caption: payload.caption.clone(),
                rating: payload.rating,
                image_url: payload.image.clone(),
                created_at,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ErrorKind, GENERIC_SERVER_ERROR};
    use crate::models::{AuthResponse, AuthorRef, ImageAttachment, User};
    use crate::storage::MemoryStorage;

    #[derive(Default)]
    struct FakeFeedApi {
        pages: Mutex<VecDeque<ClientResult<FeedPage>>>,
        page_calls: Mutex<Vec<(u32, u32)>>,
        own_posts: Mutex<Option<ClientResult<Vec<Post>>>>,
        create_calls: Mutex<Vec<NewPostPayload>>,
        create_result: Mutex<Option<ClientResult<Option<Post>>>>,
        update_result: Mutex<Option<ClientResult<Option<Post>>>>,
        update_calls: Mutex<Vec<(String, UpdatePostPayload)>>,
        delete_result: Mutex<Option<ClientResult<()>>>,
    }

    impl FakeFeedApi {
        fn push_page(&self, page: ClientResult<FeedPage>) {
            self.pages.lock().expect("pages mutex poisoned").push_back(page);
        }

        fn page_calls(&self) -> Vec<(u32, u32)> {
            self.page_calls
                .lock()
                .expect("page_calls mutex poisoned")
                .clone()
        }
    }

    #[async_trait]
    impl RemoteApi for FakeFeedApi {
        async fn register(&self, _: &str, _: &str, _: &str) -> ClientResult<AuthResponse> {
            Ok(sample_auth())
        }

        async fn login(&self, _: &str, _: &str) -> ClientResult<AuthResponse> {
            Ok(sample_auth())
        }

        async fn list_posts(&self, _: &str, page: u32, limit: u32) -> ClientResult<FeedPage> {
            self.page_calls
                .lock()
                .expect("page_calls mutex poisoned")
                .push((page, limit));
            self.pages
                .lock()
                .expect("pages mutex poisoned")
                .pop_front()
                .expect("unexpected list_posts call")
        }

        async fn list_user_posts(&self, _: &str) -> ClientResult<Vec<Post>> {
            self.own_posts
                .lock()
                .expect("own_posts mutex poisoned")
                .take()
                .expect("unexpected list_user_posts call")
        }

        async fn create_post(
            &self,
            _: &str,
            payload: &NewPostPayload,
        ) -> ClientResult<Option<Post>> {
            self.create_calls
                .lock()
                .expect("create_calls mutex poisoned")
                .push(payload.clone());
            self.create_result
                .lock()
                .expect("create_result mutex poisoned")
                .take()
                .unwrap_or(Ok(None))
        }

        async fn update_post(
            &self,
            _: &str,
            id: &str,
            payload: &UpdatePostPayload,
        ) -> ClientResult<Option<Post>> {
            self.update_calls
                .lock()
                .expect("update_calls mutex poisoned")
                .push((id.to_string(), payload.clone()));
            self.update_result
                .lock()
                .expect("update_result mutex poisoned")
                .take()
                .unwrap_or(Ok(None))
        }

        async fn delete_post(&self, _: &str, _: &str) -> ClientResult<()> {
            self.delete_result
                .lock()
                .expect("delete_result mutex poisoned")
                .take()
                .unwrap_or(Ok(()))
        }
    }

    fn sample_auth() -> AuthResponse {
        AuthResponse {
            token: "jwt".to_string(),
            user: User {
                id: "u1".to_string(),
                username: "ana".to_string(),
                email: "ana@example.com".to_string(),
                profile_picture_url: None,
                created_at: None,
            },
        }
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            author: Some(AuthorRef {
                id: Some("u1".to_string()),
                username: "ana".to_string(),
                profile_picture_url: None,
            }),
            title: format!("title {id}"),
            caption: format!("caption {id}"),
            rating: 4,
            image_url: format!("https://img/{id}.jpg"),
            created_at: None,
        }
    }

    fn page(ids: &[&str], total_pages: Option<u32>) -> ClientResult<FeedPage> {
        Ok(FeedPage {
            posts: ids.iter().map(|id| post(id)).collect(),
            total_pages,
        })
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|post| post.id.as_str()).collect()
    }

    async fn logged_in(api: Arc<FakeFeedApi>) -> (SessionStore, FeedCache) {
        let session = SessionStore::new(api.clone(), Arc::new(MemoryStorage::new()));
        session.restore();
        assert!(session.login("ana@example.com", "secret").await.success);
        let feed = FeedCache::new(api, session.clone(), 3);
        (session, feed)
    }

    #[tokio::test]
    async fn overlapping_pages_are_deduplicated() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], None));
        api.push_page(page(&["c", "d", "e"], None));
        let (_, feed) = logged_in(api.clone()).await;

        assert!(feed.load_initial().await.success);
        assert!(feed.load_more().await.success);

        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(state.cursor.page_number, 2);
        assert_eq!(api.page_calls(), vec![(1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn initial_page_is_deduplicated_against_itself() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "a", "b"], None));
        let (_, feed) = logged_in(api).await;

        assert!(feed.load_initial().await.success);
        assert_eq!(ids(&feed.state().items), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn short_page_exhausts_feed_and_load_more_is_noop() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b"], None));
        let (_, feed) = logged_in(api.clone()).await;

        assert!(feed.load_initial().await.success);
        let before = feed.state();
        assert!(!before.cursor.has_more);
        assert_eq!(before.phase(), PaginationPhase::Exhausted);

        assert!(feed.load_more().await.success);
        assert_eq!(feed.state(), before);
        assert_eq!(api.page_calls().len(), 1);
    }

    #[tokio::test]
    async fn total_pages_drives_has_more() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], Some(1)));
        let (_, feed) = logged_in(api).await;

        assert!(feed.load_initial().await.success);
        assert!(!feed.state().cursor.has_more);
    }

    #[tokio::test]
    async fn empty_page_exhausts_feed_despite_total_pages() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], Some(5)));
        api.push_page(page(&[], Some(5)));
        let (_, feed) = logged_in(api.clone()).await;

        assert!(feed.load_initial().await.success);
        assert!(feed.load_more().await.success);

        let state = feed.state();
        assert_eq!(state.phase(), PaginationPhase::Exhausted);
        assert_eq!(ids(&state.items), vec!["a", "b", "c"]);

        assert!(feed.load_more().await.success);
        assert_eq!(api.page_calls(), vec![(1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn failed_append_keeps_items_and_cursor() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], None));
        api.push_page(Err(ClientError::Network("timeout".to_string())));
        api.push_page(page(&["d"], None));
        let (_, feed) = logged_in(api.clone()).await;
        assert!(feed.load_initial().await.success);

        let outcome = feed.load_more().await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::Network));
        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["a", "b", "c"]);
        assert_eq!(state.cursor.page_number, 1);
        assert_eq!(state.phase(), PaginationPhase::Idle);

        assert!(feed.load_more().await.success);
        assert_eq!(api.page_calls(), vec![(1, 3), (2, 3), (2, 3)]);
        assert_eq!(ids(&feed.state().items), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn refresh_resets_cursor_and_replaces_items() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b"], None));
        api.push_page(page(&["x", "y", "z"], None));
        let (_, feed) = logged_in(api).await;
        assert!(feed.load_initial().await.success);
        assert!(!feed.state().cursor.has_more);

        assert!(feed.refresh().await.success);

        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["x", "y", "z"]);
        assert_eq!(state.cursor, PaginationCursor::default());
        assert!(!state.is_refreshing);
    }

    #[tokio::test]
    async fn unauthorized_fetch_clears_session() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(Err(ClientError::Unauthenticated));
        let (session, feed) = logged_in(api.clone()).await;

        let outcome = feed.load_initial().await;
        assert!(outcome.is_unauthenticated());
        assert!(session.credential().is_none());

        let outcome = feed.refresh().await;
        assert!(outcome.is_unauthenticated());
        assert_eq!(api.page_calls().len(), 1);
    }

    #[tokio::test]
    async fn fetch_without_credential_does_not_touch_network() {
        let api = Arc::new(FakeFeedApi::default());
        let session = SessionStore::new(api.clone(), Arc::new(MemoryStorage::new()));
        session.restore();
        let feed = FeedCache::new(api.clone(), session, 3);

        assert!(feed.load_initial().await.is_unauthenticated());
        assert!(feed.load_more().await.is_unauthenticated());
        assert!(!feed.state().is_appending);
        assert!(api.page_calls().is_empty());
    }

    #[tokio::test]
    async fn posts_without_author_are_excluded() {
        let api = Arc::new(FakeFeedApi::default());
        let mut orphan = post("b");
        orphan.author = None;
        api.push_page(Ok(FeedPage {
            posts: vec![post("a"), orphan, post("c")],
            total_pages: None,
        }));
        let (_, feed) = logged_in(api).await;

        assert!(feed.load_initial().await.success);
        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["a", "c"]);
        assert!(state.cursor.has_more);
    }

    #[tokio::test]
    async fn stale_append_is_discarded_after_refresh() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], None));
        api.push_page(page(&["x", "y", "z"], None));
        api.push_page(page(&["d", "e", "f"], None));
        let (_, feed) = logged_in(api).await;
        assert!(feed.load_initial().await.success);

        let ticket = Ticket {
            page_number: 2,
            mode: FetchMode::Append,
            generation: feed.state().generation,
            epoch: feed.inner.session.epoch(),
        };
        feed.inner.state.send_modify(|s| s.is_appending = true);
        assert!(feed.refresh().await.success);

        // Ответ на подгрузку, выданную до refresh, приходит последним.
        assert!(feed.run(ticket, "jwt").await.success);

        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["x", "y", "z"]);
        assert_eq!(state.cursor.page_number, 1);
        assert!(!state.is_appending);
    }

    #[tokio::test]
    async fn response_after_logout_is_discarded() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a"], None));
        let (session, feed) = logged_in(api).await;

        let ticket = feed.begin(1, FetchMode::Initial, session.epoch());
        session.logout();
        assert!(feed.run(ticket, "jwt").await.success);

        assert!(feed.state().items.is_empty());
    }

    #[tokio::test]
    async fn create_post_without_image_is_rejected_locally() {
        let api = Arc::new(FakeFeedApi::default());
        let (_, feed) = logged_in(api.clone()).await;

        let outcome = feed
            .create_post(PostDraft {
                title: "t".to_string(),
                caption: "c".to_string(),
                rating: Some(3),
                image: None,
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::Validation));
        assert!(api.create_calls.lock().expect("mutex").is_empty());
    }

    #[tokio::test]
    async fn create_post_sends_data_uri_and_does_not_insert() {
        let api = Arc::new(FakeFeedApi::default());
        let (_, feed) = logged_in(api.clone()).await;

        let outcome = feed
            .create_post(PostDraft {
                title: "Burger".to_string(),
                caption: "good".to_string(),
                rating: Some(5),
                image: Some(ImageAttachment {
                    bytes: b"png".to_vec(),
                    file_name: Some("pic.png".to_string()),
                }),
            })
            .await;

        assert!(outcome.success);
        let calls = api.create_calls.lock().expect("mutex").clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].rating, 5);
        assert!(calls[0].image_data_uri.starts_with("data:image/png;base64,"));
        assert!(feed.state().items.is_empty());
    }

    #[tokio::test]
    async fn create_post_surfaces_generic_message_for_html_error() {
        let api = Arc::new(FakeFeedApi::default());
        *api.create_result.lock().expect("mutex") = Some(Err(ClientError::Server {
            status: 502,
            message: GENERIC_SERVER_ERROR.to_string(),
        }));
        let (_, feed) = logged_in(api.clone()).await;

        let outcome = feed
            .create_post(PostDraft {
                title: "Burger".to_string(),
                caption: "good".to_string(),
                rating: Some(5),
                image: Some(ImageAttachment {
                    bytes: b"jpg".to_vec(),
                    file_name: Some("pic.jpg".to_string()),
                }),
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::Server));
        assert_eq!(
            outcome.message.as_deref(),
            Some(format!("{GENERIC_SERVER_ERROR} (status: 502)").as_str())
        );
        assert_eq!(api.create_calls.lock().expect("mutex").len(), 1);
        assert!(feed.state().items.is_empty());
    }

    #[tokio::test]
    async fn update_post_replaces_entry_in_place_and_resends_image() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], None));
        let (_, feed) = logged_in(api.clone()).await;
        assert!(feed.load_initial().await.success);

        let outcome = feed
            .update_post(
                "b",
                PostPatch {
                    title: "new title".to_string(),
                    caption: "new caption".to_string(),
                    rating: "2".to_string(),
                    image_url: None,
                },
            )
            .await;

        assert!(outcome.success);
        let state = feed.state();
        assert_eq!(ids(&state.items), vec!["a", "b", "c"]);
        assert_eq!(state.items[1].title, "new title");
        assert_eq!(state.items[1].rating, 2);
        assert!(state.items[1].author.is_some());

        let calls = api.update_calls.lock().expect("mutex").clone();
        assert_eq!(calls[0].0, "b");
        assert_eq!(calls[0].1.image, "https://img/b.jpg");
    }

    #[tokio::test]
    async fn update_post_with_non_numeric_rating_is_validation_error() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a"], None));
        let (_, feed) = logged_in(api.clone()).await;
        assert!(feed.load_initial().await.success);

        let outcome = feed
            .update_post(
                "a",
                PostPatch {
                    title: "t".to_string(),
                    caption: "c".to_string(),
                    rating: "great".to_string(),
                    image_url: None,
                },
            )
            .await;

        assert_eq!(outcome.kind, Some(ErrorKind::Validation));
        assert!(api.update_calls.lock().expect("mutex").is_empty());
    }

    #[tokio::test]
    async fn failed_update_leaves_items_untouched() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a"], None));
        *api.update_result.lock().expect("mutex") = Some(Err(ClientError::Server {
            status: 500,
            message: "boom".to_string(),
        }));
        let (_, feed) = logged_in(api).await;
        assert!(feed.load_initial().await.success);
        let before = feed.state().items;

        let outcome = feed
            .update_post(
                "a",
                PostPatch {
                    title: "t".to_string(),
                    caption: "c".to_string(),
                    rating: "1".to_string(),
                    image_url: None,
                },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(feed.state().items, before);
    }

    #[tokio::test]
    async fn delete_removes_only_on_success() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b", "c"], None));
        let (_, feed) = logged_in(api.clone()).await;
        assert!(feed.load_initial().await.success);

        *api.delete_result.lock().expect("mutex") =
            Some(Err(ClientError::Network("offline".to_string())));
        assert!(!feed.delete_post("b").await.success);
        assert_eq!(ids(&feed.state().items), vec!["a", "b", "c"]);

        assert!(feed.delete_post("b").await.success);
        assert_eq!(ids(&feed.state().items), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn own_posts_keep_entries_without_author() {
        let api = Arc::new(FakeFeedApi::default());
        let mut mine = post("m1");
        mine.author = None;
        *api.own_posts.lock().expect("mutex") = Some(Ok(vec![mine.clone(), mine]));
        let (_, feed) = logged_in(api).await;

        assert!(feed.load_own_posts().await.success);
        let state = feed.state();
        assert_eq!(ids(&state.own_posts), vec!["m1"]);
        assert!(!state.is_loading_own);
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let api = Arc::new(FakeFeedApi::default());
        api.push_page(page(&["a", "b"], None));
        let (_, feed) = logged_in(api).await;
        assert!(feed.load_initial().await.success);

        feed.clear();

        let state = feed.state();
        assert!(state.items.is_empty());
        assert_eq!(state.cursor, PaginationCursor::default());
    }
}
