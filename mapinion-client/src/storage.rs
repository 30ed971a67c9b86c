use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ClientError, ClientResult};
use crate::models::User;

/// Ключ, под которым хранится сериализованный пользователь.
pub const USER_KEY: &str = "user";
/// Ключ, под которым хранится bearer-токен.
pub const TOKEN_KEY: &str = "token";

/// Долговременное key-value хранилище, переживающее перезапуск процесса.
pub trait DurableStorage: Send + Sync {
    /// Читает значение по ключу.
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    /// Записывает значение по ключу.
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    /// Удаляет значение по ключу. Отсутствующий ключ не считается ошибкой.
    fn remove(&self, key: &str) -> ClientResult<()>;
}

#[derive(Debug)]
/// Хранилище в одном JSON-файле (`{"user": "...", "token": "..."}`).
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Создаёт хранилище поверх файла; сам файл появляется при первой записи.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Путь к файлу хранилища.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> ClientResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| {
            ClientError::Storage(format!("read {}: {err}", self.path.display()))
        })?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|err| ClientError::Storage(format!("parse {}: {err}", self.path.display())))
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                ClientError::Storage(format!("create {}: {err}", parent.display()))
            })?;
        }
        let raw = serde_json::to_string_pretty(map)
            .map_err(|err| ClientError::Storage(format!("serialize session: {err}")))?;
        fs::write(&self.path, raw)
            .map_err(|err| ClientError::Storage(format!("write {}: {err}", self.path.display())))
    }

    /// Читает карту для изменения; испорченный файл перезаписывается с нуля.
    fn read_map_for_update(&self) -> BTreeMap<String, String> {
        self.read_map().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "session file is corrupt, starting from scratch");
            BTreeMap::new()
        })
    }

    fn guard(&self) -> ClientResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| ClientError::Storage("file storage lock poisoned".to_string()))
    }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        let _guard = self.guard()?;
        let mut map = self.read_map_for_update();
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        let _guard = self.guard()?;
        if !self.path.exists() {
            return Ok(());
        }
        let mut map = self.read_map_for_update();
        map.remove(key);
        self.write_map(&map)
    }
}

#[derive(Debug, Default)]
/// Хранилище в памяти процесса.
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Пустое хранилище.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> ClientResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| ClientError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

pub(crate) fn parse_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_string();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

pub(crate) fn parse_user(raw: &str) -> Option<User> {
    serde_json::from_str::<User>(raw).ok()
}

/// Читает сохранённую пару (пользователь, токен).
///
/// Возвращает `Some` только если есть и разбираются оба значения.
pub(crate) fn load_session(storage: &dyn DurableStorage) -> ClientResult<Option<(User, String)>> {
    let user = storage.get(USER_KEY)?.as_deref().and_then(parse_user);
    let token = storage.get(TOKEN_KEY)?.as_deref().and_then(parse_token);

    match (user, token) {
        (Some(user), Some(token)) => Ok(Some((user, token))),
        (None, None) => Ok(None),
        (user, token) => {
            tracing::warn!(
                has_user = user.is_some(),
                has_token = token.is_some(),
                "persisted session is incomplete, discarding it"
            );
            Ok(None)
        }
    }
}

pub(crate) fn save_session(
    storage: &dyn DurableStorage,
    user: &User,
    token: &str,
) -> ClientResult<()> {
    let raw = serde_json::to_string(user)
        .map_err(|err| ClientError::Storage(format!("failed to serialize user: {err}")))?;
    storage.set(USER_KEY, &raw)?;
    storage.set(TOKEN_KEY, token)
}

/// Удаляет оба ключа; пытается удалить второй, даже если первый не удалился.
pub(crate) fn clear_session(storage: &dyn DurableStorage) -> ClientResult<()> {
    let user = storage.remove(USER_KEY);
    let token = storage.remove(TOKEN_KEY);
    user.and(token)
}
