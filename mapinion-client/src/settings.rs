use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Базовый URL API по умолчанию.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
/// Размер страницы ленты по умолчанию.
pub const DEFAULT_PAGE_SIZE: u32 = 3;
/// Файл сессии по умолчанию.
pub const DEFAULT_STORAGE_PATH: &str = ".mapinion_session.json";

#[derive(Debug, Clone)]
/// Настройки клиента, читаются из окружения.
pub struct ClientSettings {
    /// Базовый URL API (`MAPINION_API_URL`).
    pub api_url: String,
    /// Размер страницы ленты (`MAPINION_PAGE_SIZE`).
    pub page_size: u32,
    /// Таймаут установки соединения (`MAPINION_CONNECT_TIMEOUT_SECS`).
    pub connect_timeout: Duration,
    /// Таймаут всего запроса (`MAPINION_REQUEST_TIMEOUT_SECS`).
    pub request_timeout: Duration,
    /// Путь к файлу сохранённой сессии (`MAPINION_STORAGE_PATH`).
    pub storage_path: PathBuf,
    /// Уровень логирования (`LOG_LEVEL` или `RUST_LOG`).
    pub log_level: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            log_level: "info".to_string(),
        }
    }
}

impl ClientSettings {
    /// Читает настройки из переменных окружения; отсутствующие берутся по умолчанию.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// То же, что [`ClientSettings::from_env`], но с произвольным источником значений.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = match lookup("MAPINION_API_URL") {
            Some(raw) => normalize_api_url(&raw)?,
            None => defaults.api_url,
        };
        let page_size = parse_positive(&lookup, "MAPINION_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE))?;
        let page_size = u32::try_from(page_size)
            .with_context(|| format!("MAPINION_PAGE_SIZE is too large: {page_size}"))?;
        let connect_timeout = Duration::from_secs(parse_positive(
            &lookup,
            "MAPINION_CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
        )?);
        let request_timeout = Duration::from_secs(parse_positive(
            &lookup,
            "MAPINION_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?);
        let storage_path = lookup("MAPINION_STORAGE_PATH")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);
        let log_level = lookup("LOG_LEVEL")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or(defaults.log_level);

        Ok(Self {
            api_url,
            page_size,
            connect_timeout,
            request_timeout,
            storage_path,
            log_level,
        })
    }
}

/// Добавляет `http://`, если схема не указана.
pub fn normalize_api_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("api url must not be empty"));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }
    Ok(format!("http://{raw}"))
}

fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == 0 {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}
