mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use mapinion_client::{
    ClientSettings, ErrorKind, FeedCache, FileStorage, HttpClient, ImageAttachment, Outcome, Post,
    PostDraft, PostPatch, Screen, SessionState, SessionStore, normalize_api_url, resolve_redirect,
};

use logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "mapinion-cli", version, about = "CLI клиент для Mapinion")]
struct Cli {
    /// Базовый URL API (по умолчанию из MAPINION_API_URL).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Размер страницы ленты (по умолчанию из MAPINION_PAGE_SIZE).
    #[arg(long, global = true)]
    page_size: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация пользователя.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Вход пользователя.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Выход и удаление сохранённой сессии.
    Logout,
    /// Кто вошёл и какой экран показал бы клиент.
    Whoami,
    /// Лента постов (требует вход).
    Feed {
        /// Сколько страниц загрузить.
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Свои посты (требует вход).
    Mine,
    /// Создание поста (требует вход).
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        caption: String,
        #[arg(long)]
        rating: u8,
        /// Путь к файлу изображения.
        #[arg(long)]
        image: PathBuf,
    },
    /// Обновление своего поста (требует вход).
    ///
    /// Если `--image-url` не указан, сохраняется текущее изображение поста.
    Update {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        caption: String,
        #[arg(long)]
        rating: String,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Удаление своего поста (требует вход).
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = resolve_settings(ClientSettings::from_env()?, cli.server, cli.page_size)?;
    init_logging(&settings.log_level)?;

    let api = Arc::new(
        HttpClient::from_settings(&settings).context("не удалось создать HTTP клиент")?,
    );
    let storage = Arc::new(FileStorage::new(&settings.storage_path));
    let session = SessionStore::new(api.clone(), storage);
    session.restore();
    let feed = FeedCache::new(api, session.clone(), settings.page_size);

    match cli.command {
        Command::Register {
            username,
            email,
            password,
        } => {
            check(session.register(&username, &email, &password).await)?;
            print_session("Регистрация успешна", &session.state());
        }
        Command::Login { email, password } => {
            check(session.login(&email, &password).await)?;
            print_session("Вход выполнен", &session.state());
        }
        Command::Logout => {
            session.logout();
            feed.clear();
            println!("Выход выполнен");
        }
        Command::Whoami => {
            let state = session.state();
            print_session("Сессия", &state);
            println!("экран: {:?}", landing_screen(&state));
        }
        Command::Feed { pages } => {
            check(feed.load_initial().await)?;
            for _ in 1..pages {
                if !feed.state().cursor.has_more {
                    break;
                }
                check(feed.load_more().await)?;
            }
            let state = feed.state();
            print_posts(
                &format!(
                    "Лента: {} постов (страница {}, ещё есть: {})",
                    state.items.len(),
                    state.cursor.page_number,
                    state.cursor.has_more
                ),
                &state.items,
            );
        }
        Command::Mine => {
            check(feed.load_own_posts().await)?;
            let state = feed.state();
            print_posts(
                &format!("Мои посты: {}", state.own_posts.len()),
                &state.own_posts,
            );
        }
        Command::Create {
            title,
            caption,
            rating,
            image,
        } => {
            let draft = PostDraft {
                title,
                caption,
                rating: Some(rating),
                image: Some(read_image(&image)?),
            };
            check(feed.create_post(draft).await)?;
            println!("Пост создан");
        }
        Command::Update {
            id,
            title,
            caption,
            rating,
            image_url,
        } => {
            // Без нового URL изображение берётся из загруженного поста.
            if image_url.is_none() {
                check(feed.load_own_posts().await)?;
            }
            let patch = PostPatch {
                title,
                caption,
                rating,
                image_url,
            };
            check(feed.update_post(&id, patch).await)?;
            match feed.state().own_posts.iter().find(|post| post.id == id) {
                Some(post) => print_posts("Пост обновлён", std::slice::from_ref(post)),
                None => println!("Пост обновлён: id={id}"),
            }
        }
        Command::Delete { id } => {
            check(feed.delete_post(&id).await)?;
            println!("Пост удалён: id={id}");
        }
    }

    Ok(())
}

fn resolve_settings(
    mut settings: ClientSettings,
    server: Option<String>,
    page_size: Option<u32>,
) -> Result<ClientSettings> {
    if let Some(server) = server {
        settings.api_url = normalize_api_url(&server)?;
    }
    if let Some(page_size) = page_size {
        if page_size == 0 {
            return Err(anyhow!("--page-size must be > 0"));
        }
        settings.page_size = page_size;
    }
    Ok(settings)
}

fn read_image(path: &Path) -> Result<ImageAttachment> {
    let bytes = fs::read(path)
        .with_context(|| format!("не удалось прочитать изображение {}", path.display()))?;
    Ok(ImageAttachment {
        bytes,
        file_name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    })
}

/// Экран, на который клиент отправил бы пользователя при запуске.
fn landing_screen(state: &SessionState) -> Screen {
    resolve_redirect(state, Screen::Feed).unwrap_or(Screen::Feed)
}

fn check(outcome: Outcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }

    let detail = outcome.message.unwrap_or_default();
    let message = match outcome.kind {
        Some(ErrorKind::Unauthenticated) => {
            "требуется авторизация: выполните `mapinion-cli login ...` или `mapinion-cli register ...`"
                .to_string()
        }
        Some(ErrorKind::Validation) => format!("некорректные данные: {detail}"),
        Some(ErrorKind::Network) => format!("сервер недоступен: {detail}"),
        _ => detail,
    };
    Err(anyhow!(message))
}

fn print_session(title: &str, state: &SessionState) {
    println!("{title}");
    match state.identity() {
        Some(user) => {
            println!("user:");
            println!("  id: {}", user.id);
            println!("  username: {}", user.username);
            println!("  email: {}", user.email);
        }
        None => println!("вход не выполнен"),
    }
}

fn print_posts(title: &str, posts: &[Post]) {
    println!("{title}");
    for post in posts {
        let author = post
            .author
            .as_ref()
            .map(|author| author.username.as_str())
            .unwrap_or("-");
        println!(
            "- [{}] {} ★{} @{}: {}",
            post.id, post.title, post.rating, author, post.caption
        );
    }
}
