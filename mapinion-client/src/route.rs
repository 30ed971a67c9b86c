//! Выбор экрана по состоянию сессии.

use crate::session::{Lifecycle, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Группа экранов.
pub enum RouteGroup {
    /// Вход и регистрация.
    Auth,
    /// Экраны, доступные после входа.
    Tabs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Экран приложения.
pub enum Screen {
    /// Вход.
    Login,
    /// Регистрация.
    Signup,
    /// Лента.
    Feed,
    /// Создание поста.
    Create,
    /// Профиль и свои посты.
    Profile,
}

impl Screen {
    /// Группа, к которой относится экран.
    pub fn group(self) -> RouteGroup {
        match self {
            Screen::Login | Screen::Signup => RouteGroup::Auth,
            Screen::Feed | Screen::Create | Screen::Profile => RouteGroup::Tabs,
        }
    }
}

/// Куда перенаправить пользователя с экрана `current`.
///
/// Пока сессия не восстановлена, решение не принимается. Без входа любой
/// экран вне группы `Auth` ведёт на `Login`. После входа экраны группы
/// `Auth` ведут в ленту, кроме `Signup`: с него переход выполняет сам экран.
pub fn resolve_redirect(session: &SessionState, current: Screen) -> Option<Screen> {
    if session.lifecycle == Lifecycle::Uninitialized {
        return None;
    }

    match (session.is_authenticated(), current.group()) {
        (false, RouteGroup::Tabs) => Some(Screen::Login),
        (true, RouteGroup::Auth) if current != Screen::Signup => Some(Screen::Feed),
        _ => None,
    }
}
