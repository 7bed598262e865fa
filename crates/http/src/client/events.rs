//! Session lifecycle notifications

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `logout()` was called
    UserRequested,
    /// The refresh token was rejected, missing, or the refresh timed out
    RefreshFailed,
}

/// Broadcast to every subscriber of [`super::SessionManager::subscribe`].
///
/// A UI layer redirects to its login view on
/// `LoggedOut { reason: RefreshFailed }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut { reason: LogoutReason },
}
