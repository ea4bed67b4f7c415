//! Identity lookup for `get_login` / `get_anonymous_login`.

use tabletop_core::instruction::UserData;
use tabletop_settings::AccountSettings;

/// Theme color reported for identities that do not configure one.
pub const DEFAULT_THEME_COLOR: &str = "rgba(255,255,255,1)";

/// Display name of the identity reported before any login.
pub const GUEST_NAME: &str = "Guest";

/// Display name of anonymous identities.
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Configured accounts.
#[derive(Clone, Debug, Default)]
pub struct AccountDirectory {
    accounts: Vec<AccountSettings>,
}

impl AccountDirectory {
    /// Directory over `accounts`.
    pub fn new(accounts: Vec<AccountSettings>) -> Self {
        Self { accounts }
    }

    /// Number of configured accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no account is configured.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Identity for matching credentials. Emails compare case-insensitively.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<UserData> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email.trim()) && a.password == password)
            .map(|a| UserData {
                id: a.id,
                anonymous_user: false,
                email: a.email.clone(),
                password: None,
                name: if a.name.is_empty() {
                    a.email.clone()
                } else {
                    a.name.clone()
                },
                qq: a.qq,
                theme_color: theme_or_default(&a.theme_color),
            })
    }

    /// Identity for an anonymous login.
    pub fn anonymous(email: &str) -> UserData {
        UserData {
            anonymous_user: true,
            email: email.trim().to_owned(),
            name: ANONYMOUS_NAME.to_owned(),
            theme_color: DEFAULT_THEME_COLOR.to_owned(),
            ..UserData::default()
        }
    }

    /// Identity reported for a connection that has not logged in.
    pub fn guest() -> UserData {
        UserData {
            anonymous_user: true,
            name: GUEST_NAME.to_owned(),
            theme_color: DEFAULT_THEME_COLOR.to_owned(),
            ..UserData::default()
        }
    }
}

fn theme_or_default(theme: &str) -> String {
    if theme.is_empty() {
        DEFAULT_THEME_COLOR.to_owned()
    } else {
        theme.to_owned()
    }
}
