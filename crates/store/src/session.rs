use derive_more::Display;

/// Identity of the signed-in user; selects the on-disk scope of a
/// [`PersistentStore`](crate::PersistentStore).
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
#[display("{user_id}")]
pub struct UserSession {
    user_id: String,
}

impl UserSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the user id can be used as a single path component.
    pub(crate) fn is_valid_scope(&self) -> bool {
        let id = self.user_id.as_str();
        !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
    }
}
