use std::fmt;

/// Account name and password for a storage backend.
///
/// The password never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    password: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// The password in clear text. Only hand it to the backend.
    pub fn expose_password(&self) -> &str {
        &self.password
    }

    /// Both fields are non-blank.
    pub fn is_complete(&self) -> bool {
        !self.user.trim().is_empty() && !self.password.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (password redacted)", self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_redacted() {
        let cred = Credential::new("user@example.com", "hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
        assert!(!cred.to_string().contains("hunter2"));
        assert_eq!(cred.expose_password(), "hunter2");
    }

    #[test]
    fn blank_fields_are_incomplete() {
        assert!(Credential::new("u", "p").is_complete());
        assert!(!Credential::new("u", " ").is_complete());
        assert!(!Credential::new("", "p").is_complete());
    }
}
