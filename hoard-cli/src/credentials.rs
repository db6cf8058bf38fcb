use std::path::Path;

use hoard_remote::Credential;
use tracing::debug;

use crate::error::{AppError, Result};

/// Look up the storage account.
///
/// The two environment variables win when both are set and non-blank;
/// otherwise `file` is read if it exists. The file holds a JSON array
/// `["user", "password"]`. Returns `None` when neither source has a
/// complete credential.
pub fn load_credential<F>(
    lookup: F,
    user_var: &str,
    password_var: &str,
    file: &Path,
) -> Result<Option<Credential>>
where
    F: Fn(&str) -> Option<String>,
{
    if let (Some(user), Some(password)) = (lookup(user_var), lookup(password_var)) {
        let credential = Credential::new(user.trim(), password);
        if credential.is_complete() {
            debug!(user_var, "Using storage credentials from the environment");
            return Ok(Some(credential));
        }
    }

    if !file.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(file).map_err(|e| AppError::Credentials {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    let [user, password]: [String; 2] =
        serde_json::from_str(&content).map_err(|e| AppError::Credentials {
            path: file.to_path_buf(),
            reason: e.to_string(),
        })?;

    let credential = Credential::new(user.trim(), password);
    if credential.is_complete() {
        debug!(path = %file.display(), "Using storage credentials from file");
        Ok(Some(credential))
    } else {
        Ok(None)
    }
}

/// [`load_credential`] against the process environment.
pub fn credential_from_env(
    user_var: &str,
    password_var: &str,
    file: &Path,
) -> Result<Option<Credential>> {
    load_credential(|name| std::env::var(name).ok(), user_var, password_var, file)
}
