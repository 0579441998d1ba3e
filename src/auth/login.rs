use super::AuthError;

/// Interactive LOGIN exchange: the server prompts for the username, then for
/// the password, one round each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAuth {
    username: String,
    password: String,
}

enum Prompt {
    Username,
    Password,
}

impl LoginAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Answer one server prompt. Returns `None` once the server signals that
    /// no further data is expected.
    pub fn next(&self, prompt: &[u8], more: bool) -> Result<Option<Vec<u8>>, AuthError> {
        if !more {
            return Ok(None);
        }
        let label = String::from_utf8_lossy(prompt);
        match classify(&label) {
            Some(Prompt::Username) => Ok(Some(self.username.as_bytes().to_vec())),
            Some(Prompt::Password) => Ok(Some(self.password.as_bytes().to_vec())),
            None => Err(AuthError::UnknownPrompt {
                label: label.into_owned(),
            }),
        }
    }
}

// "User Name", "Username:", "Password", "Password:" and their case variants.
fn classify(label: &str) -> Option<Prompt> {
    let folded: String = label
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match folded.as_str() {
        "username" => Some(Prompt::Username),
        "password" => Some(Prompt::Password),
        _ => None,
    }
}
