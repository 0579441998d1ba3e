use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// What the reference server observed on one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Command lines as received, without the line terminator. AUTH
    /// continuation lines and DATA content are not commands.
    pub commands: Vec<String>,
    pub from: String,
    pub to: Vec<String>,
    pub data: String,
    pub auth_user: String,
    pub auth_pass: String,
    pub used_tls: bool,
}

impl Transcript {
    pub fn has_command(&self, verb: &str) -> bool {
        self.command_index(verb).is_some()
    }

    /// Position of the first command line starting with `verb`.
    pub fn command_index(&self, verb: &str) -> Option<usize> {
        self.commands.iter().position(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|first| first.eq_ignore_ascii_case(verb))
        })
    }
}

/// Behaviour of the reference server, set before it starts.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Advertise STARTTLS in the EHLO reply.
    pub starttls: bool,
    /// Advertise AUTH in the EHLO reply.
    pub auth: bool,
    /// Advertise LOGIN next to PLAIN.
    pub login: bool,
    /// TLS from the first byte, as on port 465.
    pub implicit_tls: bool,
    /// Sleep before serving each connection.
    pub response_delay: Duration,
    /// Verbs always answered with a permanent failure.
    pub fail_commands: HashSet<String>,
    /// Verbs answered with a fixed reply line instead of their usual handling.
    pub custom_responses: HashMap<String, String>,
    /// Prompts sent during LOGIN, before base64 encoding.
    pub login_prompts: (String, String),
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            starttls: false,
            auth: false,
            login: false,
            implicit_tls: false,
            response_delay: Duration::ZERO,
            fail_commands: HashSet::new(),
            custom_responses: HashMap::new(),
            login_prompts: ("Username:".to_string(), "Password:".to_string()),
        }
    }
}

impl ServerOptions {
    pub fn with_starttls(mut self) -> Self {
        self.starttls = true;
        self
    }

    pub fn with_auth(mut self, login: bool) -> Self {
        self.auth = true;
        self.login = login;
        self
    }

    pub fn with_implicit_tls(mut self) -> Self {
        self.implicit_tls = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn failing(mut self, verb: &str) -> Self {
        self.fail_commands.insert(verb.to_ascii_uppercase());
        self
    }

    pub fn responding(mut self, verb: &str, line: impl Into<String>) -> Self {
        self.custom_responses
            .insert(verb.to_ascii_uppercase(), line.into());
        self
    }

    pub fn with_login_prompts(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.login_prompts = (user.into(), pass.into());
        self
    }
}
