use secrecy::SecretString;

/// Shared runtime configuration resolved from the CLI.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub users_url: String,
    pub create_url: String,
    pub telegram_token: Option<SecretString>,
    pub telegram_chat_id: Option<String>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(users_url: String, create_url: String) -> Self {
        Self {
            users_url,
            create_url,
            telegram_token: None,
            telegram_chat_id: None,
        }
    }

    pub fn set_telegram(&mut self, token: SecretString, chat_id: String) {
        self.telegram_token = Some(token);
        self.telegram_chat_id = Some(chat_id);
    }
}
