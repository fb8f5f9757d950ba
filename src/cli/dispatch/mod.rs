use crate::cli::actions::Action;
use anyhow::Result;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        users_url: matches
            .get_one("users-url")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --users-url"))?,
        create_url: matches
            .get_one("create-url")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --create-url"))?,
        telegram_token: matches
            .get_one("telegram-token")
            .map(|s: &String| s.to_string()),
        telegram_chat_id: matches
            .get_one("telegram-chat-id")
            .map(|s: &String| s.to_string()),
    })
}
