pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        users_url: String,
        create_url: String,
        telegram_token: Option<String>,
        telegram_chat_id: Option<String>,
    },
}
