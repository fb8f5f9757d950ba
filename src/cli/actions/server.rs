use crate::account::HttpAccountCreator;
use crate::admission::{spawn_sweep_worker, AdmissionController, AdmissionPolicy, AdmissionStore};
use crate::api::{self, GatewayState};
use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::fetch::Fetcher;
use crate::notify::{LogSink, NotificationSink, TelegramSink};
use crate::registry::{HttpRegistrySource, RegistryCache};
use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle the server action: wire the gateway together and serve.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        users_url,
        create_url,
        telegram_token,
        telegram_chat_id,
    } = action;

    // Both endpoints must at least parse; everything else is the remote's
    // problem at request time.
    Url::parse(&users_url).map_err(|err| anyhow!("Invalid users URL: {err}"))?;
    Url::parse(&create_url).map_err(|err| anyhow!("Invalid create URL: {err}"))?;

    let mut globals = GlobalArgs::new(users_url, create_url);
    if let (Some(token), Some(chat_id)) = (telegram_token, telegram_chat_id) {
        globals.set_telegram(SecretString::from(token), chat_id);
    }

    log_startup_args(&globals, port);

    let fetcher = Fetcher::new()?;

    let source = HttpRegistrySource::new(fetcher.clone(), globals.users_url.clone());
    let registry = RegistryCache::new(Arc::new(source));

    let admission = AdmissionController::new(AdmissionPolicy::new(), Arc::new(AdmissionStore::new()));
    spawn_sweep_worker(admission.clone(), SWEEP_INTERVAL);

    let creator = Arc::new(HttpAccountCreator::new(
        fetcher,
        globals.create_url.clone(),
    ));

    let notifier: Arc<dyn NotificationSink> = match (&globals.telegram_token, &globals.telegram_chat_id)
    {
        (Some(token), Some(chat_id)) => {
            Arc::new(TelegramSink::new(token.clone(), chat_id.clone())?)
        }
        _ => Arc::new(LogSink),
    };

    let state = Arc::new(GatewayState {
        admission,
        registry,
        creator,
        notifier,
    });

    api::new(port, state).await
}

fn log_startup_args(globals: &GlobalArgs, port: u16) {
    let entries = [
        ("listen", format!("tcp:{port}")),
        ("users_url", globals.users_url.clone()),
        ("create_url", globals.create_url.clone()),
        (
            "telegram_token_set",
            globals.telegram_token.is_some().to_string(),
        ),
        (
            "telegram_chat_id",
            globals
                .telegram_chat_id
                .clone()
                .unwrap_or_else(|| "n/a".to_string()),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = "Startup configuration:".to_string();
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}
