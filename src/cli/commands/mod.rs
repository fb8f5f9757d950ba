use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("gerbang")
        .about("Request-admission and account-provisioning gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("GERBANG_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("users-url")
                .short('u')
                .long("users-url")
                .help("Remote user registry URL returning a JSON array of users")
                .env("GERBANG_USERS_URL")
                .required(true),
        )
        .arg(
            Arg::new("create-url")
                .short('c')
                .long("create-url")
                .help("Downstream account-creation endpoint URL")
                .env("GERBANG_CREATE_URL")
                .required(true),
        )
        .arg(
            Arg::new("telegram-token")
                .long("telegram-token")
                .help("Telegram bot token for notifications (log-only sink when unset)")
                .env("GERBANG_TELEGRAM_TOKEN"),
        )
        .arg(
            Arg::new("telegram-chat-id")
                .long("telegram-chat-id")
                .help("Telegram chat id receiving notifications")
                .env("GERBANG_TELEGRAM_CHAT_ID")
                .requires("telegram-token"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("GERBANG_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "gerbang");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Request-admission and account-provisioning gateway"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_check_port_and_urls() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "gerbang",
            "--port",
            "8080",
            "--users-url",
            "https://registry.example.test/users.json",
            "--create-url",
            "https://create.example.test/api",
        ]);

        assert_eq!(matches.get_one::<u16>("port").map(|s| *s), Some(8080));
        assert_eq!(
            matches
                .get_one::<String>("users-url")
                .map(|s| s.to_string()),
            Some("https://registry.example.test/users.json".to_string())
        );
        assert_eq!(
            matches
                .get_one::<String>("create-url")
                .map(|s| s.to_string()),
            Some("https://create.example.test/api".to_string())
        );
        assert_eq!(matches.get_one::<String>("telegram-token"), None);
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                (
                    "GERBANG_USERS_URL",
                    Some("https://registry.example.test/users.json"),
                ),
                ("GERBANG_CREATE_URL", Some("https://create.example.test/api")),
                ("GERBANG_PORT", Some("443")),
                ("GERBANG_TELEGRAM_TOKEN", Some("bot-token")),
                ("GERBANG_TELEGRAM_CHAT_ID", Some("42")),
                ("GERBANG_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["gerbang"]);
                assert_eq!(matches.get_one::<u16>("port").map(|s| *s), Some(443));
                assert_eq!(
                    matches
                        .get_one::<String>("users-url")
                        .map(|s| s.to_string()),
                    Some("https://registry.example.test/users.json".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<String>("telegram-token")
                        .map(|s| s.to_string()),
                    Some("bot-token".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<String>("telegram-chat-id")
                        .map(|s| s.to_string()),
                    Some("42".to_string())
                );
                assert_eq!(matches.get_one::<u8>("verbosity").map(|s| *s), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("GERBANG_LOG_LEVEL", Some(level)),
                    (
                        "GERBANG_USERS_URL",
                        Some("https://registry.example.test/users.json"),
                    ),
                    ("GERBANG_CREATE_URL", Some("https://create.example.test/api")),
                ],
                || {
                    let command = new();
                    let matches = command.get_matches_from(vec!["gerbang"]);
                    assert_eq!(
                        matches.get_one::<u8>("verbosity").map(|s| *s),
                        Some(index as u8)
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("GERBANG_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "gerbang".to_string(),
                    "--users-url".to_string(),
                    "https://registry.example.test/users.json".to_string(),
                    "--create-url".to_string(),
                    "https://create.example.test/api".to_string(),
                ];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();

                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").map(|s| *s),
                    Some(index as u8)
                );
            });
        }
    }
}
