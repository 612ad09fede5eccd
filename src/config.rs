//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Which data source backs the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Synthetic,
    DeckOfCards,
    GooglePhotos,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synthetic => write!(f, "synthetic"),
            Self::DeckOfCards => write!(f, "deck-of-cards"),
            Self::GooglePhotos => write!(f, "google-photos"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synthetic" => Ok(Self::Synthetic),
            "deck-of-cards" => Ok(Self::DeckOfCards),
            "google-photos" => Ok(Self::GooglePhotos),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// Queue engine configuration.
#[derive(Debug, Clone)]
pub struct DeckConfig {
    /// Upper bound on cards requested per fetch.
    pub page_size: usize,
    /// Remaining-card count at or below which a refill is triggered.
    pub preload_threshold: usize,
    /// Event broadcast channel capacity.
    pub event_capacity: usize,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            preload_threshold: 5,
            event_capacity: 256,
        }
    }
}

impl DeckConfig {
    /// Create a config with the given page size and preload threshold.
    pub fn new(page_size: usize, preload_threshold: usize) -> Self {
        Self {
            page_size,
            preload_threshold,
            ..Default::default()
        }
    }

    /// Read `DECK_PAGE_SIZE` / `DECK_PRELOAD_THRESHOLD`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: env_parse("DECK_PAGE_SIZE").unwrap_or(defaults.page_size),
            preload_threshold: env_parse("DECK_PRELOAD_THRESHOLD")
                .unwrap_or(defaults.preload_threshold),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "page_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Settings for the Deck of Cards REST provider.
#[derive(Debug, Clone)]
pub struct DeckOfCardsConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DeckOfCardsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://deckofcardsapi.com".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DeckOfCardsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("DECK_OF_CARDS_BASE_URL").unwrap_or(defaults.base_url),
            timeout: env_parse("DECK_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Settings for the Google Photos provider.
#[derive(Debug, Clone)]
pub struct GooglePhotosConfig {
    pub client_id: secrecy::SecretString,
    /// Where the consent screen sends the user back to.
    pub redirect_uri: String,
    pub auth_url: String,
    pub api_base_url: String,
    pub scope: String,
    /// File the access token is persisted to between runs.
    pub token_path: PathBuf,
    pub timeout: Duration,
}

impl GooglePhotosConfig {
    /// Build from env. Returns `None` unless `GOOGLE_CLIENT_ID` is set.
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").ok()?;

        let redirect_uri = std::env::var("GOOGLE_REDIRECT_URI")
            .unwrap_or_else(|_| "http://localhost:8080/oauth/callback".to_string());

        let token_path = std::env::var("DECK_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".decision-deck/google_photos_token.json")
            });

        let timeout = env_parse("DECK_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        Some(Self {
            client_id: secrecy::SecretString::from(client_id),
            redirect_uri,
            token_path,
            timeout,
            ..Self::defaults_for_google()
        })
    }

    /// Endpoint defaults; `client_id`, `redirect_uri` and `token_path` are placeholders.
    pub fn defaults_for_google() -> Self {
        Self {
            client_id: secrecy::SecretString::from(String::new()),
            redirect_uri: String::new(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            api_base_url: "https://photoslibrary.googleapis.com".to_string(),
            scope: "https://www.googleapis.com/auth/photoslibrary.readonly".to_string(),
            token_path: PathBuf::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Process-level settings for the `decision-deck` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderKind,
    pub deck: DeckConfig,
    pub http_port: u16,
    /// Seed for the synthetic provider's shuffle. Unshuffled when absent.
    pub shuffle_seed: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = std::env::var("DECK_PROVIDER")
            .unwrap_or_else(|_| "synthetic".to_string())
            .parse()?;

        let deck = DeckConfig::from_env();
        deck.validate()?;

        Ok(Self {
            provider,
            deck,
            http_port: env_parse("DECK_HTTP_PORT").unwrap_or(8080),
            shuffle_seed: env_parse("DECK_SHUFFLE_SEED"),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
