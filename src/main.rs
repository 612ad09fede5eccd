use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use decision_deck::cards::model::DeckEvent;
use decision_deck::cards::ws::deck_routes;
use decision_deck::cards::{Deck, GestureCoordinator};
use decision_deck::cli;
use decision_deck::config::{AppConfig, DeckOfCardsConfig, GooglePhotosConfig, ProviderKind};
use decision_deck::error::{ConfigError, DeckError};
use decision_deck::providers::{
    CardProvider, DeckOfCardsProvider, GooglePhotosProvider, PhotosSession, SyntheticProvider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("🃏 Decision Deck v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", config.provider);
    eprintln!(
        "   Page size: {} (preload at {} remaining)",
        config.deck.page_size, config.deck.preload_threshold
    );
    eprintln!("   Deck WS: ws://0.0.0.0:{}/ws", config.http_port);
    eprintln!("   Deck API: http://0.0.0.0:{}/api/deck", config.http_port);
    eprintln!("   {}\n", cli::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    match config.provider {
        ProviderKind::Synthetic => {
            let provider = match config.shuffle_seed {
                Some(seed) => SyntheticProvider::shuffled(seed),
                None => SyntheticProvider::new(),
            };
            run(Arc::new(provider), None, &config, &mut lines).await
        }
        ProviderKind::DeckOfCards => {
            let provider = DeckOfCardsProvider::new(DeckOfCardsConfig::from_env())?;
            run(Arc::new(provider), None, &config, &mut lines).await
        }
        ProviderKind::GooglePhotos => {
            let photos_config = GooglePhotosConfig::from_env()
                .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_CLIENT_ID".into()))?;
            eprintln!("   Token file: {}", photos_config.token_path.display());
            let provider = GooglePhotosProvider::new(photos_config).await?;
            let session = Arc::clone(provider.session());
            run(Arc::new(provider), Some(session), &config, &mut lines).await
        }
    }
}

/// Authenticate, initialize, serve the deck, then hand stdin to the REPL.
async fn run<P>(
    provider: Arc<P>,
    session: Option<Arc<PhotosSession>>,
    config: &AppConfig,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<()>
where
    P: CardProvider,
    P::Payload: Serialize,
{
    let deck = Deck::new(provider, config.deck.clone())?;

    // A stored token can be revoked server-side; the first fetch finds out.
    let appended = loop {
        cli::sign_in(&deck, session.as_deref(), lines).await?;
        match deck.initialize().await {
            Err(DeckError::Auth(e)) => eprintln!("   {e}, signing in again"),
            other => break other?,
        }
    };
    eprintln!("   Loaded {appended} cards\n");

    // Surface background preload outcomes in the terminal.
    let mut events = deck.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DeckEvent::PreloadFailed { reason } => {
                    eprintln!("\n   Could not fetch more cards: {reason} (r to retry)");
                }
                DeckEvent::SessionExpired { provider } => {
                    eprintln!("\n   {provider} session expired (login to sign in again)");
                }
                DeckEvent::Exhausted { remaining: 0 } => {
                    eprintln!("\n   No more cards from the provider");
                }
                _ => {}
            }
        }
    });

    let gestures = Arc::new(GestureCoordinator::new(Arc::clone(&deck)));

    // Spawn Axum WS/REST server for the deck
    let app = deck_routes(Arc::clone(&gestures));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, deck_id = %deck.id(), "Deck server started");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Deck server stopped");
        }
    });

    cli::run(gestures, session.as_deref(), lines).await?;
    eprintln!("Bye");
    Ok(())
}
