//! Terminal REPL: keys drive taps on the gesture coordinator.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, Lines};
use tracing::warn;

use crate::cards::gesture::{Decision, GestureCoordinator, direction_for_key};
use crate::cards::model::SwipeDirection;
use crate::cards::queue::Deck;
use crate::error::{AuthError, DeckError};
use crate::providers::{CardProvider, PhotosSession};

pub const HELP: &str =
    "h/left: reject   l/right: keep   r/refill: fetch more   a/login: sign in   s/status   q/quit";

/// One line of REPL input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Swipe(SwipeDirection),
    Refill,
    SignIn,
    Status,
    Help,
    Quit,
}

impl std::str::FromStr for Command {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(direction) = direction_for_key(s) {
            return Ok(Self::Swipe(direction));
        }
        match s.trim().to_lowercase().as_str() {
            "r" | "refill" => Ok(Self::Refill),
            "a" | "auth" | "login" => Ok(Self::SignIn),
            "s" | "status" => Ok(Self::Status),
            "?" | "help" => Ok(Self::Help),
            "q" | "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("Unknown command: {other}")),
        }
    }
}

/// Print the current card and remaining count.
pub async fn print_status<P: CardProvider>(gestures: &GestureCoordinator<P>) {
    let deck = gestures.deck();
    match deck.current_card().await {
        Some(card) => println!("▶ {}  ({} remaining)", card.describe(), deck.remaining().await),
        None => println!("▶ (no cards)  r to fetch more"),
    }
}

/// Authenticate `deck`, walking the user through a consent redirect when the
/// provider asks for one.
///
/// Each pasted redirect URL is handed to `session`. A bad paste prompts again.
pub async fn sign_in<P, R>(
    deck: &Deck<P>,
    session: Option<&PhotosSession>,
    lines: &mut Lines<R>,
) -> Result<(), DeckError>
where
    P: CardProvider,
    R: AsyncBufRead + Unpin,
{
    loop {
        let url = match deck.authenticate().await {
            Ok(()) => return Ok(()),
            Err(DeckError::Auth(AuthError::RedirectRequired { url })) => url,
            Err(e) => return Err(e),
        };
        let Some(session) = session else {
            return Err(AuthError::RedirectRequired { url }.into());
        };

        eprintln!("   Open this URL to grant access:\n\n   {url}\n");
        eprintln!("   Then paste the URL you were redirected to:");
        eprint!("> ");
        let redirect = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(AuthError::Aborted("input closed before a redirect was pasted".into()).into()),
            Err(e) => return Err(AuthError::Aborted(e.to_string()).into()),
        };
        if let Err(e) = session.accept_redirect(redirect.trim()).await {
            eprintln!("   {e}");
        }
    }
}

async fn refill<P: CardProvider>(deck: &Deck<P>) {
    match deck.refill().await {
        Ok(0) => println!("Nothing new right now"),
        Ok(n) => println!("Fetched {n} cards"),
        Err(DeckError::Auth(e)) => eprintln!("{e}. Type `login` to sign in again"),
        Err(e) => {
            warn!(error = %e, "Refill failed");
            eprintln!("Refill failed: {e}");
        }
    }
}

/// Read commands until `quit` or EOF.
///
/// `session` backs the `login` command for providers that sign in through a
/// redirect.
pub async fn run<P, R>(
    gestures: Arc<GestureCoordinator<P>>,
    session: Option<&PhotosSession>,
    lines: &mut Lines<R>,
) -> std::io::Result<()>
where
    P: CardProvider,
    R: AsyncBufRead + Unpin,
{
    print_status(&gestures).await;
    eprint!("> ");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            eprint!("> ");
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}\n{HELP}");
                eprint!("> ");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => eprintln!("{HELP}"),
            Command::Status => {}
            Command::Refill => refill(gestures.deck()).await,
            Command::SignIn => match sign_in(gestures.deck(), session, lines).await {
                Ok(()) => {
                    println!("Signed in");
                    if gestures.deck().remaining().await == 0 {
                        refill(gestures.deck()).await;
                    }
                }
                Err(e) => eprintln!("Sign-in failed: {e}"),
            },
            Command::Swipe(direction) => match gestures.tap(direction).await {
                Ok(Decision::Committed { card, .. }) => {
                    let verb = match direction {
                        SwipeDirection::Left => "Rejected",
                        SwipeDirection::Right => "Kept",
                    };
                    println!("{verb} {}", card.describe());
                }
                Ok(Decision::Busy) => eprintln!("Still committing the previous card"),
                Ok(Decision::Empty | Decision::Cancelled) => {}
                Err(e) => eprintln!("Swipe failed, card kept on top: {e}"),
            },
        }

        print_status(&gestures).await;
        eprint!("> ");
    }
    Ok(())
}
