//! # Lobby Watch
//!
//! Connects to a race server, subscribes to the lobby and prints the list of
//! open race games whenever it changes. Exits on Ctrl+C.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example lobby_watch
//!
//! # Another server, and only games whose name contains "anim":
//! ZLEHCITO_URL=ws://my-server:5000/ws cargo run --example lobby_watch -- anim
//! ```

use zlehcito_client::{ClientConfig, LobbyModel, SessionContext, WebSocketConnector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = ClientConfig::from_env();
    let query = std::env::args().nth(1).unwrap_or_default();
    tracing::info!(endpoint = %config.endpoint, "connecting");

    // ── Session ─────────────────────────────────────────────────────
    let mut session = SessionContext::start(WebSocketConnector::from_config(&config), &config);
    let lobby = LobbyModel::start(&session)?;

    let mut games = lobby.subscribe_games();
    let mut connectivity = session.connectivity();

    loop {
        tokio::select! {
            changed = games.changed() => {
                if changed.is_err() {
                    break;
                }
                let shown = lobby.filtered_games(&query);
                println!("── {} race game(s) ──", shown.len());
                for game in shown {
                    println!("  [{}] {} ({} players)", game.id_game, game.name, game.player_count);
                }
            }

            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                // The lobby resubscribes by itself after a reconnect.
                let state = *connectivity.borrow_and_update();
                tracing::info!(?state, "connection state changed");
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    drop(lobby);
    session.shutdown().await;
    Ok(())
}
