//! duelnet - Peer-to-Peer Turn-Based Combat
//!
//! Two endpoints, a host and a joiner, battle over UDP with a
//! stop-and-wait reliability layer; an optional spectator watches.

mod battle;
mod config;
mod network;
mod peer;
mod protocol;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use battle::Roster;
use config::Config;
use network::NetworkConfig;
use peer::{ChatBody, Host, HostSettings, Joiner, JoinerSettings, Peer, PeerEvent, Spectator};
use protocol::CommunicationMode;

/// duelnet - peer-to-peer turn-based combat
#[derive(Parser)]
#[command(name = "duelnet")]
#[command(version = "0.1.0")]
#[command(about = "Battle a friend over UDP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a battle and wait for a challenger
    Host {
        /// Port to listen on (must be above 5000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Use local-network broadcast addressing
        #[arg(long)]
        broadcast: bool,

        /// Player name to show the opponent
        #[arg(short, long)]
        name: Option<String>,

        /// Combatant to field
        #[arg(long)]
        combatant: Option<String>,

        /// Shared RNG seed (random if omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Accept the first challenger without prompting
        #[arg(long)]
        auto_accept: bool,

        /// Path to a custom roster file
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// Join a hosted battle
    Join {
        /// Host address (required unless --broadcast)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Host port
        #[arg(short, long)]
        port: Option<u16>,

        /// Use local-network broadcast addressing
        #[arg(long)]
        broadcast: bool,

        /// Player name to show the opponent
        #[arg(short, long)]
        name: Option<String>,

        /// Combatant to field
        #[arg(long)]
        combatant: Option<String>,

        /// Path to a custom roster file
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// Watch a battle as a read-only spectator
    Watch {
        /// Host address
        #[arg(long)]
        host: IpAddr,

        /// Host port
        #[arg(short, long)]
        port: Option<u16>,

        /// Spectator name used for chat
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List the available combatants
    Roster {
        /// Path to a custom roster file
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Host {
            port,
            bind,
            broadcast,
            name,
            combatant,
            seed,
            auto_accept,
            roster,
        } => {
            run_host(
                config,
                HostArgs {
                    port,
                    bind,
                    broadcast,
                    name,
                    combatant,
                    seed,
                    auto_accept,
                    roster,
                },
            )
            .await?;
        }
        Commands::Join {
            host,
            port,
            broadcast,
            name,
            combatant,
            roster,
        } => {
            run_join(config, host, port, broadcast, name, combatant, roster).await?;
        }
        Commands::Watch { host, port, name } => {
            run_watch(config, host, port, name).await?;
        }
        Commands::Roster { roster } => {
            run_roster(config, roster)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

struct HostArgs {
    port: Option<u16>,
    bind: Option<IpAddr>,
    broadcast: bool,
    name: Option<String>,
    combatant: Option<String>,
    seed: Option<u64>,
    auto_accept: bool,
    roster: Option<PathBuf>,
}

fn load_roster(
    override_path: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<Arc<Roster>> {
    let path = override_path.or_else(|| config.battle.roster.clone());
    let roster = match path {
        Some(path) => Roster::load(&path)?,
        None => Roster::builtin(),
    };
    Ok(Arc::new(roster))
}

fn resolve_name(flag: Option<String>, config: &Config) -> String {
    flag.unwrap_or_else(|| config.general.name.clone())
}

fn resolve_combatant(flag: Option<String>, config: &Config) -> String {
    flag.or_else(|| config.battle.combatant.clone())
        .unwrap_or_else(|| "Emberfox".to_string())
}

fn resolve_port(flag: Option<u16>, config: &Config) -> anyhow::Result<u16> {
    let port = flag.unwrap_or(config.network.port);
    if port <= 5000 {
        anyhow::bail!("port must be above 5000 (got {})", port);
    }
    Ok(port)
}

/// A fresh seed for hosts that did not pick one.
fn pick_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64 % 1_000_000)
        .unwrap_or(42)
}

async fn run_host(config: Config, args: HostArgs) -> anyhow::Result<()> {
    let roster = load_roster(args.roster, &config)?;
    let player_name = resolve_name(args.name, &config);
    let combatant_name = resolve_combatant(args.combatant, &config);
    let port = resolve_port(args.port, &config)?;
    let broadcast = args.broadcast || config.network.broadcast;
    let auto_accept = args.auto_accept || config.battle.auto_accept;
    let seed = args.seed.unwrap_or_else(pick_seed);

    let mut network = if broadcast {
        NetworkConfig::broadcast(port)
    } else {
        NetworkConfig::new(port)
    };
    if let Some(bind) = args.bind {
        network = network.with_bind(bind);
    }
    let mode = if broadcast {
        CommunicationMode::Broadcast
    } else {
        CommunicationMode::Direct
    };

    let mut host = Host::bind(
        HostSettings {
            network,
            player_name: player_name.clone(),
            combatant_name: combatant_name.clone(),
            mode,
        },
        roster,
    )
    .await?;
    let mut events = host.take_event_receiver().unwrap();

    println!("\n========================================");
    println!("  duelnet - hosting a battle");
    println!("========================================");
    println!("  Player:    {}", player_name);
    println!("  Combatant: {}", combatant_name);
    println!("  Port:      {}", port);
    println!("  Mode:      {}", mode.as_str());
    println!("========================================");
    println!("\nWaiting for a challenger... (!help for commands)\n");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = tokio::io::AsyncBufReadExt::lines(stdin);
    let mut pending_challenger: Option<SocketAddr> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PeerEvent::HandshakeRequested { challenger } => {
                        if auto_accept {
                            println!("+ Challenger at {} accepted (auto)", challenger);
                            host.approve_challenger(challenger, seed).await?;
                            println!("  Seed {} shared. Exchanging setups...", seed);
                        } else if pending_challenger.is_none() {
                            pending_challenger = Some(challenger);
                            println!("+ Challenger at {}. Accept? (y/n)", challenger);
                        }
                    }
                    other => {
                        if render_event(&other) {
                            break;
                        }
                    }
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };

                if let Some(challenger) = pending_challenger {
                    match line.trim().to_ascii_lowercase().as_str() {
                        "y" | "yes" => {
                            pending_challenger = None;
                            host.approve_challenger(challenger, seed).await?;
                            println!("Accepted. Seed {} shared.", seed);
                            continue;
                        }
                        "n" | "no" => {
                            pending_challenger = None;
                            println!("Rejected. Still listening...");
                            continue;
                        }
                        _ => {}
                    }
                }

                if handle_command(host.peer(), &line).await {
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    host.peer().shutdown().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_join(
    config: Config,
    host_ip: Option<IpAddr>,
    port: Option<u16>,
    broadcast: bool,
    name: Option<String>,
    combatant: Option<String>,
    roster_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let roster = load_roster(roster_path, &config)?;
    let player_name = resolve_name(name, &config);
    let combatant_name = resolve_combatant(combatant, &config);
    let port = resolve_port(port, &config)?;
    let broadcast = broadcast || config.network.broadcast;

    let (network, destination, mode) = if broadcast {
        let network = NetworkConfig::broadcast(port);
        let destination = network.broadcast_destination();
        (network, destination, CommunicationMode::Broadcast)
    } else {
        let host_ip = host_ip
            .ok_or_else(|| anyhow::anyhow!("--host is required unless --broadcast is set"))?;
        (
            NetworkConfig::ephemeral(),
            SocketAddr::new(host_ip, port),
            CommunicationMode::Direct,
        )
    };

    println!("Connecting to {}...", destination);

    let mut joiner = Joiner::connect(
        JoinerSettings {
            network,
            player_name: player_name.clone(),
            combatant_name: combatant_name.clone(),
            mode,
        },
        roster,
        destination,
    )
    .await?;
    let mut events = joiner.take_event_receiver().unwrap();

    println!("\n========================================");
    println!("  duelnet - joined a battle");
    println!("========================================");
    println!("  Player:    {}", player_name);
    println!("  Combatant: {}", combatant_name);
    println!("  Host:      {}", destination);
    println!("========================================");
    println!("\nWaiting for the host to accept... (!help for commands)\n");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = tokio::io::AsyncBufReadExt::lines(stdin);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if render_event(&event) {
                    break;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if handle_command(joiner.peer(), &line).await {
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    joiner.peer().shutdown().await;
    Ok(())
}

async fn run_watch(
    config: Config,
    host_ip: IpAddr,
    port: Option<u16>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let player_name = resolve_name(name, &config);
    let port = resolve_port(port, &config)?;
    let destination = SocketAddr::new(host_ip, port);

    println!("Requesting spectator access at {}...", destination);

    let mut spectator = Spectator::connect(
        NetworkConfig::ephemeral(),
        player_name,
        Arc::new(Roster::builtin()),
        destination,
    )
    .await?;
    let mut events = spectator.take_event_receiver().unwrap();

    println!("Type a message and press Enter to chat; !quit to leave.\n");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = tokio::io::AsyncBufReadExt::lines(stdin);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if render_event(&event) {
                    break;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "!quit" || trimmed == "!exit" {
                    break;
                }
                if let Err(error) = spectator.peer().send_chat_text(trimmed).await {
                    println!("Chat failed: {}", error);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                println!("\nLeaving...");
                break;
            }
        }
    }

    spectator.peer().shutdown().await;
    Ok(())
}

fn run_roster(config: Config, roster_path: Option<PathBuf>) -> anyhow::Result<()> {
    let roster = load_roster(roster_path, &config)?;

    println!("Available combatants ({}):\n", roster.len());
    for name in roster.names() {
        if let Some(template) = roster.get(name) {
            let types = match &template.secondary_type {
                Some(secondary) => format!("{}/{}", template.primary_type, secondary),
                None => template.primary_type.clone(),
            };
            println!(
                "  {:<12} {:<16} {:>3} HP   moves: {}",
                template.name,
                types,
                template.hp,
                template.moves.join(", ")
            );
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------
// Driver command handling
// ---------------------------------------------------------------------

enum Command {
    Attack { move_name: Option<String>, boost: bool },
    Defend,
    Chat(String),
    Sticker(String),
    Status,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut tokens = trimmed.split_whitespace();
    let head = tokens.next()?;

    let command = match head {
        "!attack" => {
            let mut rest: Vec<&str> = tokens.collect();
            let boost = rest
                .last()
                .is_some_and(|token| token.eq_ignore_ascii_case("boost"));
            if boost {
                rest.pop();
            }
            let move_name = if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            };
            Command::Attack { move_name, boost }
        }
        "!defend" => Command::Defend,
        "!chat" => Command::Chat(
            trimmed
                .strip_prefix("!chat")
                .unwrap_or_default()
                .trim()
                .to_string(),
        ),
        "!sticker" => Command::Sticker(
            trimmed
                .strip_prefix("!sticker")
                .unwrap_or_default()
                .trim()
                .to_string(),
        ),
        "!status" => Command::Status,
        "!help" => Command::Help,
        "!quit" | "!exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    };

    Some(command)
}

/// Apply one driver command. Returns true when the driver should exit.
async fn handle_command(peer: &Peer, line: &str) -> bool {
    let Some(command) = parse_command(line) else {
        return false;
    };

    match command {
        Command::Attack { move_name, boost } => {
            if let Err(error) = peer.attack(move_name, boost).await {
                println!("Cannot attack: {}", error);
            }
        }
        Command::Defend => match peer.arm_defense_boost().await {
            Ok(remaining) => println!("Defense boost armed ({} banked).", remaining),
            Err(error) => println!("Cannot defend: {}", error),
        },
        Command::Chat(text) => {
            if text.is_empty() {
                println!("Usage: !chat <message>");
            } else if let Err(error) = peer.send_chat_text(&text).await {
                println!("Chat failed: {}", error);
            }
        }
        Command::Sticker(data) => {
            if data.is_empty() {
                println!("Usage: !sticker <base64 data>");
            } else if let Err(error) = peer.send_chat_sticker(&data).await {
                println!("Sticker failed: {}", error);
            }
        }
        Command::Status => print_status(peer).await,
        Command::Help => print_help(),
        Command::Quit => return true,
        Command::Unknown(head) => println!("Unknown command: {} (try !help)", head),
    }

    false
}

async fn print_status(peer: &Peer) {
    let snapshot = peer.snapshot().await;

    println!("\n--- Status ---");
    println!("  Phase: {}", snapshot.phase.as_str());
    println!(
        "  Turn:  {}",
        if snapshot.is_my_turn { "yours" } else { "opponent's" }
    );
    if let Some(seed) = snapshot.seed {
        println!("  Seed:  {}", seed);
    }
    if let Some(mine) = &snapshot.combatant {
        println!(
            "  You:   {} ({}/{} HP), moves: {}",
            mine.name,
            mine.current_hp,
            mine.max_hp,
            mine.moves.join(", ")
        );
    }
    if let Some(theirs) = &snapshot.opponent {
        println!(
            "  Them:  {} ({}/{} HP)",
            theirs.name, theirs.current_hp, theirs.max_hp
        );
    }
    println!(
        "  Boosts: {} attack, {} defense{}",
        snapshot.attack_uses,
        snapshot.defense_uses,
        if snapshot.defense_armed {
            " [ARMED]"
        } else {
            ""
        }
    );
    println!();
}

fn print_help() {
    println!("\nCommands:");
    println!("  !attack <move> [boost]  - attack (boost spends an attack boost)");
    println!("  !defend                 - arm a defense boost for the next attack");
    println!("  !chat <text>            - send a message");
    println!("  !sticker <data>         - send a sticker");
    println!("  !status                 - show the battle state");
    println!("  !quit                   - leave\n");
}

/// Render an event for the terminal. Returns true when the session is
/// over and the driver loop should exit.
fn render_event(event: &PeerEvent) -> bool {
    match event {
        PeerEvent::HandshakeRequested { challenger } => {
            // Host loops intercept this before rendering.
            println!("+ Challenger at {}", challenger);
        }
        PeerEvent::SpectatorJoined { addr } => {
            println!("+ Spectator joined from {}", addr);
        }
        PeerEvent::SpectatorAccepted { .. } => {
            println!("Connected as spectator. Battle updates follow.");
        }
        PeerEvent::SeedReceived { seed } => {
            println!("Connected! Seed {} received.", seed);
        }
        PeerEvent::OpponentRevealed { name, hp } => {
            println!("Opponent fields {} ({} HP).", name, hp);
        }
        PeerEvent::BattleReady { my_turn } => {
            if *my_turn {
                println!("Battle ready - your move! Type !attack <move> [boost].");
            } else {
                println!("Battle ready - waiting for the opponent's move...");
            }
        }
        PeerEvent::AttackIncoming {
            attacker,
            move_name,
        } => {
            println!("{} attacks with {}!", attacker, move_name);
        }
        PeerEvent::StatusLine { text } => {
            println!("{}", text);
        }
        PeerEvent::CalculationAgreed {
            damage,
            defender_hp,
        } => {
            println!(
                "Damage confirmed: {} (defender at {} HP).",
                damage, defender_hp
            );
        }
        PeerEvent::CalculationMismatch { ours, theirs } => {
            println!(
                "Calculations diverged: ours {}/{} vs theirs {}/{}. Attacker's values stand.",
                ours.damage,
                ours.defender_hp_remaining,
                theirs.damage,
                theirs.defender_hp_remaining
            );
        }
        PeerEvent::TurnChanged { my_turn } => {
            if *my_turn {
                println!("Your turn! Type !attack <move> [boost].");
            } else {
                println!("Waiting for the opponent's move...");
            }
        }
        PeerEvent::ChatReceived { sender, body } => match body {
            ChatBody::Text(text) => println!("[chat] {}: {}", sender, text),
            ChatBody::Sticker(_) => println!("[chat] {} sent a sticker!", sender),
        },
        PeerEvent::TransportFailed { detail } => {
            println!("Delivery failed: {}", detail);
        }
        PeerEvent::GameOver { winner, loser } => {
            println!("\n========================================");
            println!("  GAME OVER: {} defeated {}!", winner, loser);
            println!("========================================\n");
            return true;
        }
    }

    false
}
