//! Message dispatcher
//!
//! Maps each received message kind, in the current session phase, to
//! state updates and outbound responses. Illegal or malformed inbound
//! traffic is logged and dropped; the session carries on. Runs on the
//! receive task, so every reliable response is spawned onto its own
//! task.

use std::net::SocketAddr;
use std::sync::Arc;

use super::{ChatBody, PeerContext, PeerEvent};
use crate::battle::{BattlePhase, Calculation, PeerRole, RoundEnd};
use crate::protocol::{fields, ContentType, MessageType, StatBoosts, WireMessage};

pub(crate) async fn dispatch(context: &Arc<PeerContext>, message: WireMessage, from: SocketAddr) {
    let Some(kind) = message.message_type() else {
        tracing::warn!(
            raw = message.raw_type().unwrap_or("<none>"),
            "dropping malformed message"
        );
        return;
    };

    if kind == MessageType::Ack {
        // Consumed by reliable-channel waiters off the arrival queue.
        tracing::trace!(ack = ?message.ack_number(), "ack observed");
        return;
    }

    {
        let session = context.session.lock().await;
        if session.is_terminated() {
            tracing::debug!(%kind, "session terminated, ignoring");
            return;
        }
    }

    if context.role == PeerRole::Spectator {
        dispatch_spectator(context, kind, message).await;
        return;
    }

    forward_to_spectator(context, kind, &message, from).await;

    match kind {
        MessageType::HandshakeRequest => on_handshake_request(context, from).await,
        MessageType::SpectatorRequest => on_spectator_request(context, from).await,
        MessageType::HandshakeResponse => on_handshake_response(context, &message).await,
        MessageType::BattleSetup => on_battle_setup(context, &message).await,
        MessageType::AttackAnnounce => on_attack_announce(context, &message).await,
        MessageType::DefenseAnnounce => on_defense_announce(context).await,
        MessageType::CalculationReport => on_calculation_report(context, &message).await,
        MessageType::CalculationConfirm => on_calculation_confirm(context).await,
        MessageType::ResolutionRequest => on_resolution_request(context, &message).await,
        MessageType::GameOver => on_game_over(context, &message).await,
        MessageType::ChatMessage => on_chat_message(context, &message).await,
        MessageType::Ack => {}
    }
}

/// The host relays inbound battle traffic to an attached spectator.
/// GAME_OVER is relayed by its own handler so the receive loop stays
/// alive to see the spectator's ACK.
async fn forward_to_spectator(
    context: &Arc<PeerContext>,
    kind: MessageType,
    message: &WireMessage,
    from: SocketAddr,
) {
    if context.role != PeerRole::Host
        || matches!(kind, MessageType::SpectatorRequest | MessageType::GameOver)
    {
        return;
    }
    let spectator = { context.session.lock().await.spectator_addr };
    let Some(spectator) = spectator else { return };
    if spectator == from {
        return;
    }

    let context = context.clone();
    let message = message.clone();
    tokio::spawn(async move {
        if let Err(error) = context.channel.send_with_ack(message, spectator).await {
            tracing::debug!(%error, "spectator forward failed");
        }
    });
}

async fn on_handshake_request(context: &Arc<PeerContext>, from: SocketAddr) {
    let permitted = {
        let session = context.session.lock().await;
        context.role == PeerRole::Host && session.phase == BattlePhase::Handshaking
    };
    if !permitted {
        tracing::warn!(%from, "HANDSHAKE_REQUEST outside handshaking, dropping");
        return;
    }
    let _ = context
        .events
        .send(PeerEvent::HandshakeRequested { challenger: from })
        .await;
}

async fn on_spectator_request(context: &Arc<PeerContext>, from: SocketAddr) {
    if context.role != PeerRole::Host {
        tracing::warn!(%from, "SPECTATOR_REQUEST sent to a non-host, dropping");
        return;
    }

    let seed = {
        let mut session = context.session.lock().await;
        if session.spectator_addr.is_some() {
            tracing::debug!(%from, "a spectator is already attached");
            return;
        }
        session.spectator_addr = Some(from);
        session.seed
    };

    let _ = context
        .events
        .send(PeerEvent::SpectatorJoined { addr: from })
        .await;

    // Spectators are accepted automatically.
    let context = context.clone();
    tokio::spawn(async move {
        if let Err(error) = context
            .channel
            .send_with_ack(WireMessage::spectator_response(seed), from)
            .await
        {
            tracing::debug!(%error, "spectator handshake response failed");
        }
    });
}

async fn on_handshake_response(context: &Arc<PeerContext>, message: &WireMessage) {
    if context.role != PeerRole::Joiner {
        tracing::warn!("HANDSHAKE_RESPONSE at a non-joiner, dropping");
        return;
    }
    let Some(seed) = message
        .int_field(fields::SEED)
        .and_then(|n| u64::try_from(n).ok())
    else {
        tracing::warn!("HANDSHAKE_RESPONSE with missing or bad seed, dropping");
        return;
    };

    let setup = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::Handshaking {
            tracing::debug!("duplicate HANDSHAKE_RESPONSE, ignoring");
            return;
        }
        session.seed_rng(seed);
        session.phase = BattlePhase::Setup;
        session.setup_sent = true;
        session
            .setup_message()
            .map(|message| (message, session.remote_addr))
    };

    let _ = context.events.send(PeerEvent::SeedReceived { seed }).await;

    // The joiner opens setup with its own BATTLE_SETUP.
    if let Some((message, Some(destination))) = setup {
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(error) = context.channel.send_with_ack(message, destination).await {
                transport_failed(&context, error.to_string()).await;
            }
        });
    }
}

async fn on_battle_setup(context: &Arc<PeerContext>, message: &WireMessage) {
    let (revealed, ready, response) = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::Setup {
            tracing::warn!(phase = session.phase.as_str(), "BATTLE_SETUP out of phase, dropping");
            return;
        }
        let Some(name) = message.get(fields::POKEMON_NAME) else {
            tracing::warn!("BATTLE_SETUP without pokemon_name, dropping");
            return;
        };
        let Some(opponent) = context.roster.spawn(name) else {
            tracing::warn!(name, "BATTLE_SETUP names an unknown combatant, dropping");
            return;
        };
        let boosts = message
            .get(fields::STAT_BOOSTS)
            .map(StatBoosts::decode)
            .unwrap_or_default();

        let revealed = PeerEvent::OpponentRevealed {
            name: opponent.name.clone(),
            hp: opponent.max_hp,
        };
        session.record_opponent(opponent, boosts);
        let ready = PeerEvent::BattleReady {
            my_turn: session.is_my_turn,
        };

        // The host answers with its own setup, exactly once.
        let response = if context.role == PeerRole::Host && !session.setup_sent {
            session.setup_sent = true;
            session
                .setup_message()
                .map(|message| (message, session.remote_addr))
        } else {
            None
        };

        (revealed, ready, response)
    };

    let _ = context.events.send(revealed).await;
    let _ = context.events.send(ready).await;

    if let Some((message, Some(destination))) = response {
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(error) = context.channel.send_with_ack(message, destination).await {
                transport_failed(&context, error.to_string()).await;
            }
        });
    }
}

async fn on_attack_announce(context: &Arc<PeerContext>, message: &WireMessage) {
    let (report, destination) = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::WaitingForMove || session.is_my_turn {
            tracing::warn!(
                phase = session.phase.as_str(),
                my_turn = session.is_my_turn,
                "ATTACK_ANNOUNCE out of phase, dropping"
            );
            return;
        }
        let Some(move_name) = message.get(fields::MOVE_NAME) else {
            tracing::warn!("ATTACK_ANNOUNCE without move_name, dropping");
            return;
        };
        let Some(report) = session.attack_received(move_name) else {
            tracing::warn!("ATTACK_ANNOUNCE before combatants are known, dropping");
            return;
        };
        (report, session.remote_addr)
    };

    let _ = context
        .events
        .send(PeerEvent::AttackIncoming {
            attacker: report.attacker_name.clone(),
            move_name: report.move_name.clone(),
        })
        .await;

    let Some(destination) = destination else { return };

    // Defender answers with DEFENSE_ANNOUNCE, then its own report.
    let context = context.clone();
    tokio::spawn(async move {
        let report_message = WireMessage::calculation_report(
            &report.attacker_name,
            &report.move_name,
            report.attacker_hp,
            report.damage,
            report.defender_hp_remaining,
            &report.status,
        );
        for message in [WireMessage::defense_announce(), report_message] {
            if let Err(error) = context.channel.send_with_ack(message, destination).await {
                transport_failed(&context, error.to_string()).await;
                return;
            }
        }
    });
}

async fn on_defense_announce(context: &Arc<PeerContext>) {
    let staged = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::ProcessingTurn || !session.is_attacking() {
            // Tolerated when received in error; nothing is pending.
            tracing::debug!("DEFENSE_ANNOUNCE without a pending local attack, dropping");
            return;
        }
        session
            .defense_acknowledged()
            .map(|report| (report, session.remote_addr))
    };

    let Some((report, Some(destination))) = staged else { return };

    let context = context.clone();
    tokio::spawn(async move {
        let message = WireMessage::calculation_report(
            &report.attacker_name,
            &report.move_name,
            report.attacker_hp,
            report.damage,
            report.defender_hp_remaining,
            &report.status,
        );
        if let Err(error) = context.channel.send_with_ack(message, destination).await {
            transport_failed(&context, error.to_string()).await;
        }
    });
}

async fn on_calculation_report(context: &Arc<PeerContext>, message: &WireMessage) {
    let status = message
        .get(fields::STATUS_MESSAGE)
        .unwrap_or_default()
        .to_string();
    let theirs = match parse_calculation(message) {
        Some(calculation) => calculation,
        None => {
            tracing::warn!("CALCULATION_REPORT with bad numeric fields, dropping");
            return;
        }
    };

    enum Outcome {
        Observed,
        Decided {
            matched: bool,
            ours: Calculation,
            theirs: Calculation,
            attacker: String,
            defender: String,
            move_name: String,
            end: Option<RoundEnd>,
            destination: Option<SocketAddr>,
        },
    }

    let outcome = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::ProcessingTurn {
            tracing::warn!(
                phase = session.phase.as_str(),
                "CALCULATION_REPORT out of phase, dropping"
            );
            return;
        }

        if !session.is_attacking() {
            // The defender just observes; the attacker arbitrates.
            Outcome::Observed
        } else {
            let Some(ours) = session.my_calculation else {
                tracing::warn!("CALCULATION_REPORT with no local calculation, dropping");
                return;
            };
            let Some((attacker, defender)) = session.round_names() else {
                tracing::warn!("CALCULATION_REPORT with no pending round, dropping");
                return;
            };
            let move_name = session
                .pending
                .as_ref()
                .map(|pending| pending.mv.name.clone())
                .unwrap_or_default();
            let matched = ours == theirs;
            // Our values are written either way; on mismatch they are
            // the authoritative ones the peer must adopt.
            let end = session.commit_round(ours.defender_hp_remaining);
            Outcome::Decided {
                matched,
                ours,
                theirs,
                attacker,
                defender,
                move_name,
                end,
                destination: session.remote_addr,
            }
        }
    };

    if !status.is_empty() {
        let _ = context
            .events
            .send(PeerEvent::StatusLine { text: status })
            .await;
    }

    let Outcome::Decided {
        matched,
        ours,
        theirs,
        attacker,
        defender,
        move_name,
        end,
        destination,
    } = outcome
    else {
        return;
    };

    if matched {
        let _ = context
            .events
            .send(PeerEvent::CalculationAgreed {
                damage: ours.damage,
                defender_hp: ours.defender_hp_remaining,
            })
            .await;
    } else {
        let _ = context
            .events
            .send(PeerEvent::CalculationMismatch { ours, theirs })
            .await;
    }

    let finished = end.as_ref().map(|end| end.finished).unwrap_or(false);
    if let Some(end) = &end {
        if !end.finished {
            let _ = context
                .events
                .send(PeerEvent::TurnChanged {
                    my_turn: end.my_turn_next,
                })
                .await;
        }
    }

    let Some(destination) = destination else { return };

    let context = context.clone();
    tokio::spawn(async move {
        let verdict = if matched {
            WireMessage::calculation_confirm()
        } else {
            WireMessage::resolution_request(
                &attacker,
                &move_name,
                ours.damage,
                ours.defender_hp_remaining,
            )
        };
        if let Err(error) = context.channel.send_with_ack(verdict, destination).await {
            transport_failed(&context, error.to_string()).await;
            return;
        }

        if finished {
            finish_battle(&context, destination, &attacker, &defender).await;
        }
    });
}

async fn on_calculation_confirm(context: &Arc<PeerContext>) {
    let outcome = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::ProcessingTurn || session.is_attacking() {
            tracing::warn!("CALCULATION_CONFIRM out of phase, dropping");
            return;
        }
        let Some(ours) = session.my_calculation else {
            tracing::warn!("CALCULATION_CONFIRM with no local calculation, dropping");
            return;
        };
        session
            .commit_round(ours.defender_hp_remaining)
            .map(|end| (ours, end))
    };

    let Some((ours, end)) = outcome else { return };

    let _ = context
        .events
        .send(PeerEvent::CalculationAgreed {
            damage: ours.damage,
            defender_hp: ours.defender_hp_remaining,
        })
        .await;

    if !end.finished {
        let _ = context
            .events
            .send(PeerEvent::TurnChanged {
                my_turn: end.my_turn_next,
            })
            .await;
    }
    // When finished, the attacker's GAME_OVER is on its way.
}

async fn on_resolution_request(context: &Arc<PeerContext>, message: &WireMessage) {
    let Some(theirs) = parse_calculation(message) else {
        tracing::warn!("RESOLUTION_REQUEST with bad numeric fields, dropping");
        return;
    };

    let outcome = {
        let mut session = context.session.lock().await;
        if session.phase != BattlePhase::ProcessingTurn || session.is_attacking() {
            tracing::warn!("RESOLUTION_REQUEST out of phase, dropping");
            return;
        }
        let Some(ours) = session.my_calculation else {
            // Nothing local to reconcile against: the state machines
            // have diverged beyond repair.
            tracing::error!("RESOLUTION_REQUEST with no local calculation; terminating");
            session.terminate();
            let _ = context.shutdown.try_send(());
            return;
        };
        // The initiator's values are authoritative.
        session
            .commit_round(theirs.defender_hp_remaining)
            .map(|end| (ours, end))
    };

    let Some((ours, end)) = outcome else { return };

    let _ = context
        .events
        .send(PeerEvent::CalculationMismatch { ours, theirs })
        .await;

    if !end.finished {
        let _ = context
            .events
            .send(PeerEvent::TurnChanged {
                my_turn: end.my_turn_next,
            })
            .await;
    }
}

async fn on_game_over(context: &Arc<PeerContext>, message: &WireMessage) {
    let winner = message.get(fields::WINNER).unwrap_or("Unknown").to_string();
    let loser = message.get(fields::LOSER).unwrap_or("Unknown").to_string();

    let spectator = {
        let mut session = context.session.lock().await;
        session.terminate();
        session.spectator_addr
    };

    // Relay the final word to the spectator before the socket winds
    // down, then stop the receive loop.
    let context = context.clone();
    let relay = message.clone();
    tokio::spawn(async move {
        if let Some(spectator) = spectator {
            if let Err(error) = context.channel.send_with_ack(relay, spectator).await {
                tracing::debug!(%error, "spectator game-over relay failed");
            }
        }
        let _ = context
            .events
            .send(PeerEvent::GameOver { winner, loser })
            .await;
        let _ = context.shutdown.try_send(());
    });
}

async fn on_chat_message(context: &Arc<PeerContext>, message: &WireMessage) {
    {
        let session = context.session.lock().await;
        if !matches!(
            session.phase,
            BattlePhase::WaitingForMove | BattlePhase::ProcessingTurn
        ) {
            tracing::debug!(
                phase = session.phase.as_str(),
                "CHAT_MESSAGE before battle, dropping"
            );
            return;
        }
    }

    let Some(event) = chat_event(message) else {
        tracing::warn!("CHAT_MESSAGE with bad content_type, dropping");
        return;
    };
    let _ = context.events.send(event).await;
}

/// Spectators only render what the host relays; they never touch
/// battle state beyond remembering the seed and noticing the end.
async fn dispatch_spectator(context: &Arc<PeerContext>, kind: MessageType, message: WireMessage) {
    match kind {
        MessageType::HandshakeResponse => {
            let seed = message
                .int_field(fields::SEED)
                .and_then(|n| u64::try_from(n).ok());
            {
                let mut session = context.session.lock().await;
                if let Some(seed) = seed {
                    session.seed_rng(seed);
                }
                session.phase = BattlePhase::WaitingForMove;
            }
            let _ = context
                .events
                .send(PeerEvent::SpectatorAccepted { seed })
                .await;
        }
        MessageType::BattleSetup => {
            if let Some(name) = message.get(fields::POKEMON_NAME) {
                let _ = context
                    .events
                    .send(PeerEvent::StatusLine {
                        text: format!("A player has selected {}!", name),
                    })
                    .await;
            }
        }
        MessageType::AttackAnnounce => {
            if let Some(move_name) = message.get(fields::MOVE_NAME) {
                let _ = context
                    .events
                    .send(PeerEvent::StatusLine {
                        text: format!("Move used: {}", move_name),
                    })
                    .await;
            }
        }
        MessageType::CalculationReport => {
            if let Some(status) = message.get(fields::STATUS_MESSAGE) {
                let _ = context
                    .events
                    .send(PeerEvent::StatusLine {
                        text: status.to_string(),
                    })
                    .await;
            }
            if let Some(calculation) = parse_calculation(&message) {
                let _ = context
                    .events
                    .send(PeerEvent::StatusLine {
                        text: format!(
                            "Defender took {} damage (HP remaining: {})",
                            calculation.damage, calculation.defender_hp_remaining
                        ),
                    })
                    .await;
            }
        }
        MessageType::ChatMessage => {
            if let Some(event) = chat_event(&message) {
                let _ = context.events.send(event).await;
            }
        }
        MessageType::GameOver => {
            let winner = message.get(fields::WINNER).unwrap_or("Unknown").to_string();
            let loser = message.get(fields::LOSER).unwrap_or("Unknown").to_string();
            {
                let mut session = context.session.lock().await;
                session.terminate();
            }
            let _ = context
                .events
                .send(PeerEvent::GameOver { winner, loser })
                .await;
            let _ = context.shutdown.try_send(());
        }
        _ => {
            tracing::debug!(%kind, "spectator ignoring message");
        }
    }
}

fn parse_calculation(message: &WireMessage) -> Option<Calculation> {
    let damage = message
        .int_field(fields::DAMAGE_DEALT)
        .and_then(|n| u32::try_from(n).ok())?;
    let defender_hp_remaining = message
        .int_field(fields::DEFENDER_HP_REMAINING)
        .and_then(|n| u32::try_from(n).ok())?;
    Some(Calculation {
        damage,
        defender_hp_remaining,
    })
}

fn chat_event(message: &WireMessage) -> Option<PeerEvent> {
    let sender = message
        .get(fields::SENDER_NAME)
        .unwrap_or("unknown")
        .to_string();
    let content_type = ContentType::parse(message.get(fields::CONTENT_TYPE)?)?;
    let body = match content_type {
        ContentType::Text => {
            ChatBody::Text(message.get(fields::MESSAGE_TEXT).unwrap_or_default().to_string())
        }
        ContentType::Sticker => ChatBody::Sticker(
            message.get(fields::STICKER_DATA).unwrap_or_default().to_string(),
        ),
    };
    Some(PeerEvent::ChatReceived { sender, body })
}

/// Attacker side: announce the result, wind the session down.
async fn finish_battle(
    context: &Arc<PeerContext>,
    destination: SocketAddr,
    winner: &str,
    loser: &str,
) {
    let game_over = WireMessage::game_over(winner, loser);

    if let Err(error) = context
        .channel
        .send_with_ack(game_over.clone(), destination)
        .await
    {
        transport_failed(context, error.to_string()).await;
    }

    let spectator = {
        let mut session = context.session.lock().await;
        session.terminate();
        session.spectator_addr
    };
    if let Some(spectator) = spectator {
        if let Err(error) = context.channel.send_with_ack(game_over, spectator).await {
            tracing::debug!(%error, "spectator game-over relay failed");
        }
    }

    let _ = context
        .events
        .send(PeerEvent::GameOver {
            winner: winner.to_string(),
            loser: loser.to_string(),
        })
        .await;
    let _ = context.shutdown.try_send(());
}

async fn transport_failed(context: &Arc<PeerContext>, detail: String) {
    tracing::warn!(%detail, "reliable send failed");
    let _ = context
        .events
        .send(PeerEvent::TransportFailed { detail })
        .await;
}
