//! Reliable channel - stop-and-wait ARQ over the datagram socket
//!
//! Each reliable send stamps the next sequence number onto the
//! message, transmits it, and waits up to [`ACK_TIMEOUT`] for a
//! matching ACK, retransmitting the identical datagram up to
//! [`MAX_SEND_ATTEMPTS`] times in total. Sends are serialized by a
//! mutex so exactly one is in flight at a time; the sequence counter
//! advances only when a send succeeds, so a failed send leaves no gap
//! in the stream.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::queue::ArrivalQueue;
use crate::protocol::{self, fields, WireMessage};

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] crate::protocol::CodecError),

    #[error("no ACK for sequence {sequence} after {attempts} attempts")]
    RetriesExhausted { sequence: u64, attempts: u32 },
}

#[derive(Debug)]
struct SendState {
    /// Sequence number the next successful send will carry. Starts at 1.
    next_sequence: u64,
}

/// Reliable unicast over the shared UDP socket.
pub struct ReliableChannel {
    socket: Arc<UdpSocket>,
    arrival: Arc<ArrivalQueue>,
    sender: Mutex<SendState>,
}

impl ReliableChannel {
    pub fn new(socket: Arc<UdpSocket>, arrival: Arc<ArrivalQueue>) -> Self {
        Self {
            socket,
            arrival,
            sender: Mutex::new(SendState { next_sequence: 1 }),
        }
    }

    /// Send `message` and wait for its acknowledgment.
    ///
    /// Holding the sender lock across the whole exchange enforces the
    /// one-in-flight invariant and makes it safe for this call to
    /// drain the arrival queue while searching for its ACK.
    pub async fn send_with_ack(
        &self,
        mut message: WireMessage,
        destination: SocketAddr,
    ) -> Result<(), ChannelError> {
        let mut state = self.sender.lock().await;
        let sequence = state.next_sequence;

        message.set(fields::SEQUENCE_NUMBER, sequence.to_string());
        let datagram = protocol::encode_datagram(&message)?;

        for attempt in 1..=protocol::MAX_SEND_ATTEMPTS {
            tracing::debug!(
                sequence,
                attempt,
                kind = message.raw_type().unwrap_or("?"),
                %destination,
                "sending"
            );
            self.socket.send_to(&datagram, destination).await?;

            if self
                .arrival
                .wait_for_ack(sequence, protocol::ACK_TIMEOUT)
                .await
            {
                state.next_sequence += 1;
                tracing::debug!(sequence, "acknowledged");
                return Ok(());
            }

            tracing::debug!(sequence, attempt, "ack timeout");
        }

        tracing::warn!(
            sequence,
            attempts = protocol::MAX_SEND_ATTEMPTS,
            "delivery failed"
        );
        Err(ChannelError::RetriesExhausted {
            sequence,
            attempts: protocol::MAX_SEND_ATTEMPTS,
        })
    }

    /// Fire an ACK datagram. ACKs are unsequenced and never retried or
    /// themselves acknowledged.
    pub async fn send_ack(
        &self,
        ack_number: u64,
        destination: SocketAddr,
    ) -> Result<(), ChannelError> {
        let datagram = protocol::encode_datagram(&WireMessage::ack(ack_number))?;
        self.socket.send_to(&datagram, destination).await?;
        Ok(())
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::time::Duration;

    async fn channel_pair() -> (Arc<ReliableChannel>, Arc<ArrivalQueue>, Arc<UdpSocket>, SocketAddr) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let arrival = Arc::new(ArrivalQueue::new());
        let channel = Arc::new(ReliableChannel::new(socket.clone(), arrival.clone()));

        let peer = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer_addr = peer.local_addr().unwrap();
        (channel, arrival, peer, peer_addr)
    }

    async fn recv_message(socket: &UdpSocket) -> (WireMessage, SocketAddr) {
        let mut buffer = [0u8; protocol::MAX_DATAGRAM_SIZE];
        let (len, from) = socket.recv_from(&mut buffer).await.unwrap();
        (protocol::decode_datagram(&buffer[..len]).unwrap(), from)
    }

    #[tokio::test]
    async fn test_delivery_on_first_attempt() {
        let (channel, arrival, peer, peer_addr) = channel_pair().await;

        let acker = tokio::spawn(async move {
            let (message, _) = recv_message(&peer).await;
            assert_eq!(message.sequence_number(), Some(1));
            message.sequence_number().unwrap()
        });

        let sender = channel.clone();
        let send = tokio::spawn(async move {
            sender
                .send_with_ack(WireMessage::defense_announce(), peer_addr)
                .await
        });

        let sequence = acker.await.unwrap();
        arrival.push(WireMessage::ack(sequence));
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sequence_numbers_strictly_increase() {
        let (channel, arrival, peer, peer_addr) = channel_pair().await;

        let acker = tokio::spawn({
            let arrival = arrival.clone();
            async move {
                let mut seen = Vec::new();
                for _ in 0..3 {
                    let (message, _) = recv_message(&peer).await;
                    let sequence = message.sequence_number().unwrap();
                    seen.push(sequence);
                    arrival.push(WireMessage::ack(sequence));
                }
                seen
            }
        });

        for _ in 0..3 {
            channel
                .send_with_ack(WireMessage::defense_announce(), peer_addr)
                .await
                .unwrap();
        }

        assert_eq!(acker.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_retransmits_identical_datagram() {
        let (channel, arrival, peer, peer_addr) = channel_pair().await;

        let acker = tokio::spawn({
            let arrival = arrival.clone();
            async move {
                // Ignore the first transmission; ACK the retry.
                let (first, _) = recv_message(&peer).await;
                let (second, _) = recv_message(&peer).await;
                assert_eq!(first, second);
                arrival.push(WireMessage::ack(second.sequence_number().unwrap()));
            }
        });

        channel
            .send_with_ack(WireMessage::attack_announce("Tackle"), peer_addr)
            .await
            .unwrap();
        acker.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_send_does_not_advance_counter() {
        let (channel, arrival, peer, peer_addr) = channel_pair().await;

        // Nobody ACKs: all three attempts time out.
        let result = channel
            .send_with_ack(WireMessage::defense_announce(), peer_addr)
            .await;
        assert!(matches!(
            result,
            Err(ChannelError::RetriesExhausted {
                sequence: 1,
                attempts: 3
            })
        ));

        // The next successful send reuses sequence 1: no gap.
        let acker = tokio::spawn({
            let arrival = arrival.clone();
            async move {
                loop {
                    let (message, _) = recv_message(&peer).await;
                    if message.message_type() == Some(MessageType::DefenseAnnounce) {
                        let sequence = message.sequence_number().unwrap();
                        arrival.push(WireMessage::ack(sequence));
                        return sequence;
                    }
                }
            }
        });

        channel
            .send_with_ack(WireMessage::defense_announce(), peer_addr)
            .await
            .unwrap();
        assert_eq!(acker.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ack_datagram_shape() {
        let (channel, _arrival, peer, peer_addr) = channel_pair().await;
        channel.send_ack(42, peer_addr).await.unwrap();

        let (message, _) = tokio::time::timeout(Duration::from_secs(1), recv_message(&peer))
            .await
            .unwrap();
        assert!(message.is_ack());
        assert_eq!(message.ack_number(), Some(42));
        assert_eq!(message.sequence_number(), None);
    }
}
