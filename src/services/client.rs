//! Alarm client - sequence-numbered messages to the remote concentrator
//!
//! Every sent message is numbered and held until the client acknowledges
//! that number. The pending queue is bounded; the oldest entry goes first.

use crate::domain::messages::{ClientAck, ClientBody, ClientMessage};
use crate::domain::Outbound;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Max unacknowledged messages kept
pub const MAX_PENDING: usize = 256;

pub struct AlarmClient {
    source: String,
    destination: String,
    next_seq: u64,
    pending: VecDeque<ClientMessage>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl AlarmClient {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            next_seq: 0,
            pending: VecDeque::new(),
            outbound_tx,
        }
    }

    /// Send an alarm for `sensor` at `timestamp`; returns its sequence number
    pub fn alarm(&mut self, sensor: &str, timestamp: f64) -> u64 {
        self.send(ClientBody { m: "alarm".to_string(), s: sensor.to_string(), t: timestamp, n: None })
    }

    fn send(&mut self, mut body: ClientBody) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        body.n = Some(seq);

        let message = ClientMessage {
            source: self.source.clone(),
            destination: self.destination.clone(),
            body,
        };

        if self.pending.len() >= MAX_PENDING {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(seq = ?dropped.body.n, "client_pending_full_dropping_oldest");
            }
        }
        self.pending.push_back(message.clone());

        if self.outbound_tx.send(Outbound::Client(message)).is_err() {
            warn!(seq = %seq, "client_outbound_closed");
        }
        seq
    }

    /// Handle an acknowledgement; returns true if it matched a pending message
    pub fn receive(&mut self, ack: &ClientAck) -> bool {
        let Some(body) = &ack.body else {
            warn!("client_ack_without_body");
            return false;
        };
        let Some(seq) = body.n else {
            debug!("client_ack_without_sequence");
            return false;
        };

        let before = self.pending.len();
        self.pending.retain(|message| message.body.n != Some(seq));
        let matched = self.pending.len() < before;
        debug!(seq = %seq, matched = %matched, "client_ack_received");
        matched
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::AckBody;

    fn ack(n: Option<u64>) -> ClientAck {
        ClientAck { body: Some(AckBody { n }) }
    }

    fn client() -> (AlarmClient, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AlarmClient::new("sch_app", "CID7", tx), rx)
    }

    #[test]
    fn test_alarm_is_numbered_and_sent() {
        let (mut client, mut rx) = client();
        assert_eq!(client.alarm("PIR Hall", 100.0), 0);
        assert_eq!(client.alarm("PIR Hall", 200.0), 1);

        let Outbound::Client(first) = rx.try_recv().unwrap() else {
            panic!("expected client message");
        };
        assert_eq!(first.source, "sch_app");
        assert_eq!(first.destination, "CID7");
        assert_eq!(
            serde_json::to_value(&first.body).unwrap(),
            serde_json::json!({"m": "alarm", "s": "PIR Hall", "t": 100.0, "n": 0})
        );
        assert_eq!(client.pending(), 2);
    }

    #[test]
    fn test_ack_removes_matching_message_only() {
        let (mut client, _rx) = client();
        client.alarm("a", 1.0);
        client.alarm("b", 2.0);

        assert!(client.receive(&ack(Some(1))));
        assert_eq!(client.pending(), 1);
        assert!(!client.receive(&ack(Some(1))));
        assert!(!client.receive(&ack(Some(9))));
        assert_eq!(client.pending(), 1);
    }

    #[test]
    fn test_ack_without_number_is_ignored() {
        let (mut client, _rx) = client();
        client.alarm("a", 1.0);
        assert!(!client.receive(&ack(None)));
        assert!(!client.receive(&ClientAck { body: None }));
        assert_eq!(client.pending(), 1);
    }

    #[test]
    fn test_pending_queue_is_bounded() {
        let (mut client, _rx) = client();
        for i in 0..(MAX_PENDING + 10) {
            client.alarm("a", i as f64);
        }
        assert_eq!(client.pending(), MAX_PENDING);
        // Oldest ten were dropped
        assert!(!client.receive(&ack(Some(9))));
        assert!(client.receive(&ack(Some(10))));
    }
}
