// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-connection transmission control block.

use std::fmt;
use std::time::Duration;

use strum_macros::EnumCount;
use strum_macros::EnumIter;

use crate::SequenceNumber32;

/// Congestion state of a connection.
///
/// The transitions are driven by the socket, see `TcpSender`. Congestion
/// algorithms are told about a transition through
/// `TcpCongestionOps::congestion_state_set()` before the field is updated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum TcpCongState {
    /// Normal state, no dubious events.
    #[default]
    Open,

    /// In all respects it is "Open", but requires a bit more attention.
    /// It is entered when dubious ACKs or SACKs are seen.
    Disorder,

    /// cwnd was reduced due to some congestion notification event, such as
    /// ECN, ICMP source quench or local device congestion.
    Cwr,

    /// cwnd was reduced, we are fast-retransmitting.
    Recovery,

    /// cwnd was reduced due to RTO timeout or SACK reneging.
    Loss,
}

impl TcpCongState {
    /// Stable name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            TcpCongState::Open => "CA_OPEN",
            TcpCongState::Disorder => "CA_DISORDER",
            TcpCongState::Cwr => "CA_CWR",
            TcpCongState::Recovery => "CA_RECOVERY",
            TcpCongState::Loss => "CA_LOSS",
        }
    }
}

impl fmt::Display for TcpCongState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Congestion avoidance events reported to `TcpCongestionOps::cwnd_event()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter)]
pub enum TcpCaEvent {
    /// First transmit when no packets in flight.
    TxStart,

    /// Congestion window restart.
    CwndRestart,

    /// End of congestion recovery.
    CompleteCwr,

    /// Loss timeout.
    Loss,

    /// ECT set, but not CE marked.
    EcnNoCe,

    /// Received CE marked IP packet.
    EcnIsCe,

    /// Delayed ack is sent.
    DelayedAck,

    /// Non-delayed ack is sent.
    NonDelayedAck,
}

impl TcpCaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TcpCaEvent::TxStart => "CA_EVENT_TX_START",
            TcpCaEvent::CwndRestart => "CA_EVENT_CWND_RESTART",
            TcpCaEvent::CompleteCwr => "CA_EVENT_COMPLETE_CWR",
            TcpCaEvent::Loss => "CA_EVENT_LOSS",
            TcpCaEvent::EcnNoCe => "CA_EVENT_ECN_NO_CE",
            TcpCaEvent::EcnIsCe => "CA_EVENT_ECN_IS_CE",
            TcpCaEvent::DelayedAck => "CA_EVENT_DELAYED_ACK",
            TcpCaEvent::NonDelayedAck => "CA_EVENT_NON_DELAYED_ACK",
        }
    }
}

/// ECN state of the sender side of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum EcnState {
    /// ECN is not negotiated.
    #[default]
    Disabled,

    /// ECN negotiated, nothing to report.
    Idle,

    /// Last packet received had CE bit set in IP header.
    CeRcvd,

    /// Receiver sends an ACK with ECE bit set in TCP header.
    SendingEce,

    /// Last ACK received had ECE bit set in TCP header.
    EceRcvd,

    /// Sender has reduced the window and set CWR in the TCP header.
    CwrSent,
}

/// Transmission control block shared between the socket and its congestion
/// and recovery algorithms.
///
/// The socket owns it. Algorithms borrow it for the duration of a single call
/// and must not keep a reference.
#[derive(Clone, Debug)]
pub struct TcpSocketState {
    /// Congestion window in bytes.
    pub cwnd: u32,

    /// Inflated congestion window used while in fast recovery.
    pub cwnd_infl: u32,

    /// Slow start threshold in bytes.
    pub ssthresh: u32,

    /// Initial congestion window in segments.
    pub initial_cwnd: u32,

    /// Initial slow start threshold in bytes.
    pub initial_ssthresh: u32,

    /// Segment size in bytes. Fixed for the life of the connection.
    pub segment_size: u32,

    /// Highest sequence number acknowledged.
    pub last_acked_seq: SequenceNumber32,

    /// Highest sequence number ever transmitted.
    pub high_tx_mark: SequenceNumber32,

    /// Next sequence number to send.
    pub next_tx_sequence: SequenceNumber32,

    /// Current congestion state.
    pub cong_state: TcpCongState,

    /// Current ECN state.
    pub ecn_state: EcnState,

    /// Bytes sent but neither acknowledged nor selectively acknowledged.
    pub bytes_in_flight: u32,

    /// Timestamp value (TSval) of the last received segment.
    pub rcv_timestamp_value: u32,

    /// Timestamp echo reply (TSecr) of the last received segment.
    pub rcv_timestamp_echo_reply: u32,

    /// Minimum RTT observed over the connection.
    pub min_rtt: Duration,

    /// Most recent RTT sample.
    pub last_rtt: Duration,

    /// Whether the last transmission was limited by the congestion window.
    pub is_cwnd_limited: bool,
}

impl TcpSocketState {
    /// Create a control block with the window set to `initial_cwnd` segments.
    pub fn new(segment_size: u32, initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        let cwnd = initial_cwnd.saturating_mul(segment_size);
        Self {
            cwnd,
            cwnd_infl: cwnd,
            ssthresh: initial_ssthresh,
            initial_cwnd,
            initial_ssthresh,
            segment_size,
            last_acked_seq: SequenceNumber32::default(),
            high_tx_mark: SequenceNumber32::default(),
            next_tx_sequence: SequenceNumber32::default(),
            cong_state: TcpCongState::Open,
            ecn_state: EcnState::Disabled,
            bytes_in_flight: 0,
            rcv_timestamp_value: 0,
            rcv_timestamp_echo_reply: 0,
            min_rtt: Duration::MAX,
            last_rtt: Duration::ZERO,
            is_cwnd_limited: false,
        }
    }

    /// Congestion window in whole segments.
    pub fn cwnd_in_segments(&self) -> u32 {
        self.cwnd / self.segment_size
    }

    /// Slow start threshold in whole segments.
    pub fn ssthresh_in_segments(&self) -> u32 {
        self.ssthresh / self.segment_size
    }

    /// Whether the window is below the slow start threshold.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Record an RTT sample, keeping the running minimum.
    pub fn update_rtt(&mut self, rtt: Duration) {
        if rtt.is_zero() {
            return;
        }
        self.last_rtt = rtt;
        self.min_rtt = self.min_rtt.min(rtt);
    }
}

impl Default for TcpSocketState {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SEGMENT_SIZE, 1, u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;
    use strum::IntoEnumIterator;

    #[test]
    fn cong_state_names() {
        let names: Vec<&str> = TcpCongState::iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["CA_OPEN", "CA_DISORDER", "CA_CWR", "CA_RECOVERY", "CA_LOSS"]
        );
        assert_eq!(TcpCongState::COUNT, 5);
        assert_eq!(format!("{}", TcpCongState::Recovery), "CA_RECOVERY");
    }

    #[test]
    fn ca_event_names() {
        for event in TcpCaEvent::iter() {
            assert!(event.name().starts_with("CA_EVENT_"));
        }
    }

    #[test]
    fn segments() {
        let mut tcb = TcpSocketState::new(536, 10, 4000);
        assert_eq!(tcb.cwnd, 5360);
        assert_eq!(tcb.cwnd_infl, 5360);
        assert_eq!(tcb.cwnd_in_segments(), 10);
        assert_eq!(tcb.ssthresh_in_segments(), 7);
        assert!(!tcb.in_slow_start());

        tcb.ssthresh = u32::MAX;
        assert!(tcb.in_slow_start());
    }

    #[test]
    fn rtt_samples() {
        let mut tcb = TcpSocketState::default();
        assert_eq!(tcb.min_rtt, Duration::MAX);

        tcb.update_rtt(Duration::from_millis(80));
        tcb.update_rtt(Duration::from_millis(60));
        tcb.update_rtt(Duration::from_millis(70));
        tcb.update_rtt(Duration::ZERO);
        assert_eq!(tcb.min_rtt, Duration::from_millis(60));
        assert_eq!(tcb.last_rtt, Duration::from_millis(70));
    }
}
