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

//! Sender side of a TCP socket, driving the congestion state machine.

use std::time::Duration;

use log::*;

use crate::build_congestion_ops;
use crate::build_recovery_ops;
use crate::qlog;
use crate::qlog::events::CongestionStateUpdatedTrigger;
use crate::qlog::events::EventData;
use crate::qlog::events::EventImportance;
use crate::time::ClockRef;
use crate::Config;
use crate::EcnState;
use crate::Result;
use crate::SequenceNumber32;
use crate::TcpCaEvent;
use crate::TcpCongState;
use crate::TcpCongestionOps;
use crate::TcpRecoveryOps;
use crate::TcpSocketState;

/// Sender side congestion handling of a connection.
///
/// It owns the control block together with one congestion control and one
/// recovery algorithm, and turns transmissions, ACKs and timeouts into calls
/// to them. Sending data is left to the caller: it asks for the available
/// window and reports back what was sent.
pub struct TcpSender {
    /// Transmission control block.
    tcb: TcpSocketState,

    /// Congestion control algorithm.
    congestion: Box<dyn TcpCongestionOps>,

    /// Fast recovery algorithm.
    recovery: Box<dyn TcpRecoveryOps>,

    /// Duplicate ACKs received since the last new ACK.
    dup_ack_count: u32,

    /// Duplicate ACKs that trigger fast retransmit.
    retx_thresh: u32,

    /// Highest sequence sent when recovery, loss or CWR was entered.
    recover: SequenceNumber32,

    /// Acknowledged bytes not yet counted as a whole segment.
    bytes_acked_remainder: u32,

    clock: ClockRef,

    /// Congestion trace, not carried over by `fork()`.
    qlog: Option<qlog::QlogWriter>,

    /// Last metrics written to the trace.
    last_metrics: RecoveryMetrics,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl TcpSender {
    pub fn new(conf: &Config, clock: ClockRef) -> Self {
        let tcb = TcpSocketState::new(
            conf.segment_size,
            conf.initial_cwnd,
            conf.initial_ssthresh,
        );

        TcpSender {
            tcb,
            congestion: build_congestion_ops(conf, clock.clone()),
            recovery: build_recovery_ops(conf),
            dup_ack_count: 0,
            retx_thresh: conf.retx_threshold,
            recover: SequenceNumber32::default(),
            bytes_acked_remainder: 0,
            clock,
            qlog: None,
            last_metrics: RecoveryMetrics::default(),
            trace_id: String::new(),
        }
    }

    /// Set the unique trace id used in debug logs.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    /// Start writing a congestion trace to `writer`.
    pub fn set_qlog(
        &mut self,
        writer: Box<dyn std::io::Write>,
        title: String,
        description: String,
        level: EventImportance,
    ) -> Result<()> {
        let trace = qlog::TraceSeq::new(Some(title.clone()), Some(description.clone()));
        let mut writer = qlog::QlogWriter::new(
            Some(title),
            Some(description),
            trace,
            level,
            writer,
            self.clock.now(),
        );
        writer.start()?;

        let ev_data = EventData::RecoveryParametersSet {
            congestion_control: Some(self.congestion.name().to_string()),
            recovery: Some(self.recovery.name().to_string()),
            reordering_threshold: Some(self.retx_thresh),
            max_datagram_size: Some(self.tcb.segment_size),
            initial_congestion_window: Some(self.tcb.cwnd as u64),
            initial_ssthresh: Some(self.tcb.ssthresh as u64),
        };
        writer.add_event_data(self.clock.now(), ev_data).ok();

        self.qlog = Some(writer);
        self.qlog_recovery_metrics_updated();
        Ok(())
    }

    /// Return the transmission control block.
    pub fn tcb(&self) -> &TcpSocketState {
        &self.tcb
    }

    /// Return the mutable transmission control block, for timestamp and ECN
    /// fields maintained by the receive path.
    pub fn tcb_mut(&mut self) -> &mut TcpSocketState {
        &mut self.tcb
    }

    pub fn congestion_ops(&self) -> &dyn TcpCongestionOps {
        self.congestion.as_ref()
    }

    pub fn recovery_ops(&self) -> &dyn TcpRecoveryOps {
        self.recovery.as_ref()
    }

    pub fn cong_state(&self) -> TcpCongState {
        self.tcb.cong_state
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    /// Highest sequence sent when the current reduction started.
    pub fn recover(&self) -> SequenceNumber32 {
        self.recover
    }

    /// Bytes that may be sent now. In recovery the inflated window is used.
    pub fn available_window(&self) -> u32 {
        let window = if self.tcb.cong_state == TcpCongState::Recovery {
            self.tcb.cwnd_infl
        } else {
            self.tcb.cwnd
        };
        window.saturating_sub(self.tcb.bytes_in_flight)
    }

    /// Handle `bytes` of data just sent.
    ///
    /// A fast retransmission does not move the send sequence. After a
    /// retransmission timeout, retransmitted data is resent from
    /// `last_acked_seq` and moves it like new data.
    pub fn on_data_sent(&mut self, bytes: u32, is_retransmission: bool) {
        if self.tcb.bytes_in_flight == 0 {
            self.congestion.cwnd_event(&mut self.tcb, TcpCaEvent::TxStart);
        }

        if !is_retransmission || self.tcb.cong_state == TcpCongState::Loss {
            self.tcb.next_tx_sequence += bytes;
            if self.tcb.next_tx_sequence > self.tcb.high_tx_mark {
                self.tcb.high_tx_mark = self.tcb.next_tx_sequence;
            }
        }

        self.tcb.bytes_in_flight = self.tcb.bytes_in_flight.saturating_add(bytes);
        self.tcb.is_cwnd_limited = self.tcb.bytes_in_flight >= self.tcb.cwnd;

        if self.tcb.cong_state == TcpCongState::Recovery {
            self.recovery.update_bytes_sent(bytes);
        }

        trace!(
            "{} {} SENT bytes={} retransmission={} next_tx={} inflight={}",
            self.trace_id,
            self.congestion.name(),
            bytes,
            is_retransmission,
            self.tcb.next_tx_sequence,
            self.tcb.bytes_in_flight
        );
    }

    /// Handle an ACK carrying the cumulative acknowledgment `ack_seq`.
    ///
    /// `sacked_bytes` is the amount of data currently reported by SACK
    /// blocks and `rtt` the sample taken from it, zero if none.
    pub fn on_ack(&mut self, ack_seq: SequenceNumber32, sacked_bytes: u32, rtt: Duration) {
        if ack_seq < self.tcb.last_acked_seq {
            trace!("{} old ack {} ignored", self.trace_id, ack_seq);
            return;
        }

        if ack_seq == self.tcb.last_acked_seq {
            if self.tcb.bytes_in_flight > 0 {
                self.on_dup_ack(sacked_bytes);
            }
        } else {
            self.on_new_ack(ack_seq, sacked_bytes, rtt);
        }

        self.qlog_recovery_metrics_updated();
    }

    fn on_dup_ack(&mut self, sacked_bytes: u32) {
        self.dup_ack_count += 1;

        trace!(
            "{} {} DUPACK count={} state={}",
            self.trace_id,
            self.congestion.name(),
            self.dup_ack_count,
            self.tcb.cong_state
        );

        match self.tcb.cong_state {
            TcpCongState::Open | TcpCongState::Disorder => {
                if self.tcb.cong_state == TcpCongState::Open {
                    self.set_cong_state(
                        TcpCongState::Disorder,
                        Some(CongestionStateUpdatedTrigger::DuplicateAck),
                    );
                }

                if self.dup_ack_count == self.retx_thresh {
                    self.enter_recovery(sacked_bytes);
                }
            }

            TcpCongState::Recovery => {
                self.recovery.do_recovery(&mut self.tcb, 0, sacked_bytes);
            }

            // Waiting for the recovery point.
            TcpCongState::Loss | TcpCongState::Cwr => (),
        }
    }

    fn on_new_ack(&mut self, ack_seq: SequenceNumber32, sacked_bytes: u32, rtt: Duration) {
        let acked_bytes = ack_seq - self.tcb.last_acked_seq;
        self.tcb.last_acked_seq = ack_seq;
        if self.tcb.next_tx_sequence < ack_seq {
            self.tcb.next_tx_sequence = ack_seq;
        }
        self.tcb.bytes_in_flight = self.tcb.bytes_in_flight.saturating_sub(acked_bytes);
        self.tcb.update_rtt(rtt);
        self.dup_ack_count = 0;

        self.bytes_acked_remainder += acked_bytes;
        let segments_acked = self.bytes_acked_remainder / self.tcb.segment_size;
        self.bytes_acked_remainder %= self.tcb.segment_size;

        trace!(
            "{} {} ACK seq={} acked={} segments={} state={} cwnd={}",
            self.trace_id,
            self.congestion.name(),
            ack_seq,
            acked_bytes,
            segments_acked,
            self.tcb.cong_state,
            self.tcb.cwnd
        );

        self.congestion.pkts_acked(&mut self.tcb, segments_acked, rtt);

        let recovered = ack_seq >= self.recover;
        match self.tcb.cong_state {
            TcpCongState::Open => {
                self.congestion.increase_window(&mut self.tcb, segments_acked);
            }

            TcpCongState::Disorder => {
                self.set_cong_state(TcpCongState::Open, None);
                self.congestion.increase_window(&mut self.tcb, segments_acked);
            }

            TcpCongState::Recovery => {
                if recovered {
                    self.recovery.exit_recovery(&mut self.tcb);
                    self.set_cong_state(
                        TcpCongState::Open,
                        Some(CongestionStateUpdatedTrigger::RecoveryPointAcked),
                    );
                } else {
                    // Partial ACK, retransmit the next hole.
                    self.recovery
                        .do_recovery(&mut self.tcb, acked_bytes, sacked_bytes);
                }
            }

            TcpCongState::Loss => {
                self.congestion.increase_window(&mut self.tcb, segments_acked);
                if recovered {
                    self.set_cong_state(
                        TcpCongState::Open,
                        Some(CongestionStateUpdatedTrigger::RecoveryPointAcked),
                    );
                }
            }

            TcpCongState::Cwr => {
                self.congestion.increase_window(&mut self.tcb, segments_acked);
                if recovered {
                    self.congestion.cwnd_event(&mut self.tcb, TcpCaEvent::CompleteCwr);
                    self.set_cong_state(
                        TcpCongState::Open,
                        Some(CongestionStateUpdatedTrigger::RecoveryPointAcked),
                    );
                }
            }
        }
    }

    /// Enter fast recovery on the duplicate ACK threshold.
    fn enter_recovery(&mut self, sacked_bytes: u32) {
        self.tcb.ssthresh = self
            .congestion
            .get_ss_thresh(&self.tcb, self.tcb.bytes_in_flight);
        self.recover = self.tcb.high_tx_mark;
        self.set_cong_state(
            TcpCongState::Recovery,
            Some(CongestionStateUpdatedTrigger::DuplicateAck),
        );

        let unack_data_count = self.tcb.high_tx_mark - self.tcb.last_acked_seq;
        self.recovery.enter_recovery(
            &mut self.tcb,
            self.dup_ack_count,
            unack_data_count,
            sacked_bytes,
        );

        debug!(
            "{} {} enter recovery: ssthresh={} cwnd={} cwnd_infl={} recover={}",
            self.trace_id,
            self.recovery.name(),
            self.tcb.ssthresh,
            self.tcb.cwnd,
            self.tcb.cwnd_infl,
            self.recover
        );
    }

    /// Handle the expiry of the retransmission timer.
    ///
    /// All outstanding data is considered lost and will be resent from the
    /// last acknowledged sequence with a window of one segment.
    pub fn on_retransmission_timeout(&mut self) {
        if self.tcb.cong_state == TcpCongState::Loss {
            // Every timeout is reported, the state itself does not change.
            self.congestion
                .congestion_state_set(&self.tcb, TcpCongState::Loss);
        } else {
            self.tcb.ssthresh = self
                .congestion
                .get_ss_thresh(&self.tcb, self.tcb.bytes_in_flight);
            self.set_cong_state(
                TcpCongState::Loss,
                Some(CongestionStateUpdatedTrigger::RetransmissionTimeout),
            );
        }

        self.recover = self.tcb.high_tx_mark;

        self.tcb.cwnd = self.tcb.segment_size;
        self.tcb.cwnd_infl = self.tcb.cwnd;
        self.tcb.next_tx_sequence = self.tcb.last_acked_seq;
        self.tcb.bytes_in_flight = 0;
        self.dup_ack_count = 0;

        debug!(
            "{} {} RTO: ssthresh={} recover={}",
            self.trace_id,
            self.congestion.name(),
            self.tcb.ssthresh,
            self.recover
        );
        self.qlog_recovery_metrics_updated();
    }

    /// Handle an ACK with the ECN echo flag.
    ///
    /// The window is reduced at most once per window of data, and not while
    /// a loss is being repaired.
    pub fn on_ecn_echo(&mut self) {
        if !matches!(
            self.tcb.cong_state,
            TcpCongState::Open | TcpCongState::Disorder
        ) {
            return;
        }

        if self.tcb.ecn_state != EcnState::Disabled {
            self.tcb.ecn_state = EcnState::EceRcvd;
        }

        self.tcb.ssthresh = self
            .congestion
            .get_ss_thresh(&self.tcb, self.tcb.bytes_in_flight);
        self.recover = self.tcb.high_tx_mark;
        self.set_cong_state(
            TcpCongState::Cwr,
            Some(CongestionStateUpdatedTrigger::Ecn),
        );
        self.tcb.cwnd = self.tcb.ssthresh;
        self.tcb.cwnd_infl = self.tcb.cwnd;
        self.congestion.cwnd_event(&mut self.tcb, TcpCaEvent::EcnIsCe);

        if self.tcb.ecn_state != EcnState::Disabled {
            self.tcb.ecn_state = EcnState::CwrSent;
        }

        debug!(
            "{} {} ECN echo: cwnd={}",
            self.trace_id,
            self.congestion.name(),
            self.tcb.cwnd
        );
        self.qlog_recovery_metrics_updated();
    }

    /// Return a sender for a connection accepted from a listener. It starts
    /// with a copy of this sender's state, and shares nothing mutable with
    /// it except the clock.
    pub fn fork(&self) -> TcpSender {
        TcpSender {
            tcb: self.tcb.clone(),
            congestion: self.congestion.fork(),
            recovery: self.recovery.fork(),
            dup_ack_count: self.dup_ack_count,
            retx_thresh: self.retx_thresh,
            recover: self.recover,
            bytes_acked_remainder: self.bytes_acked_remainder,
            clock: self.clock.clone(),
            qlog: None,
            last_metrics: RecoveryMetrics::default(),
            trace_id: self.trace_id.clone(),
        }
    }

    /// Notify the congestion algorithm and update the congestion state.
    fn set_cong_state(
        &mut self,
        new_state: TcpCongState,
        trigger: Option<CongestionStateUpdatedTrigger>,
    ) {
        let old_state = self.tcb.cong_state;
        if old_state == new_state {
            return;
        }

        self.congestion.congestion_state_set(&self.tcb, new_state);
        self.tcb.cong_state = new_state;

        debug!(
            "{} {} {} -> {}",
            self.trace_id,
            self.congestion.name(),
            old_state,
            new_state
        );

        if let Some(qlog) = self.qlog.as_mut() {
            let ev_data = EventData::congestion_state_updated(old_state, new_state, trigger);
            qlog.add_event_data(self.clock.now(), ev_data).ok();
        }
    }

    /// Write a RecoveryMetricsUpdated event if any metric is updated.
    fn qlog_recovery_metrics_updated(&mut self) {
        let qlog = match self.qlog.as_mut() {
            Some(qlog) => qlog,
            None => return,
        };

        let mut updated = false;

        let mut min_rtt = None;
        if self.last_metrics.min_rtt != self.tcb.min_rtt && self.tcb.min_rtt != Duration::MAX {
            self.last_metrics.min_rtt = self.tcb.min_rtt;
            min_rtt = Some(self.tcb.min_rtt.as_secs_f32() * 1000.0);
            updated = true;
        }

        let mut latest_rtt = None;
        if self.last_metrics.latest_rtt != self.tcb.last_rtt {
            self.last_metrics.latest_rtt = self.tcb.last_rtt;
            latest_rtt = Some(self.tcb.last_rtt.as_secs_f32() * 1000.0);
            updated = true;
        }

        let mut congestion_window = None;
        if self.last_metrics.cwnd != self.tcb.cwnd {
            self.last_metrics.cwnd = self.tcb.cwnd;
            congestion_window = Some(self.tcb.cwnd as u64);
            updated = true;
        }

        let mut inflated_congestion_window = None;
        if self.last_metrics.cwnd_infl != self.tcb.cwnd_infl {
            self.last_metrics.cwnd_infl = self.tcb.cwnd_infl;
            inflated_congestion_window = Some(self.tcb.cwnd_infl as u64);
            updated = true;
        }

        let mut bytes_in_flight = None;
        if self.last_metrics.bytes_in_flight != self.tcb.bytes_in_flight {
            self.last_metrics.bytes_in_flight = self.tcb.bytes_in_flight;
            bytes_in_flight = Some(self.tcb.bytes_in_flight as u64);
            updated = true;
        }

        let mut ssthresh = None;
        if self.last_metrics.ssthresh != self.tcb.ssthresh {
            self.last_metrics.ssthresh = self.tcb.ssthresh;
            ssthresh = Some(self.tcb.ssthresh as u64);
            updated = true;
        }

        if !updated {
            return;
        }

        let ev_data = EventData::RecoveryMetricsUpdated {
            min_rtt,
            latest_rtt,
            congestion_window,
            inflated_congestion_window,
            bytes_in_flight,
            ssthresh,
        };
        qlog.add_event_data(self.clock.now(), ev_data).ok();
    }
}

impl Drop for TcpSender {
    fn drop(&mut self) {
        if let Some(qlog) = self.qlog.as_mut() {
            if let Err(e) = qlog.flush() {
                warn!("{} qlog flush failed: {:?}", self.trace_id, e);
            }
        }
    }
}

/// Metrics used for emitting qlog RecoveryMetricsUpdated event.
#[derive(Default)]
struct RecoveryMetrics {
    min_rtt: Duration,
    latest_rtt: Duration,
    cwnd: u32,
    cwnd_infl: u32,
    bytes_in_flight: u32,
    ssthresh: u32,
}
