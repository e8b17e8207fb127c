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

//! Proportional Rate Reduction, see RFC 6937.
//!
//! While the data in flight is above the slow start threshold, PRR sends
//! `ssthresh / recovery_flight_size` bytes per byte delivered, spreading the
//! window reduction over a whole round trip. Once below the threshold, the
//! reduction bound limits how fast the window may grow back to it:
//!
//! - CRB (conservative): no more than the bytes delivered.
//! - SSRB (slow start): the bytes delivered plus one segment per ACK.

use core::str::FromStr;
use std::any::Any;

use log::*;
use serde::Deserialize;

use super::TcpRecoveryOps;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;

/// Reduction bound used once the data in flight is at or below the slow
/// start threshold.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum ReductionBound {
    /// Conservative Reduction Bound.
    Crb,

    /// Slow Start Reduction Bound.
    #[default]
    Ssrb,
}

impl FromStr for ReductionBound {
    type Err = Error;

    fn from_str(bound: &str) -> Result<ReductionBound> {
        if bound.eq_ignore_ascii_case("crb") {
            Ok(ReductionBound::Crb)
        } else if bound.eq_ignore_ascii_case("ssrb") {
            Ok(ReductionBound::Ssrb)
        } else {
            Err(Error::InvalidConfig(format!("reduction bound {}", bound)))
        }
    }
}

impl<'de> serde::Deserialize<'de> for ReductionBound {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ReductionBound::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// PRR Configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrrConfig {
    /// Default to SSRB.
    reduction_bound: ReductionBound,
}

impl PrrConfig {
    pub fn new(reduction_bound: ReductionBound) -> Self {
        Self { reduction_bound }
    }

    pub fn reduction_bound(&self) -> ReductionBound {
        self.reduction_bound
    }

    pub fn set_reduction_bound(&mut self, v: ReductionBound) -> &mut Self {
        self.reduction_bound = v;
        self
    }
}

/// PRR fast recovery.
#[derive(Debug, Clone, Default)]
pub struct PrrRecovery {
    config: PrrConfig,

    /// Bytes delivered to the receiver in this recovery episode.
    prr_delivered: u64,

    /// Bytes sent in this recovery episode.
    prr_out: u64,

    /// Outstanding data when the episode started.
    recovery_flight_size: u32,

    /// SACKed bytes reported by the previous ACK.
    previous_sacked_bytes: u32,
}

impl PrrRecovery {
    pub fn new(config: PrrConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PrrConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PrrConfig {
        &mut self.config
    }

    pub fn prr_delivered(&self) -> u64 {
        self.prr_delivered
    }

    pub fn prr_out(&self) -> u64 {
        self.prr_out
    }
}

impl TcpRecoveryOps for PrrRecovery {
    fn name(&self) -> &str {
        "TcpPrrRecovery"
    }

    fn enter_recovery(
        &mut self,
        tcb: &mut TcpSocketState,
        dup_ack_count: u32,
        unack_data_count: u32,
        last_sacked_bytes: u32,
    ) {
        self.prr_out = 0;
        self.prr_delivered = 0;
        self.recovery_flight_size = unack_data_count;
        self.previous_sacked_bytes = last_sacked_bytes;

        debug!(
            "{} enter: recovery_flight_size={} ssthresh={}",
            self.name(),
            self.recovery_flight_size,
            tcb.ssthresh
        );
        self.do_recovery(tcb, 0, last_sacked_bytes);
    }

    fn do_recovery(&mut self, tcb: &mut TcpSocketState, last_acked_bytes: u32, last_sacked_bytes: u32) {
        // The SACKed count may shrink when SACKed data is cumulatively
        // acknowledged, the delivered bytes are clamped at zero.
        let change_in_sacked = last_sacked_bytes as i64 - self.previous_sacked_bytes as i64;
        let delivered = std::cmp::max(last_acked_bytes as i64 + change_in_sacked, 0);
        self.previous_sacked_bytes = last_sacked_bytes;
        self.prr_delivered += delivered as u64;

        let bytes_in_flight = tcb.bytes_in_flight as i64;
        let ssthresh = tcb.ssthresh as i64;
        let prr_delivered = self.prr_delivered as i64;
        let prr_out = self.prr_out as i64;
        let segment_size = tcb.segment_size as i64;

        let mut send_count = if bytes_in_flight > ssthresh {
            assert!(
                self.recovery_flight_size > 0,
                "do_recovery called before enter_recovery"
            );
            let target = (prr_delivered as f64 * ssthresh as f64
                / self.recovery_flight_size as f64)
                .ceil() as i64;
            target - prr_out
        } else {
            let limit = match self.config.reduction_bound {
                ReductionBound::Crb => prr_delivered - prr_out,
                ReductionBound::Ssrb => {
                    std::cmp::max(prr_delivered - prr_out, delivered) + segment_size
                }
            };
            std::cmp::min(limit, ssthresh - bytes_in_flight)
        };

        // Force a fast retransmit upon entering recovery.
        send_count = std::cmp::max(send_count, if prr_out > 0 { 0 } else { segment_size });

        let cwnd = (bytes_in_flight + send_count).clamp(0, u32::MAX as i64);
        tcb.cwnd = cwnd as u32;
        tcb.cwnd_infl = tcb.cwnd;

        trace!(
            "{} delivered={} prr_delivered={} prr_out={} send_count={} cwnd={}",
            self.name(),
            delivered,
            self.prr_delivered,
            self.prr_out,
            send_count,
            tcb.cwnd
        );
    }

    fn exit_recovery(&mut self, tcb: &mut TcpSocketState) {
        tcb.cwnd = tcb.ssthresh;
        tcb.cwnd_infl = tcb.ssthresh;
        debug!(
            "{} exit: cwnd={} prr_delivered={} prr_out={}",
            self.name(),
            tcb.cwnd,
            self.prr_delivered,
            self.prr_out
        );
    }

    fn update_bytes_sent(&mut self, bytes_sent: u32) {
        self.prr_out += bytes_sent as u64;
    }

    fn fork(&self) -> Box<dyn TcpRecoveryOps> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb(bytes_in_flight: u32, ssthresh: u32) -> TcpSocketState {
        let mut tcb = TcpSocketState::new(500, 20, ssthresh);
        tcb.bytes_in_flight = bytes_in_flight;
        tcb
    }

    #[test]
    fn prr_config() {
        assert_eq!(PrrConfig::default().reduction_bound(), ReductionBound::Ssrb);
        assert_eq!(ReductionBound::from_str("CRB"), Ok(ReductionBound::Crb));
        assert_eq!(ReductionBound::from_str("ssrb"), Ok(ReductionBound::Ssrb));
        assert!(ReductionBound::from_str("prr").is_err());

        let mut config = PrrConfig::default();
        config.set_reduction_bound(ReductionBound::Crb);
        assert_eq!(config, PrrConfig::new(ReductionBound::Crb));
    }

    #[test]
    fn prr_entry_forces_one_segment() {
        for bound in [ReductionBound::Crb, ReductionBound::Ssrb] {
            for (bytes_in_flight, ssthresh) in [(10000, 5000), (4000, 5000), (5000, 5000)] {
                let mut tcb = tcb(bytes_in_flight, ssthresh);
                let mut prr = PrrRecovery::new(PrrConfig::new(bound));
                prr.enter_recovery(&mut tcb, 3, bytes_in_flight, 0);
                assert!(tcb.cwnd >= bytes_in_flight + 500);
                assert_eq!(tcb.cwnd, tcb.cwnd_infl);
            }
        }
    }

    #[test]
    fn prr_proportional() {
        let mut tcb = tcb(10000, 5000);
        let mut prr = PrrRecovery::new(PrrConfig::default());
        prr.enter_recovery(&mut tcb, 3, 10000, 0);
        assert_eq!(tcb.cwnd, 10500);
        prr.update_bytes_sent(500);

        // One segment delivered: ceil(500 * 5000 / 10000) - 500 < 0, nothing
        // more may be sent.
        tcb.bytes_in_flight = 10000;
        prr.do_recovery(&mut tcb, 500, 0);
        assert_eq!(prr.prr_delivered(), 500);
        assert_eq!(tcb.cwnd, 10000);

        // Two more delivered: ceil(1500 * 0.5) - 500 = 250.
        tcb.bytes_in_flight = 9000;
        prr.do_recovery(&mut tcb, 1000, 0);
        assert_eq!(tcb.cwnd, 9250);
    }

    #[test]
    fn prr_sacked_delta() {
        let mut tcb = tcb(10000, 5000);
        let mut prr = PrrRecovery::new(PrrConfig::default());
        prr.enter_recovery(&mut tcb, 3, 10000, 1500);
        assert_eq!(prr.prr_delivered(), 0);

        prr.do_recovery(&mut tcb, 0, 2000);
        assert_eq!(prr.prr_delivered(), 500);

        // SACKed bytes cumulatively acknowledged, nothing new delivered.
        prr.do_recovery(&mut tcb, 1000, 500);
        assert_eq!(prr.prr_delivered(), 500);

        // Negative delta is clamped at zero.
        prr.do_recovery(&mut tcb, 0, 0);
        assert_eq!(prr.prr_delivered(), 500);
    }

    #[test]
    fn prr_reduction_bound() {
        // Below ssthresh, after one segment sent.
        let mut crb_tcb = tcb(4000, 5000);
        let mut crb = PrrRecovery::new(PrrConfig::new(ReductionBound::Crb));
        crb.enter_recovery(&mut crb_tcb, 3, 4000, 0);
        crb.update_bytes_sent(500);

        let mut ssrb_tcb = tcb(4000, 5000);
        let mut ssrb = PrrRecovery::new(PrrConfig::new(ReductionBound::Ssrb));
        ssrb.enter_recovery(&mut ssrb_tcb, 3, 4000, 0);
        ssrb.update_bytes_sent(500);

        // CRB: 1000 - 500 = 500
        crb.do_recovery(&mut crb_tcb, 1000, 0);
        assert_eq!(crb_tcb.cwnd, 4500);

        // SSRB: max(500, 1000) + 500 = 1500, capped at 5000 - 4000
        ssrb.do_recovery(&mut ssrb_tcb, 1000, 0);
        assert_eq!(ssrb_tcb.cwnd, 5000);
    }

    #[test]
    fn prr_exit() {
        let mut tcb = tcb(10000, 5000);
        let mut prr = PrrRecovery::new(PrrConfig::default());
        prr.enter_recovery(&mut tcb, 3, 10000, 0);
        prr.exit_recovery(&mut tcb);
        assert_eq!(tcb.cwnd, 5000);
        assert_eq!(tcb.cwnd_infl, 5000);
    }

    #[test]
    fn prr_fork() {
        let mut prr = PrrRecovery::new(PrrConfig::new(ReductionBound::Crb));
        let mut tcb = tcb(10000, 5000);
        prr.enter_recovery(&mut tcb, 3, 10000, 0);
        prr.update_bytes_sent(500);

        let forked = prr.fork();
        prr.update_bytes_sent(500);
        let forked = forked
            .as_any()
            .downcast_ref::<PrrRecovery>()
            .expect("prr recovery");
        assert_eq!(forked.prr_out(), 500);
        assert_eq!(prr.prr_out(), 1000);
        assert_eq!(forked.config().reduction_bound(), ReductionBound::Crb);
    }

    #[test]
    #[should_panic]
    fn prr_do_recovery_before_enter() {
        let mut tcb = tcb(10000, 5000);
        let mut prr = PrrRecovery::new(PrrConfig::default());
        prr.do_recovery(&mut tcb, 500, 0);
    }
}
