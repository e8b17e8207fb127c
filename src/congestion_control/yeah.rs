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

//! YeAH-TCP: Yet Another Highspeed TCP.
//!
//! Two modes are switched once per RTT from the estimated queue backlog
//! `queue` and the network congestion level `L = queueing delay / base RTT`:
//!
//! - Fast mode: the window grows with the Scalable TCP rule.
//! - Slow mode: the window grows like NewReno, and is reduced by the backlog
//!   when it exceeds `alpha` (precautionary decongestion).
//!
//! `reno_count` estimates the window of a competing Reno flow and bounds
//! the decongestion. On loss, the reduction is the last backlog unless the
//! flow has been in slow mode for `rho` consecutive RTTs.
//!
//! See "YeAH-TCP: Yet Another Highspeed TCP", A. Baiocchi, A. P.
//! Castellani, F. Vacirca, PFLDnet 2007.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::new_reno;
use super::Scalable;
use super::ScalableConfig;
use super::TcpCongestionOps;
use crate::Error;
use crate::Result;
use crate::SequenceNumber32;
use crate::TcpCongState;
use crate::TcpSocketState;

/// Upper bound of the consecutive slow mode RTT counter.
const MAX_DOING_RENO_NOW: u32 = 0xffffff;

/// Lower bound of `reno_count`, in segments.
const MIN_RENO_COUNT: u32 = 2;

/// Yeah Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct YeahConfig {
    /// Maximum backlog in segments, default to 80.
    alpha: u32,

    /// Fraction of the backlog removed by decongestion, as a divisor.
    /// Default to 1.
    gamma: u32,

    /// Log2 of the minimum fraction of the window removed on loss. Default
    /// to 3.
    delta: u32,

    /// Log2 of the maximum fraction of the window removed by decongestion.
    /// Default to 1.
    epsilon: u32,

    /// Inverse of the maximum congestion level. Default to 8.
    phy: u32,

    /// Slow mode RTTs after which losses are handled like Reno. Default to
    /// 16.
    rho: u32,

    /// Fast mode RTTs after which `reno_count` is reset. Default to 50.
    zeta: u32,

    /// Additive increase factor of the fast mode. Default to 100.
    stcp_ai_factor: u32,
}

impl YeahConfig {
    /// Update alpha.
    pub fn set_alpha(&mut self, v: u32) -> &mut Self {
        self.alpha = v;
        self
    }

    /// Update gamma. It must be positive.
    pub fn set_gamma(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("yeah gamma 0".into()));
        }
        self.gamma = v;
        Ok(self)
    }

    /// Update delta. It must be below 32.
    pub fn set_delta(&mut self, v: u32) -> Result<&mut Self> {
        if v >= u32::BITS {
            return Err(Error::InvalidConfig(format!("yeah delta {}", v)));
        }
        self.delta = v;
        Ok(self)
    }

    /// Update epsilon. It must be below 32.
    pub fn set_epsilon(&mut self, v: u32) -> Result<&mut Self> {
        if v >= u32::BITS {
            return Err(Error::InvalidConfig(format!("yeah epsilon {}", v)));
        }
        self.epsilon = v;
        Ok(self)
    }

    /// Update phy. It must be positive.
    pub fn set_phy(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("yeah phy 0".into()));
        }
        self.phy = v;
        Ok(self)
    }

    /// Update rho.
    pub fn set_rho(&mut self, v: u32) -> &mut Self {
        self.rho = v;
        self
    }

    /// Update zeta.
    pub fn set_zeta(&mut self, v: u32) -> &mut Self {
        self.zeta = v;
        self
    }

    /// Update the fast mode additive increase factor. It must be positive.
    pub fn set_stcp_ai_factor(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("yeah stcp_ai_factor 0".into()));
        }
        self.stcp_ai_factor = v;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone()
            .set_gamma(self.gamma)?
            .set_delta(self.delta)?
            .set_epsilon(self.epsilon)?
            .set_phy(self.phy)?
            .set_stcp_ai_factor(self.stcp_ai_factor)?;
        Ok(())
    }
}

impl Default for YeahConfig {
    fn default() -> Self {
        Self {
            alpha: 80,
            gamma: 1,
            delta: 3,
            epsilon: 1,
            phy: 8,
            rho: 16,
            zeta: 50,
            stcp_ai_factor: 100,
        }
    }
}

/// YeAH-TCP congestion control.
#[derive(Debug, Clone)]
pub struct Yeah {
    config: YeahConfig,

    /// Fast mode increase rule.
    stcp: Scalable,

    base_rtt: Duration,
    min_rtt: Duration,
    cnt_rtt: u32,
    doing_yeah_now: bool,

    /// Right edge of the current round.
    beg_snd_nxt: SequenceNumber32,

    /// Backlog of the last round, in segments.
    last_q: u32,

    /// Consecutive RTTs in slow mode.
    doing_reno_now: u32,

    /// Estimated window of a competing Reno flow, in segments.
    reno_count: u32,

    /// Consecutive RTTs in fast mode.
    fast_count: u32,
}

impl Yeah {
    pub fn new(config: YeahConfig) -> Self {
        let stcp = Scalable::new(ScalableConfig::with_ai_factor(config.stcp_ai_factor));
        Self {
            config,
            stcp,
            base_rtt: Duration::MAX,
            min_rtt: Duration::MAX,
            cnt_rtt: 0,
            doing_yeah_now: true,
            beg_snd_nxt: SequenceNumber32::default(),
            last_q: 0,
            doing_reno_now: 0,
            reno_count: MIN_RENO_COUNT,
            fast_count: 0,
        }
    }

    pub fn config(&self) -> &YeahConfig {
        &self.config
    }

    /// Whether the last round selected the slow mode.
    pub fn in_slow_mode(&self) -> bool {
        self.doing_reno_now > 0
    }

    /// Mode selection and decongestion at the end of a round.
    fn update_mode(&mut self, tcb: &mut TcpSocketState) {
        let rtt_queue = self.min_rtt.saturating_sub(self.base_rtt).as_secs_f64();
        let bw = tcb.cwnd_in_segments() as f64 / self.min_rtt.as_secs_f64();
        let queue = (bw * rtt_queue) as u32;
        let l = rtt_queue / self.base_rtt.as_secs_f64();

        // Float threshold as in Linux, integer 1 / phy would always be 0.
        if queue > self.config.alpha || l > 1.0 / self.config.phy as f64 {
            // Slow mode.
            let mut seg_cwnd = tcb.cwnd_in_segments();
            if queue > self.config.alpha && seg_cwnd > self.reno_count {
                // Precautionary decongestion.
                let reduction = std::cmp::min(
                    queue / self.config.gamma,
                    seg_cwnd >> self.config.epsilon,
                );
                seg_cwnd -= reduction;
                seg_cwnd = std::cmp::max(seg_cwnd, self.reno_count);
                tcb.cwnd = seg_cwnd * tcb.segment_size;
                tcb.ssthresh = tcb.cwnd;
                debug!(
                    "{} decongestion: queue={} reduction={} cwnd={}",
                    self.name(),
                    queue,
                    reduction,
                    tcb.cwnd
                );
            }

            if self.reno_count <= MIN_RENO_COUNT {
                self.reno_count = std::cmp::max(tcb.cwnd_in_segments() >> 1, MIN_RENO_COUNT);
            } else {
                self.reno_count += 1;
            }

            self.doing_reno_now = std::cmp::min(self.doing_reno_now + 1, MAX_DOING_RENO_NOW);
        } else {
            // Fast mode.
            self.fast_count += 1;
            if self.fast_count > self.config.zeta {
                self.reno_count = MIN_RENO_COUNT;
                self.fast_count = 0;
            }
            self.doing_reno_now = 0;
        }

        self.last_q = queue;

        trace!(
            "{} round: queue={} L={} reno_count={} doing_reno_now={}",
            self.name(),
            queue,
            l,
            self.reno_count,
            self.doing_reno_now
        );
    }
}

impl TcpCongestionOps for Yeah {
    fn name(&self) -> &str {
        "TcpYeah"
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if rtt.is_zero() {
            return;
        }

        self.min_rtt = self.min_rtt.min(rtt);
        self.base_rtt = self.base_rtt.min(rtt);
        self.cnt_rtt += 1;
    }

    fn congestion_state_set(&mut self, tcb: &TcpSocketState, new_state: TcpCongState) {
        if new_state == TcpCongState::Open {
            self.doing_yeah_now = true;
            self.beg_snd_nxt = tcb.next_tx_sequence;
            self.cnt_rtt = 0;
            self.min_rtt = Duration::MAX;
        } else {
            self.doing_yeah_now = false;
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            new_reno::slow_start(tcb, segments_acked);
        } else if self.doing_reno_now == 0 {
            self.stcp.increase_window(tcb, segments_acked);
        } else {
            new_reno::congestion_avoidance(tcb, segments_acked);
        }

        // Mode selection only runs in the open state.
        if self.doing_yeah_now && tcb.last_acked_seq >= self.beg_snd_nxt {
            // At least one of the samples is not from a delayed ACK.
            if self.cnt_rtt > 2 {
                self.update_mode(tcb);
            }

            self.beg_snd_nxt = tcb.next_tx_sequence;
            self.cnt_rtt = 0;
            self.min_rtt = Duration::MAX;
        }
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let seg_bytes_in_flight = bytes_in_flight / tcb.segment_size;
        let half = std::cmp::max(seg_bytes_in_flight >> 1, MIN_RENO_COUNT);

        let reduction = if self.doing_reno_now < self.config.rho {
            // Not competing with Reno flows.
            let reduction = std::cmp::min(self.last_q, half);
            std::cmp::max(reduction, seg_bytes_in_flight >> self.config.delta)
        } else {
            half
        };

        self.fast_count = 0;
        self.reno_count = std::cmp::max(self.reno_count >> 1, MIN_RENO_COUNT);

        let ssthresh = std::cmp::max(
            bytes_in_flight.saturating_sub(reduction * tcb.segment_size),
            2 * tcb.segment_size,
        );
        debug!(
            "{} loss: reduction={} ssthresh={}",
            self.name(),
            reduction,
            ssthresh
        );
        ssthresh
    }

    fn fork(&self) -> Box<dyn TcpCongestionOps> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(yeah: &mut Yeah, tcb: &mut TcpSocketState, base: u64, rtts: &[u64]) {
        yeah.base_rtt = Duration::from_millis(base);
        for rtt in rtts {
            yeah.pkts_acked(tcb, 1, Duration::from_millis(*rtt));
        }
        tcb.last_acked_seq += tcb.cwnd;
        tcb.next_tx_sequence = tcb.last_acked_seq + tcb.cwnd;
    }

    #[test]
    fn yeah_config() -> Result<()> {
        let mut config = YeahConfig::default();
        assert!(config.set_gamma(0).is_err());
        assert!(config.set_phy(0).is_err());
        assert!(config.set_delta(32).is_err());
        assert!(config.set_epsilon(40).is_err());
        assert!(config.set_stcp_ai_factor(0).is_err());
        assert_eq!(config, YeahConfig::default());

        config.set_alpha(40).set_rho(8).set_zeta(10);
        config.set_stcp_ai_factor(50)?;
        let yeah = Yeah::new(config);
        assert_eq!(yeah.stcp.config(), &ScalableConfig::with_ai_factor(50));
        Ok(())
    }

    #[test]
    fn yeah_fast_mode() {
        let mut tcb = TcpSocketState::new(1000, 200, 1000);
        let mut yeah = Yeah::new(YeahConfig::default());

        // No queueing delay, fast mode grows by the Scalable rule: one
        // segment per 100 ACKs.
        round(&mut yeah, &mut tcb, 100, &[100, 100, 100]);
        yeah.increase_window(&mut tcb, 100);
        assert_eq!(tcb.cwnd, 201 * 1000);
        assert!(!yeah.in_slow_mode());
        assert_eq!(yeah.fast_count, 1);
        assert_eq!(yeah.last_q, 0);
    }

    #[test]
    fn yeah_slow_mode_decongestion() {
        let mut tcb = TcpSocketState::new(1000, 200, 1000);
        let mut yeah = Yeah::new(YeahConfig::default());

        // queue = 200 / 0.25 * 0.15 = 120 > alpha.
        round(&mut yeah, &mut tcb, 100, &[250, 250, 250]);
        yeah.increase_window(&mut tcb, 1);

        // reduction = min(120, 200 >> 1) = 100
        assert_eq!(tcb.cwnd, 100 * 1000);
        assert_eq!(tcb.ssthresh, 100 * 1000);
        assert!(yeah.in_slow_mode());
        assert_eq!(yeah.reno_count, 50);
        assert!(yeah.last_q > yeah.config().alpha);

        // Slow mode grows like NewReno.
        yeah.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 100 * 1000 + 10);
    }

    #[test]
    fn yeah_congestion_level_only() {
        let mut tcb = TcpSocketState::new(1000, 20, 1000);
        let mut yeah = Yeah::new(YeahConfig::default());

        // queue = 20 / 0.15 * 0.05 = 6, L = 0.5 > 1/8: slow mode without
        // decongestion.
        round(&mut yeah, &mut tcb, 100, &[150, 150, 150]);
        yeah.increase_window(&mut tcb, 1);
        assert!(yeah.in_slow_mode());
        assert_eq!(tcb.cwnd, 20 * 1000);
        assert_eq!(yeah.reno_count, 10);

        // Next slow round, reno_count grows by one.
        round(&mut yeah, &mut tcb, 100, &[150, 150, 150]);
        yeah.increase_window(&mut tcb, 1);
        assert_eq!(yeah.reno_count, 11);
        assert_eq!(yeah.doing_reno_now, 2);
    }

    #[test]
    fn yeah_disabled_outside_open() {
        let mut tcb = TcpSocketState::new(1000, 200, 1000);
        let mut yeah = Yeah::new(YeahConfig::default());

        // Queueing would trigger decongestion, but not in recovery.
        yeah.congestion_state_set(&tcb, TcpCongState::Recovery);
        assert!(!yeah.doing_yeah_now);
        round(&mut yeah, &mut tcb, 100, &[250, 250, 250]);
        yeah.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 200 * 1000);
        assert!(!yeah.in_slow_mode());
        assert_eq!(yeah.last_q, 0);
        assert_eq!(yeah.cnt_rtt, 3);

        yeah.congestion_state_set(&tcb, TcpCongState::Open);
        assert!(yeah.doing_yeah_now);
        assert_eq!(yeah.beg_snd_nxt, tcb.next_tx_sequence);
        assert_eq!(yeah.cnt_rtt, 0);

        round(&mut yeah, &mut tcb, 100, &[250, 250, 250]);
        yeah.increase_window(&mut tcb, 1);
        assert!(yeah.in_slow_mode());
        assert_eq!(tcb.cwnd, 100 * 1000);
    }

    #[test]
    fn yeah_ss_thresh() {
        let tcb = TcpSocketState::new(1000, 100, 1000);
        let mut yeah = Yeah::new(YeahConfig::default());

        // Not competing with Reno: reduction = max(min(last_q, 50), 100 >> 3)
        yeah.last_q = 30;
        assert_eq!(yeah.get_ss_thresh(&tcb, 100 * 1000), 70 * 1000);

        yeah.last_q = 0;
        assert_eq!(yeah.get_ss_thresh(&tcb, 100 * 1000), 88 * 1000);

        // Competing with Reno, halve.
        yeah.doing_reno_now = 16;
        yeah.reno_count = 20;
        assert_eq!(yeah.get_ss_thresh(&tcb, 100 * 1000), 50 * 1000);
        assert_eq!(yeah.reno_count, 10);
        assert_eq!(yeah.fast_count, 0);

        assert_eq!(yeah.get_ss_thresh(&tcb, 1000), 2 * 1000);
    }
}
