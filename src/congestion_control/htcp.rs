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

//! H-TCP congestion control.
//!
//! The additive increase `alpha` grows with the time elapsed since the last
//! congestion event, once it exceeds `delta_l`. The backoff `beta` is the
//! ratio of the minimum to the maximum RTT, unless the throughput changed
//! too much since the previous congestion epoch.
//!
//! See "H-TCP: TCP for high-speed and long-distance networks",
//! D. Leith, R. Shorten, PFLDnet 2004, and
//! <https://datatracker.ietf.org/doc/html/draft-leith-tcp-htcp-06>.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::TcpCongestionOps;
use crate::time::ClockRef;
use crate::Error;
use crate::Result;
use crate::TcpCongState;
use crate::TcpSocketState;

/// Htcp Configuration.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HtcpConfig {
    /// Backoff factor used when the throughput changed too much, default to
    /// 0.5.
    default_backoff: f64,

    /// Throughput change ratio above which the default backoff is used,
    /// default to 0.2.
    throughput_ratio: f64,

    /// Time since the last congestion event after which alpha starts to
    /// grow, default to 1s.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    delta_l: Duration,
}

impl HtcpConfig {
    /// Update the default backoff. It must be in [0, 1].
    pub fn set_default_backoff(&mut self, v: f64) -> Result<&mut Self> {
        if !(0.0..=1.0).contains(&v) {
            return Err(Error::InvalidConfig(format!("htcp default_backoff {}", v)));
        }
        self.default_backoff = v;
        Ok(self)
    }

    /// Update the throughput ratio. It must be in [0, 1].
    pub fn set_throughput_ratio(&mut self, v: f64) -> Result<&mut Self> {
        if !(0.0..=1.0).contains(&v) {
            return Err(Error::InvalidConfig(format!("htcp throughput_ratio {}", v)));
        }
        self.throughput_ratio = v;
        Ok(self)
    }

    /// Update delta_l.
    pub fn set_delta_l(&mut self, v: Duration) -> &mut Self {
        self.delta_l = v;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone()
            .set_default_backoff(self.default_backoff)?
            .set_throughput_ratio(self.throughput_ratio)?;
        Ok(())
    }
}

impl Default for HtcpConfig {
    fn default() -> Self {
        Self {
            default_backoff: 0.5,
            throughput_ratio: 0.2,
            delta_l: Duration::from_secs(1),
        }
    }
}

/// H-TCP congestion control.
#[derive(Clone)]
pub struct Htcp {
    config: HtcpConfig,

    /// Additive increase factor.
    alpha: f64,

    /// Multiplicative decrease factor.
    beta: f64,

    /// Time of the last congestion event.
    last_con: Duration,

    /// Minimum RTT in the current congestion epoch.
    min_rtt: Duration,

    /// Maximum RTT in the current congestion epoch.
    max_rtt: Duration,

    /// Throughput in the current congestion epoch, in bytes per second.
    throughput: u32,

    /// Throughput of the previous congestion epoch, in bytes per second.
    last_throughput: u32,

    /// Bytes acked in the current congestion epoch.
    data_sent: u32,

    clock: ClockRef,
}

impl Htcp {
    pub fn new(config: HtcpConfig, clock: ClockRef) -> Self {
        Self {
            config,
            alpha: 0.0,
            beta: 0.0,
            last_con: Duration::ZERO,
            min_rtt: Duration::MAX,
            max_rtt: Duration::ZERO,
            throughput: 0,
            last_throughput: 0,
            data_sent: 0,
            clock,
        }
    }

    pub fn config(&self) -> &HtcpConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut HtcpConfig {
        &mut self.config
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn update_alpha(&mut self) {
        let delta = self.clock.now().saturating_sub(self.last_con);
        self.alpha = if delta <= self.config.delta_l {
            1.0
        } else {
            let diff = (delta - self.config.delta_l).as_secs_f64();
            1.0 + 10.0 * diff + 0.25 * (diff * diff)
        };

        // Keep the average throughput of the flow on backoff.
        self.alpha = 2.0 * (1.0 - self.beta) * self.alpha;
        if self.alpha < 1.0 {
            self.alpha = 1.0;
        }
    }

    fn update_beta(&mut self) {
        self.beta = self.config.default_backoff;

        if self.throughput > self.last_throughput && self.last_throughput > 0 {
            let diff = self.throughput - self.last_throughput;
            if ((diff / self.last_throughput) as f64) <= self.config.throughput_ratio
                && !self.max_rtt.is_zero()
            {
                self.beta = self.min_rtt.as_secs_f64() / self.max_rtt.as_secs_f64();
            }
        }
    }

    fn congestion_avoidance(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if segments_acked > 0 {
            let seg = tcb.segment_size as f64;
            let cwnd = tcb.cwnd as f64;
            let adder = ((seg * seg + cwnd * self.alpha) / cwnd).max(1.0);
            tcb.cwnd = tcb.cwnd.saturating_add(adder as u32);
            trace!(
                "{} congestion avoidance: cwnd={} alpha={}",
                self.name(),
                tcb.cwnd,
                self.alpha
            );
        }
    }
}

impl TcpCongestionOps for Htcp {
    fn name(&self) -> &str {
        "TcpHtcp"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            segments_acked = super::new_reno::slow_start(tcb, segments_acked);
        }

        if tcb.cwnd >= tcb.ssthresh {
            self.congestion_avoidance(tcb, segments_acked);
        }
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if rtt.is_zero() {
            return;
        }

        if tcb.cong_state == TcpCongState::Open {
            self.data_sent = self
                .data_sent
                .saturating_add(segments_acked * tcb.segment_size);
        }

        let elapsed = self.clock.now().saturating_sub(self.last_con);
        if !elapsed.is_zero() {
            self.throughput = (self.data_sent as f64 / elapsed.as_secs_f64()) as u32;
        }

        self.update_alpha();
        self.min_rtt = self.min_rtt.min(rtt);
        self.max_rtt = self.max_rtt.max(rtt);
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        self.last_con = self.clock.now();

        self.update_beta();
        self.update_alpha();

        let seg_win = 2 * tcb.segment_size;
        let b_flight = (bytes_in_flight as f64 * self.beta) as u32;
        let ssthresh = std::cmp::max(seg_win, b_flight);

        debug!(
            "{} loss: beta={} alpha={} throughput={} ssthresh={}",
            self.name(),
            self.beta,
            self.alpha,
            self.throughput,
            ssthresh
        );

        self.min_rtt = Duration::MAX;
        self.max_rtt = Duration::ZERO;
        self.last_throughput = self.throughput;
        self.throughput = 0;
        self.data_sent = 0;

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
    use crate::time::SimClock;

    #[test]
    fn htcp_config() {
        let mut config = HtcpConfig::default();
        assert!(config.set_default_backoff(1.5).is_err());
        assert!(config.set_throughput_ratio(-0.5).is_err());
        assert_eq!(config, HtcpConfig::default());

        config.set_delta_l(Duration::from_millis(500));
        assert_eq!(config.delta_l, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn htcp_alpha_ramp() {
        let clock = SimClock::new();
        let mut htcp = Htcp::new(HtcpConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(1000, 10, 5000);

        // Within delta_l, alpha is 2 * (1 - beta) with beta still 0.
        clock.advance(Duration::from_millis(500));
        htcp.pkts_acked(&mut tcb, 1, Duration::from_millis(100));
        assert_eq!(htcp.alpha(), 2.0);

        // Two seconds past delta_l: 1 + 20 + 1 = 22.
        clock.set(Duration::from_secs(3));
        htcp.pkts_acked(&mut tcb, 1, Duration::from_millis(100));
        assert_eq!(htcp.alpha(), 44.0);
    }

    #[test]
    fn htcp_congestion_avoidance() {
        let clock = SimClock::new();
        let mut htcp = Htcp::new(HtcpConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(1000, 10, 5000);

        clock.advance(Duration::from_millis(200));
        htcp.pkts_acked(&mut tcb, 1, Duration::from_millis(100));
        assert_eq!(htcp.alpha(), 2.0);

        // (1000^2 + 10000 * 2) / 10000 = 102
        htcp.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 10102);
    }

    #[test]
    fn htcp_ss_thresh() {
        let clock = SimClock::new();
        let mut htcp = Htcp::new(HtcpConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(1000, 10, 5000);

        clock.advance(Duration::from_secs(1));
        htcp.pkts_acked(&mut tcb, 10, Duration::from_millis(100));
        htcp.pkts_acked(&mut tcb, 10, Duration::from_millis(200));
        assert_eq!(htcp.throughput, 20000);

        // No previous epoch, default backoff.
        let ssthresh = htcp.get_ss_thresh(&tcb, 10000);
        assert_eq!(htcp.beta(), 0.5);
        assert_eq!(ssthresh, 5000);
        assert_eq!(htcp.last_throughput, 20000);
        assert_eq!(htcp.data_sent, 0);
        assert_eq!(htcp.min_rtt, Duration::MAX);

        // Similar throughput in the next epoch, beta follows the RTT ratio.
        clock.advance(Duration::from_secs(1));
        htcp.pkts_acked(&mut tcb, 11, Duration::from_millis(100));
        htcp.pkts_acked(&mut tcb, 11, Duration::from_millis(125));
        assert_eq!(htcp.throughput, 22000);

        let ssthresh = htcp.get_ss_thresh(&tcb, 10000);
        assert_eq!(htcp.beta(), 0.8);
        assert_eq!(ssthresh, 8000);

        // Small windows keep two segments.
        assert_eq!(htcp.get_ss_thresh(&tcb, 1000), 2000);
    }
}
