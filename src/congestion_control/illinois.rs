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

//! TCP-Illinois.
//!
//! A loss based algorithm using queueing delay to adjust the pace of window
//! change: `alpha` is large far from congestion and small close to it, while
//! `beta` is small when the delay is low and large when it is high.
//!
//! See "TCP-Illinois: A loss- and delay-based congestion control algorithm
//! for high-speed networks", S. Liu, T. Basar, R. Srikant, 2008.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::new_reno;
use super::TcpCongestionOps;
use crate::Error;
use crate::Result;
use crate::SequenceNumber32;
use crate::TcpCongState;
use crate::TcpSocketState;

/// Illinois Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IllinoisConfig {
    /// Minimum alpha threshold, default to 0.3.
    alpha_min: f64,

    /// Maximum alpha threshold, default to 10.0.
    alpha_max: f64,

    /// Alpha used below `win_thresh`, default to 1.0.
    alpha_base: f64,

    /// Minimum beta threshold, default to 0.125.
    beta_min: f64,

    /// Maximum beta threshold, default to 0.5.
    beta_max: f64,

    /// Beta used below `win_thresh`, default to 0.5.
    beta_base: f64,

    /// Window threshold for adaptive control, in segments. Default to 15.
    win_thresh: u32,

    /// Number of RTTs with low delay before alpha is reset to its maximum,
    /// default to 5.
    theta: u32,
}

impl IllinoisConfig {
    /// Update the minimum alpha. It must be positive.
    pub fn set_alpha_min(&mut self, v: f64) -> Result<&mut Self> {
        if !(v > 0.0) {
            return Err(Error::InvalidConfig(format!("illinois alpha_min {}", v)));
        }
        self.alpha_min = v;
        Ok(self)
    }

    /// Update the maximum alpha. It must be positive.
    pub fn set_alpha_max(&mut self, v: f64) -> Result<&mut Self> {
        if !(v > 0.0) {
            return Err(Error::InvalidConfig(format!("illinois alpha_max {}", v)));
        }
        self.alpha_max = v;
        Ok(self)
    }

    /// Update the base alpha. It must be positive.
    pub fn set_alpha_base(&mut self, v: f64) -> Result<&mut Self> {
        if !(v > 0.0) {
            return Err(Error::InvalidConfig(format!("illinois alpha_base {}", v)));
        }
        self.alpha_base = v;
        Ok(self)
    }

    /// Update the minimum beta. It must be in [0, 1).
    pub fn set_beta_min(&mut self, v: f64) -> Result<&mut Self> {
        self.beta_min = Self::check_beta("beta_min", v)?;
        Ok(self)
    }

    /// Update the maximum beta. It must be in [0, 1).
    pub fn set_beta_max(&mut self, v: f64) -> Result<&mut Self> {
        self.beta_max = Self::check_beta("beta_max", v)?;
        Ok(self)
    }

    /// Update the base beta. It must be in [0, 1).
    pub fn set_beta_base(&mut self, v: f64) -> Result<&mut Self> {
        self.beta_base = Self::check_beta("beta_base", v)?;
        Ok(self)
    }

    /// Update the window threshold.
    pub fn set_win_thresh(&mut self, v: u32) -> &mut Self {
        self.win_thresh = v;
        self
    }

    /// Update theta.
    pub fn set_theta(&mut self, v: u32) -> &mut Self {
        self.theta = v;
        self
    }

    fn check_beta(name: &str, v: f64) -> Result<f64> {
        if !(0.0..1.0).contains(&v) {
            return Err(Error::InvalidConfig(format!("illinois {} {}", name, v)));
        }
        Ok(v)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone()
            .set_alpha_min(self.alpha_min)?
            .set_alpha_max(self.alpha_max)?
            .set_alpha_base(self.alpha_base)?
            .set_beta_min(self.beta_min)?
            .set_beta_max(self.beta_max)?
            .set_beta_base(self.beta_base)?;
        Ok(())
    }
}

impl Default for IllinoisConfig {
    fn default() -> Self {
        Self {
            alpha_min: 0.3,
            alpha_max: 10.0,
            alpha_base: 1.0,
            beta_min: 0.125,
            beta_max: 0.5,
            beta_base: 0.5,
            win_thresh: 15,
            theta: 5,
        }
    }
}

/// TCP-Illinois congestion control.
#[derive(Debug, Clone)]
pub struct Illinois {
    config: IllinoisConfig,

    /// Sum of RTT samples in the current round.
    sum_rtt: Duration,

    /// Number of RTT samples in the current round.
    cnt_rtt: u32,

    /// Minimum RTT observed.
    base_rtt: Duration,

    /// Maximum RTT observed.
    max_rtt: Duration,

    /// Right edge of the current round.
    end_seq: SequenceNumber32,

    /// Whether the average delay was above d1 in a recent round.
    rtt_above: bool,

    /// Number of consecutive rounds with an average delay below d1.
    rtt_low: u32,

    /// ACK credit in segments.
    ack_cnt: u32,

    alpha: f64,
    beta: f64,
}

impl Illinois {
    pub fn new(config: IllinoisConfig) -> Self {
        let alpha = config.alpha_max;
        let beta = config.beta_base;
        Self {
            config,
            sum_rtt: Duration::ZERO,
            cnt_rtt: 0,
            base_rtt: Duration::MAX,
            max_rtt: Duration::ZERO,
            end_seq: SequenceNumber32::default(),
            rtt_above: false,
            rtt_low: 0,
            ack_cnt: 0,
            alpha,
            beta,
        }
    }

    pub fn config(&self) -> &IllinoisConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut IllinoisConfig {
        &mut self.config
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Maximum queueing delay in milliseconds.
    fn max_delay_ms(&self) -> f64 {
        self.max_rtt.saturating_sub(self.base_rtt).as_millis() as f64
    }

    /// Average queueing delay in milliseconds.
    fn avg_delay_ms(&self) -> f64 {
        (self.sum_rtt / self.cnt_rtt)
            .saturating_sub(self.base_rtt)
            .as_millis() as f64
    }

    fn recalc_param(&mut self, seg_cwnd: u32) {
        if seg_cwnd < self.config.win_thresh {
            self.alpha = self.config.alpha_base;
            self.beta = self.config.beta_base;
        } else if self.cnt_rtt > 0 {
            let dm = self.max_delay_ms();
            let da = self.avg_delay_ms();
            self.calculate_alpha(da, dm);
            self.calculate_beta(da, dm);
        }

        trace!(
            "{} recalc: seg_cwnd={} alpha={} beta={}",
            self.name(),
            seg_cwnd,
            self.alpha,
            self.beta
        );
    }

    fn calculate_alpha(&mut self, mut da: f64, mut dm: f64) {
        let alpha_min = self.config.alpha_min;
        let alpha_max = self.config.alpha_max;
        let d1 = dm / 100.0;

        if da <= d1 {
            // Low delay, go back to the maximum after theta rounds.
            if !self.rtt_above {
                self.alpha = alpha_max;
            } else {
                self.rtt_low += 1;
                if self.rtt_low >= self.config.theta {
                    self.rtt_low = 0;
                    self.rtt_above = false;
                    self.alpha = alpha_max;
                }
            }
        } else {
            self.rtt_above = true;
            dm -= d1;
            da -= d1;
            self.alpha = (dm * alpha_max) / (dm + (da * (alpha_max - alpha_min)) / alpha_min);
        }
    }

    fn calculate_beta(&mut self, da: f64, dm: f64) {
        let beta_min = self.config.beta_min;
        let beta_max = self.config.beta_max;
        let d2 = dm / 10.0;
        let d3 = (8.0 * dm) / 10.0;

        self.beta = if da <= d2 {
            beta_min
        } else if da > d2 && da < d3 {
            (beta_min * d3 - beta_max * d2 + (beta_max - beta_min) * da) / (d3 - d2)
        } else {
            beta_max
        };
    }

    /// Start a new round ending at the next sequence to send.
    fn reset(&mut self, tcb: &TcpSocketState) {
        self.end_seq = tcb.next_tx_sequence;
        self.cnt_rtt = 0;
        self.sum_rtt = Duration::ZERO;
    }
}

impl TcpCongestionOps for Illinois {
    fn name(&self) -> &str {
        "TcpIllinois"
    }

    fn congestion_state_set(&mut self, tcb: &TcpSocketState, new_state: TcpCongState) {
        if new_state == TcpCongState::Loss {
            self.alpha = self.config.alpha_base;
            self.beta = self.config.beta_base;
            self.rtt_low = 0;
            self.rtt_above = false;
            self.reset(tcb);
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if tcb.last_acked_seq >= self.end_seq {
            self.recalc_param(tcb.cwnd_in_segments());
            self.reset(tcb);
        }

        if tcb.cwnd < tcb.ssthresh {
            new_reno::slow_start(tcb, segments_acked);
            return;
        }

        let mut seg_cwnd = tcb.cwnd_in_segments();
        let old_cwnd = seg_cwnd;
        if seg_cwnd == 0 {
            return;
        }

        if segments_acked > 0 {
            self.ack_cnt = (self.ack_cnt as f64 + segments_acked as f64 * self.alpha) as u32;
        }

        while self.ack_cnt >= seg_cwnd {
            self.ack_cnt -= seg_cwnd;
            seg_cwnd += 1;
        }

        if seg_cwnd != old_cwnd {
            tcb.cwnd = seg_cwnd * tcb.segment_size;
            trace!(
                "{} congestion avoidance: cwnd={} alpha={}",
                self.name(),
                tcb.cwnd,
                self.alpha
            );
        }
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if rtt.is_zero() {
            return;
        }

        self.base_rtt = self.base_rtt.min(rtt);
        self.max_rtt = self.max_rtt.max(rtt);
        self.cnt_rtt += 1;
        self.sum_rtt += rtt;
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let seg_bytes_in_flight = bytes_in_flight / tcb.segment_size;
        let ssthresh = ((1.0 - self.beta) * seg_bytes_in_flight as f64).max(2.0) as u32;
        debug!(
            "{} loss: beta={} ssthresh={} segments",
            self.name(),
            self.beta,
            ssthresh
        );
        ssthresh * tcb.segment_size
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

    fn sample(illinois: &mut Illinois, tcb: &mut TcpSocketState, rtts: &[u64]) {
        for rtt in rtts {
            illinois.pkts_acked(tcb, 1, Duration::from_millis(*rtt));
        }
    }

    #[test]
    fn illinois_config() -> Result<()> {
        let mut config = IllinoisConfig::default();
        assert!(config.set_alpha_min(0.0).is_err());
        assert!(config.set_beta_max(1.0).is_err());
        assert!(config.set_beta_min(-0.1).is_err());
        assert_eq!(config, IllinoisConfig::default());

        config.set_alpha_max(8.0)?.set_beta_min(0.2)?.set_theta(3);
        assert_eq!(config.alpha_max, 8.0);
        assert_eq!(config.beta_min, 0.2);
        assert_eq!(config.theta, 3);
        Ok(())
    }

    #[test]
    fn illinois_base_params_below_win_thresh() {
        let mut tcb = TcpSocketState::new(500, 10, 500);
        let mut illinois = Illinois::new(IllinoisConfig::default());
        assert_eq!(illinois.alpha(), 10.0);
        assert_eq!(illinois.beta(), 0.5);

        sample(&mut illinois, &mut tcb, &[100, 200]);
        illinois.increase_window(&mut tcb, 1);
        assert_eq!(illinois.alpha(), 1.0);
        assert_eq!(illinois.beta(), 0.5);
    }

    #[test]
    fn illinois_recalc_param() {
        let mut tcb = TcpSocketState::new(500, 20, 500);
        let mut illinois = Illinois::new(IllinoisConfig::default());

        // dm = 100ms, da = 50ms.
        sample(&mut illinois, &mut tcb, &[100, 200, 150]);
        illinois.recalc_param(tcb.cwnd_in_segments());

        // d1 = 1: alpha = 99 * 10 / (99 + 49 * 9.7 / 0.3)
        let alpha = 990.0 / (99.0 + 49.0 * 9.7 / 0.3);
        assert!((illinois.alpha() - alpha).abs() < 1e-9);
        assert!(illinois.rtt_above);

        // d2 = 10, d3 = 80: linear between beta_min and beta_max.
        let beta = (0.125 * 80.0 - 0.5 * 10.0 + 0.375 * 50.0) / 70.0;
        assert!((illinois.beta() - beta).abs() < 1e-9);
    }

    #[test]
    fn illinois_alpha_recovers_after_theta_rounds() {
        let mut illinois = Illinois::new(IllinoisConfig::default());
        illinois.calculate_alpha(50.0, 100.0);
        let alpha = illinois.alpha();
        assert!(alpha < 10.0);

        for _ in 0..4 {
            illinois.calculate_alpha(0.5, 100.0);
            assert_eq!(illinois.alpha(), alpha);
        }
        illinois.calculate_alpha(0.5, 100.0);
        assert_eq!(illinois.alpha(), 10.0);
        assert!(!illinois.rtt_above);
    }

    #[test]
    fn illinois_beta_regions() {
        let mut illinois = Illinois::new(IllinoisConfig::default());
        illinois.calculate_beta(5.0, 100.0);
        assert_eq!(illinois.beta(), 0.125);
        illinois.calculate_beta(90.0, 100.0);
        assert_eq!(illinois.beta(), 0.5);
    }

    #[test]
    fn illinois_congestion_avoidance() {
        let mut tcb = TcpSocketState::new(500, 20, 500);
        let mut illinois = Illinois::new(IllinoisConfig::default());

        // First call opens a round with no samples, alpha stays at 10.
        tcb.next_tx_sequence = SequenceNumber32::new(100000);
        illinois.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 20 * 500);
        assert_eq!(illinois.ack_cnt, 10);

        illinois.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 21 * 500);
        assert_eq!(illinois.ack_cnt, 0);
    }

    #[test]
    fn illinois_loss_resets() {
        let mut tcb = TcpSocketState::new(500, 20, 500);
        let mut illinois = Illinois::new(IllinoisConfig::default());
        illinois.calculate_alpha(50.0, 100.0);
        sample(&mut illinois, &mut tcb, &[100]);

        illinois.congestion_state_set(&tcb, TcpCongState::Loss);
        assert_eq!(illinois.alpha(), 1.0);
        assert_eq!(illinois.beta(), 0.5);
        assert!(!illinois.rtt_above);
        assert_eq!(illinois.cnt_rtt, 0);

        // ssthresh = max(2, 0.5 * 40) segments
        assert_eq!(illinois.get_ss_thresh(&tcb, 40 * 500), 20 * 500);
        assert_eq!(illinois.get_ss_thresh(&tcb, 500), 2 * 500);
    }
}
