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

//! TCP Vegas.
//!
//! Once per RTT the expected window `cwnd * base_rtt / min_rtt` is compared
//! with the actual window. Their difference `diff` estimates the number of
//! segments queued at the bottleneck:
//!
//! - in slow start, `diff > gamma` exits to congestion avoidance at the
//!   expected window;
//! - in congestion avoidance, the window shrinks by one segment when
//!   `diff > beta` and grows by one segment when `diff < alpha`.
//!
//! Delay sampling is only active in the open state.
//!
//! See "TCP Vegas: New Techniques for Congestion Detection and Avoidance",
//! L. Brakmo, S. O'Malley, L. Peterson, SIGCOMM 1994.

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

/// Vegas Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VegasConfig {
    /// Lower bound of queued segments, default to 2.
    alpha: u32,

    /// Upper bound of queued segments, default to 4.
    beta: u32,

    /// Queued segments that end slow start, default to 1.
    gamma: u32,
}

impl VegasConfig {
    /// Update alpha. It must not exceed beta.
    pub fn set_alpha(&mut self, v: u32) -> Result<&mut Self> {
        if v > self.beta {
            return Err(Error::InvalidConfig(format!(
                "vegas alpha {} above beta {}",
                v, self.beta
            )));
        }
        self.alpha = v;
        Ok(self)
    }

    /// Update beta. It must not be below alpha.
    pub fn set_beta(&mut self, v: u32) -> Result<&mut Self> {
        if v < self.alpha {
            return Err(Error::InvalidConfig(format!(
                "vegas beta {} below alpha {}",
                v, self.alpha
            )));
        }
        self.beta = v;
        Ok(self)
    }

    /// Update gamma.
    pub fn set_gamma(&mut self, v: u32) -> &mut Self {
        self.gamma = v;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.alpha > self.beta {
            return Err(Error::InvalidConfig(format!(
                "vegas alpha {} above beta {}",
                self.alpha, self.beta
            )));
        }
        Ok(())
    }
}

impl Default for VegasConfig {
    fn default() -> Self {
        Self {
            alpha: 2,
            beta: 4,
            gamma: 1,
        }
    }
}

/// Return the expected window in segments, truncated.
///
/// Panics if the expected window exceeds the actual one, which means
/// `base_rtt > min_rtt`.
pub(crate) fn target_cwnd(seg_cwnd: u32, base_rtt: Duration, min_rtt: Duration) -> u32 {
    let tmp = base_rtt.as_secs_f64() / min_rtt.as_secs_f64();
    let target = (seg_cwnd as f64 * tmp) as u32;
    assert!(
        seg_cwnd >= target,
        "expected window {} above actual window {}",
        target,
        seg_cwnd
    );
    target
}

/// TCP Vegas congestion control.
#[derive(Debug, Clone)]
pub struct Vegas {
    config: VegasConfig,

    /// Minimum RTT over the connection.
    base_rtt: Duration,

    /// Minimum RTT in the current round.
    min_rtt: Duration,

    /// Number of RTT samples in the current round.
    cnt_rtt: u32,

    /// Whether delay sampling is active.
    doing_vegas_now: bool,

    /// Right edge of the current round.
    beg_snd_nxt: SequenceNumber32,
}

impl Vegas {
    pub fn new(config: VegasConfig) -> Self {
        Self {
            config,
            base_rtt: Duration::MAX,
            min_rtt: Duration::MAX,
            cnt_rtt: 0,
            doing_vegas_now: true,
            beg_snd_nxt: SequenceNumber32::default(),
        }
    }

    pub fn config(&self) -> &VegasConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut VegasConfig {
        &mut self.config
    }

    /// Whether delay sampling is active, only in the open state.
    pub fn doing_vegas_now(&self) -> bool {
        self.doing_vegas_now
    }

    fn enable_vegas(&mut self, tcb: &TcpSocketState) {
        self.doing_vegas_now = true;
        self.beg_snd_nxt = tcb.next_tx_sequence;
        self.cnt_rtt = 0;
        self.min_rtt = Duration::MAX;
    }

    fn disable_vegas(&mut self) {
        self.doing_vegas_now = false;
    }

    /// Window adjustment at the end of a round with enough samples.
    fn adjust_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        let mut seg_cwnd = tcb.cwnd_in_segments();
        let target = target_cwnd(seg_cwnd, self.base_rtt, self.min_rtt);
        let diff = seg_cwnd - target;

        if diff > self.config.gamma && tcb.cwnd < tcb.ssthresh {
            // Too much queueing in slow start, go to congestion avoidance at
            // the expected window.
            seg_cwnd = std::cmp::min(seg_cwnd, target + 1);
            tcb.cwnd = seg_cwnd * tcb.segment_size;
            tcb.ssthresh = self.get_ss_thresh(tcb, 0);
        } else if tcb.cwnd < tcb.ssthresh {
            new_reno::slow_start(tcb, segments_acked);
        } else {
            if diff > self.config.beta {
                seg_cwnd -= 1;
                tcb.ssthresh = self.get_ss_thresh(tcb, 0);
            } else if diff < self.config.alpha {
                seg_cwnd += 1;
            }
            tcb.cwnd = seg_cwnd * tcb.segment_size;
        }

        tcb.ssthresh = std::cmp::max(tcb.ssthresh, (3 * tcb.cwnd as u64 / 4) as u32);

        trace!(
            "{} round: diff={} cwnd={} ssthresh={}",
            self.name(),
            diff,
            tcb.cwnd,
            tcb.ssthresh
        );
    }
}

impl TcpCongestionOps for Vegas {
    fn name(&self) -> &str {
        "TcpVegas"
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
            self.enable_vegas(tcb);
        } else {
            self.disable_vegas();
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if !self.doing_vegas_now {
            new_reno::increase_window(tcb, segments_acked);
            return;
        }

        if tcb.last_acked_seq >= self.beg_snd_nxt {
            // One round has finished.
            self.beg_snd_nxt = tcb.next_tx_sequence;

            if self.cnt_rtt <= 2 {
                // Not enough samples to trust min_rtt.
                new_reno::increase_window(tcb, segments_acked);
            } else {
                self.adjust_window(tcb, segments_acked);
            }

            self.cnt_rtt = 0;
            self.min_rtt = Duration::MAX;
        } else if tcb.cwnd < tcb.ssthresh {
            new_reno::slow_start(tcb, segments_acked);
        }
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        std::cmp::max(
            std::cmp::min(tcb.ssthresh, tcb.cwnd.wrapping_sub(tcb.segment_size)),
            2 * tcb.segment_size,
        )
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
