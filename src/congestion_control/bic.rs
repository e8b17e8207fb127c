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

//! BIC: Binary Increase Congestion control.
//!
//! After a loss the window that triggered it is remembered as `last_max_cwnd`.
//! The window then grows toward it by binary search: fast when far below,
//! slowly when close. Above the old maximum it probes with a growth that
//! speeds up again, bounded by `max_incr` segments per RTT.
//!
//! See "Binary Increase Congestion Control (BIC) for Fast Long-Distance
//! Networks", L. Xu, K. Harfoush, I. Rhee, INFOCOM 2004.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::TcpCongestionOps;
use crate::time::ClockRef;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;

/// Upper bound of the ACK count per segment when no loss has been seen yet.
const MAX_CNT_BEFORE_LOSS: u32 = 20;

/// Bic Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BicConfig {
    /// Enable fast convergence, default to true.
    fast_convergence: bool,

    /// Multiplicative window decrease factor, default to 0.8.
    beta: f64,

    /// Limit on the window increase during one RTT, in segments. Default to
    /// 16.
    max_incr: u32,

    /// Lower bound of the window for the BIC laws to apply, in segments.
    /// Below it the algorithm behaves like NewReno. Default to 14.
    low_wnd: u32,

    /// Number of RTTs to go from `last_max_cwnd - b` to `last_max_cwnd`.
    /// Default to 5.
    smooth_part: u32,

    /// Inverse of the binary search step. Default to 4.
    binary_search_coefficient: u8,
}

impl BicConfig {
    /// Enable fast convergence.
    pub fn enable_fast_convergence(&mut self, enable: bool) -> &mut Self {
        self.fast_convergence = enable;
        self
    }

    /// Update beta. It must be in (0, 1].
    pub fn set_beta(&mut self, v: f64) -> Result<&mut Self> {
        if !(v > 0.0 && v <= 1.0) {
            return Err(Error::InvalidConfig(format!("bic beta {}", v)));
        }
        self.beta = v;
        Ok(self)
    }

    /// Update the maximum increment. It must be positive.
    pub fn set_max_incr(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("bic max_incr 0".into()));
        }
        self.max_incr = v;
        Ok(self)
    }

    /// Update the low window threshold.
    pub fn set_low_wnd(&mut self, v: u32) -> &mut Self {
        self.low_wnd = v;
        self
    }

    /// Update the smooth part. It must be positive.
    pub fn set_smooth_part(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("bic smooth_part 0".into()));
        }
        self.smooth_part = v;
        Ok(self)
    }

    /// Update the binary search coefficient. It must be positive.
    pub fn set_binary_search_coefficient(&mut self, v: u8) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("bic binary_search_coefficient 0".into()));
        }
        self.binary_search_coefficient = v;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone()
            .set_beta(self.beta)?
            .set_max_incr(self.max_incr)?
            .set_smooth_part(self.smooth_part)?
            .set_binary_search_coefficient(self.binary_search_coefficient)?;
        Ok(())
    }
}

impl Default for BicConfig {
    fn default() -> Self {
        Self {
            fast_convergence: true,
            beta: 0.8,
            max_incr: 16,
            low_wnd: 14,
            smooth_part: 5,
            binary_search_coefficient: 4,
        }
    }
}

/// BIC congestion control.
#[derive(Clone)]
pub struct Bic {
    /// Configurable parameters.
    config: BicConfig,

    /// ACK counter in segments, reset after each window increase.
    cwnd_cnt: u32,

    /// Window before the last loss, in segments.
    last_max_cwnd: u32,

    /// Window at the last update, in segments.
    last_cwnd: u32,

    /// Start of the current growth epoch. None until the first update after
    /// a loss.
    epoch_start: Option<Duration>,

    clock: ClockRef,
}

impl Bic {
    pub fn new(config: BicConfig, clock: ClockRef) -> Self {
        Self {
            config,
            cwnd_cnt: 0,
            last_max_cwnd: 0,
            last_cwnd: 0,
            epoch_start: None,
            clock,
        }
    }

    pub fn config(&self) -> &BicConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut BicConfig {
        &mut self.config
    }

    /// Return the number of ACKs needed to grow the window by one segment.
    pub(crate) fn update(&mut self, tcb: &TcpSocketState) -> u32 {
        let seg_cwnd = tcb.cwnd_in_segments();
        let b = self.config.binary_search_coefficient as u32;
        let max_incr = self.config.max_incr;
        let smooth_part = self.config.smooth_part;

        self.last_cwnd = seg_cwnd;
        if self.epoch_start.is_none() {
            self.epoch_start = Some(self.clock.now());
        }

        // NewReno compatible region.
        if seg_cwnd < self.config.low_wnd {
            trace!("{} update: low window cnt={}", self.name(), seg_cwnd);
            return seg_cwnd;
        }

        let mut cnt = if seg_cwnd < self.last_max_cwnd {
            // Binary search increase.
            let dist = ((self.last_max_cwnd - seg_cwnd) / b) as f64;
            if dist > max_incr as f64 {
                // Linear increase.
                seg_cwnd / max_incr
            } else if dist <= 1.0 {
                // Smoothed binary search increase.
                seg_cwnd * smooth_part / b
            } else {
                (seg_cwnd as f64 / dist) as u32
            }
        } else if seg_cwnd < self.last_max_cwnd + b {
            // Slow start.
            seg_cwnd * smooth_part / b
        } else if seg_cwnd < self.last_max_cwnd + max_incr * (b - 1) {
            // Slow start.
            seg_cwnd * (b - 1) / (seg_cwnd - self.last_max_cwnd)
        } else {
            // Linear increase.
            seg_cwnd / max_incr
        };

        // Grow fast before the first loss.
        if self.last_max_cwnd == 0 && cnt > MAX_CNT_BEFORE_LOSS {
            cnt = MAX_CNT_BEFORE_LOSS;
        }

        if cnt == 0 {
            cnt = 1;
        }

        trace!(
            "{} update: seg_cwnd={} last_max_cwnd={} cnt={}",
            self.name(),
            seg_cwnd,
            self.last_max_cwnd,
            cnt
        );
        cnt
    }
}

impl TcpCongestionOps for Bic {
    fn name(&self) -> &str {
        "TcpBic"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
            segments_acked = segments_acked.saturating_sub(1);
            trace!(
                "{} slow start: cwnd={} ssthresh={}",
                self.name(),
                tcb.cwnd,
                tcb.ssthresh
            );
        }

        if tcb.cwnd >= tcb.ssthresh && segments_acked > 0 {
            self.cwnd_cnt += segments_acked;
            let cnt = self.update(tcb);

            // Enough ACKs were seen for one segment of growth. The counter is
            // reset, so ACKs beyond cnt are dropped.
            if self.cwnd_cnt > cnt {
                tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
                self.cwnd_cnt = 0;
                trace!(
                    "{} congestion avoidance: cwnd={} ssthresh={}",
                    self.name(),
                    tcb.cwnd,
                    tcb.ssthresh
                );
            }
        }
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let seg_cwnd = tcb.cwnd_in_segments();

        self.epoch_start = None;

        // Release bandwidth to new flows faster.
        if seg_cwnd < self.last_max_cwnd && self.config.fast_convergence {
            self.last_max_cwnd = (self.config.beta * seg_cwnd as f64) as u32;
        } else {
            self.last_max_cwnd = seg_cwnd;
        }

        let ssthresh = if seg_cwnd < self.config.low_wnd {
            std::cmp::max(2 * tcb.segment_size, bytes_in_flight / 2)
        } else {
            ((seg_cwnd as f64 * self.config.beta).max(2.0) * tcb.segment_size as f64) as u32
        };

        debug!(
            "{} loss: seg_cwnd={} last_max_cwnd={} ssthresh={}",
            self.name(),
            seg_cwnd,
            self.last_max_cwnd,
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
