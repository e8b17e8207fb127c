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

//! TCP Veno.
//!
//! Uses the Vegas backlog estimate on every ACK to classify losses. A loss
//! with a small backlog is taken as random and only cuts the window by 1/5.
//! Once the backlog exceeds `beta`, the window grows every other ACK.
//!
//! See "TCP Veno: TCP Enhancement for Transmission over Wireless Access
//! Networks", C. P. Fu, S. C. Liew, IEEE JSAC, 2003.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::new_reno;
use super::vegas::target_cwnd;
use super::TcpCongestionOps;
use crate::Result;
use crate::TcpCongState;
use crate::TcpSocketState;

/// Veno Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VenoConfig {
    /// Backlog threshold for congestion detection, in segments. Default to
    /// 6.
    beta: u32,
}

impl VenoConfig {
    /// Update beta.
    pub fn set_beta(&mut self, v: u32) -> &mut Self {
        self.beta = v;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Default for VenoConfig {
    fn default() -> Self {
        Self { beta: 6 }
    }
}

/// TCP Veno congestion control.
#[derive(Debug, Clone)]
pub struct Veno {
    config: VenoConfig,

    base_rtt: Duration,
    min_rtt: Duration,
    cnt_rtt: u32,
    doing_veno_now: bool,

    /// Estimated backlog in segments.
    diff: u32,

    /// Whether the next avoidance step grows the window.
    inc: bool,
}

impl Veno {
    pub fn new(config: VenoConfig) -> Self {
        Self {
            config,
            base_rtt: Duration::MAX,
            min_rtt: Duration::MAX,
            cnt_rtt: 0,
            doing_veno_now: true,
            diff: 0,
            inc: true,
        }
    }

    pub fn config(&self) -> &VenoConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut VenoConfig {
        &mut self.config
    }

    /// Estimated backlog of the last update, in segments.
    pub fn diff(&self) -> u32 {
        self.diff
    }
}

impl TcpCongestionOps for Veno {
    fn name(&self) -> &str {
        "TcpVeno"
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
            self.doing_veno_now = true;
            self.min_rtt = Duration::MAX;
            self.cnt_rtt = 0;
        } else {
            self.doing_veno_now = false;
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        // The backlog is kept up to date even when not doing Veno, it is
        // needed to classify the next loss.
        let seg_cwnd = tcb.cwnd_in_segments();
        let target = target_cwnd(seg_cwnd, self.base_rtt, self.min_rtt);
        self.diff = seg_cwnd - target;

        if !self.doing_veno_now {
            new_reno::increase_window(tcb, segments_acked);
            return;
        }

        if self.cnt_rtt <= 2 {
            new_reno::increase_window(tcb, segments_acked);
        } else if tcb.cwnd < tcb.ssthresh {
            new_reno::slow_start(tcb, segments_acked);
        } else if self.diff < self.config.beta {
            // Available bandwidth not fully used.
            new_reno::congestion_avoidance(tcb, segments_acked);
        } else {
            // Fully used, grow every other ACK.
            if self.inc {
                new_reno::congestion_avoidance(tcb, segments_acked);
            }
            self.inc = !self.inc;
        }

        trace!(
            "{} diff={} cwnd={} ssthresh={}",
            self.name(),
            self.diff,
            tcb.cwnd,
            tcb.ssthresh
        );

        self.min_rtt = Duration::MAX;
        self.cnt_rtt = 0;
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        if self.diff < self.config.beta {
            // Random loss, cut by 1/5.
            let ssthresh = (bytes_in_flight as f64 * (4.0 / 5.0)) as u32;
            debug!("{} random loss: diff={}", self.name(), self.diff);
            std::cmp::max(ssthresh, 2 * tcb.segment_size)
        } else {
            new_reno::ss_thresh(tcb, bytes_in_flight)
        }
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
