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

//! Scalable TCP.
//!
//! See "Scalable TCP: Improving Performance in Highspeed Wide Area
//! Networks", T. Kelly, ACM SIGCOMM CCR, 2003.

use std::any::Any;

use log::*;
use serde::Deserialize;

use super::new_reno;
use super::TcpCongestionOps;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;

/// Scalable Configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScalableConfig {
    /// Additive increase factor: one segment of growth per `ai_factor` ACKs
    /// once the window exceeds it. Default to 50.
    ai_factor: u32,

    /// Multiplicative decrease factor, default to 0.125.
    md_factor: f64,
}

impl ScalableConfig {
    pub fn new(ai_factor: u32, md_factor: f64) -> Result<Self> {
        let mut config = Self::default();
        config.set_ai_factor(ai_factor)?.set_md_factor(md_factor)?;
        Ok(config)
    }

    /// Default decrease with the given increase factor, raised to 1 if zero.
    pub(crate) fn with_ai_factor(ai_factor: u32) -> Self {
        Self {
            ai_factor: ai_factor.max(1),
            ..Self::default()
        }
    }

    /// Update the additive increase factor. It must be positive.
    pub fn set_ai_factor(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("scalable ai_factor 0".into()));
        }
        self.ai_factor = v;
        Ok(self)
    }

    /// Update the multiplicative decrease factor. It must be in [0, 1).
    pub fn set_md_factor(&mut self, v: f64) -> Result<&mut Self> {
        if !(0.0..1.0).contains(&v) {
            return Err(Error::InvalidConfig(format!("scalable md_factor {}", v)));
        }
        self.md_factor = v;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        Self::new(self.ai_factor, self.md_factor).map(|_| ())
    }
}

impl Default for ScalableConfig {
    fn default() -> Self {
        Self {
            ai_factor: 50,
            md_factor: 0.125,
        }
    }
}

/// Scalable TCP congestion control.
#[derive(Debug, Clone)]
pub struct Scalable {
    config: ScalableConfig,

    /// ACKs not yet turned into window growth.
    ack_cnt: u32,
}

impl Scalable {
    pub fn new(config: ScalableConfig) -> Self {
        Self { config, ack_cnt: 0 }
    }

    pub fn config(&self) -> &ScalableConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ScalableConfig {
        &mut self.config
    }

    fn congestion_avoidance(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        let mut seg_cwnd = tcb.cwnd_in_segments();
        let old_cwnd = seg_cwnd;
        let w = std::cmp::min(seg_cwnd, self.config.ai_factor);
        if w == 0 {
            return;
        }

        self.ack_cnt += segments_acked;
        if self.ack_cnt >= w {
            let delta = self.ack_cnt / w;
            self.ack_cnt -= delta * w;
            seg_cwnd += delta;
        }

        if seg_cwnd != old_cwnd {
            tcb.cwnd = seg_cwnd * tcb.segment_size;
            trace!(
                "{} congestion avoidance: cwnd={} ack_cnt={}",
                self.name(),
                tcb.cwnd,
                self.ack_cnt
            );
        }
    }
}

impl TcpCongestionOps for Scalable {
    fn name(&self) -> &str {
        "TcpScalable"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            segments_acked = new_reno::slow_start(tcb, segments_acked);
        }

        if tcb.cwnd >= tcb.ssthresh {
            self.congestion_avoidance(tcb, segments_acked);
        }
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        let seg_cwnd = bytes_in_flight / tcb.segment_size;
        let b = 1.0 - self.config.md_factor;
        let ssthresh = (seg_cwnd as f64 * b).max(2.0) as u32;
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

    #[test]
    fn scalable_config() {
        assert!(ScalableConfig::new(0, 0.125).is_err());
        assert!(ScalableConfig::new(50, 1.0).is_err());
        assert!(ScalableConfig::new(50, -0.1).is_err());

        let mut config = ScalableConfig::default();
        assert!(config.set_md_factor(2.0).is_err());
        assert_eq!(config.md_factor, 0.125);
    }

    #[test]
    fn scalable_decrement() {
        let tcb = TcpSocketState::new(536, 100, u32::MAX);
        let mut scalable = Scalable::new(ScalableConfig::default());

        let ssthresh = scalable.get_ss_thresh(&tcb, tcb.cwnd);
        assert_eq!(ssthresh, 87 * 536);

        assert_eq!(scalable.get_ss_thresh(&tcb, 536), 2 * 536);
    }

    #[test]
    fn scalable_increment() {
        let mut tcb = TcpSocketState::new(536, 10, 536);
        let mut scalable = Scalable::new(ScalableConfig::default());

        // Below ai_factor, one segment per window of ACKs.
        scalable.increase_window(&mut tcb, 9);
        assert_eq!(tcb.cwnd, 10 * 536);
        scalable.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 11 * 536);

        // Above ai_factor, one segment per ai_factor ACKs.
        tcb.cwnd = 100 * 536;
        scalable.increase_window(&mut tcb, 120);
        assert_eq!(tcb.cwnd, 102 * 536);
        assert_eq!(scalable.ack_cnt, 20);
    }
}
