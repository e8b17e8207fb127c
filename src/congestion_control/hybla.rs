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

//! TCP Hybla.
//!
//! The window growth of a connection is normalized by `rho`, the ratio of its
//! RTT to a reference RTT, so that long RTT connections (satellite links)
//! grow as fast per unit of time as a reference connection.
//!
//! See "TCP Hybla: a TCP enhancement for heterogeneous networks",
//! C. Caini, R. Firrincieli, International Journal of Satellite
//! Communications and Networking, 2004.

use std::any::Any;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::new_reno;
use super::TcpCongestionOps;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;

/// Hybla Configuration.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HyblaConfig {
    /// Reference RTT, default to 50ms.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    rrtt: Duration,
}

impl HyblaConfig {
    /// Update the reference RTT. It must be at least one millisecond.
    pub fn set_rrtt(&mut self, v: Duration) -> Result<&mut Self> {
        if v.as_millis() == 0 {
            return Err(Error::InvalidConfig(format!("hybla rrtt {:?}", v)));
        }
        self.rrtt = v;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone().set_rrtt(self.rrtt)?;
        Ok(())
    }
}

impl Default for HyblaConfig {
    fn default() -> Self {
        Self {
            rrtt: Duration::from_millis(50),
        }
    }
}

/// TCP Hybla congestion control.
#[derive(Debug, Clone)]
pub struct Hybla {
    config: HyblaConfig,

    /// Ratio of the minimum RTT to the reference RTT, at least 1.
    rho: f64,

    /// Fractional window increase not applied yet, in segments.
    cwnd_cnt: f64,
}

impl Hybla {
    pub fn new(config: HyblaConfig) -> Self {
        Self {
            config,
            rho: 1.0,
            cwnd_cnt: 0.0,
        }
    }

    pub fn config(&self) -> &HyblaConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut HyblaConfig {
        &mut self.config
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    fn recalc_param(&mut self, tcb: &TcpSocketState) {
        let min_rtt_ms = tcb.min_rtt.as_millis() as f64;
        let rrtt_ms = self.config.rrtt.as_millis() as f64;
        self.rho = (min_rtt_ms / rrtt_ms).max(1.0);
        trace!("{} rho={}", self.name(), self.rho);
    }

    fn slow_start(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) -> u32 {
        if segments_acked >= 1 {
            let increment = 2f64.powf(self.rho) - 1.0;
            let incr = (increment * tcb.segment_size as f64) as u32;
            tcb.cwnd = std::cmp::min(tcb.cwnd.saturating_add(incr), tcb.ssthresh);
            trace!(
                "{} slow start: cwnd={} ssthresh={}",
                self.name(),
                tcb.cwnd,
                tcb.ssthresh
            );
            return segments_acked - 1;
        }

        0
    }

    fn congestion_avoidance(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        for _ in 0..segments_acked {
            self.cwnd_cnt += self.rho.powi(2) / tcb.cwnd_in_segments() as f64;
        }

        if self.cwnd_cnt >= 1.0 {
            let inc = self.cwnd_cnt as u32;
            tcb.cwnd = tcb.cwnd.saturating_add(inc * tcb.segment_size);
            self.cwnd_cnt -= inc as f64;
            trace!(
                "{} congestion avoidance: cwnd={} ssthresh={}",
                self.name(),
                tcb.cwnd,
                tcb.ssthresh
            );
        }
    }
}

impl TcpCongestionOps for Hybla {
    fn name(&self) -> &str {
        "TcpHybla"
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if rtt == tcb.min_rtt {
            self.recalc_param(tcb);
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            segments_acked = self.slow_start(tcb, segments_acked);
        }

        if tcb.cwnd >= tcb.ssthresh {
            self.congestion_avoidance(tcb, segments_acked);
        }
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        new_reno::ss_thresh(tcb, bytes_in_flight)
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
    fn hybla_config() {
        let mut config = HyblaConfig::default();
        assert_eq!(config.rrtt, Duration::from_millis(50));

        assert!(config.set_rrtt(Duration::from_micros(10)).is_err());
        assert_eq!(config.rrtt, Duration::from_millis(50));
        assert!(config.set_rrtt(Duration::from_millis(25)).is_ok());
        assert_eq!(config.rrtt, Duration::from_millis(25));
    }

    #[test]
    fn hybla_rho() {
        let mut tcb = TcpSocketState::new(500, 1, u32::MAX);
        let mut hybla = Hybla::new(HyblaConfig::default());
        assert_eq!(hybla.rho(), 1.0);

        // Only a sample equal to the minimum updates rho.
        tcb.update_rtt(Duration::from_millis(200));
        hybla.pkts_acked(&mut tcb, 1, Duration::from_millis(300));
        assert_eq!(hybla.rho(), 1.0);
        hybla.pkts_acked(&mut tcb, 1, Duration::from_millis(200));
        assert_eq!(hybla.rho(), 4.0);

        // Short RTTs never go below 1.
        tcb.update_rtt(Duration::from_millis(10));
        hybla.pkts_acked(&mut tcb, 1, Duration::from_millis(10));
        assert_eq!(hybla.rho(), 1.0);
    }

    #[test]
    fn hybla_slow_start() {
        let mut tcb = TcpSocketState::new(500, 1, 20000);
        let mut hybla = Hybla::new(HyblaConfig::default());

        tcb.update_rtt(Duration::from_millis(100));
        hybla.pkts_acked(&mut tcb, 1, Duration::from_millis(100));
        assert_eq!(hybla.rho(), 2.0);

        // (2^2 - 1) segments per ACK.
        hybla.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 500 + 3 * 500);

        // Capped at ssthresh.
        tcb.cwnd = 19000;
        hybla.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 20000);
    }

    #[test]
    fn hybla_congestion_avoidance() {
        let mut tcb = TcpSocketState::new(500, 10, 500);
        let mut hybla = Hybla::new(HyblaConfig::default());

        tcb.update_rtt(Duration::from_millis(100));
        hybla.pkts_acked(&mut tcb, 1, Duration::from_millis(100));

        // rho^2 / 10 = 0.4 segment per ACK.
        hybla.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 5000);
        hybla.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 5500);
        assert!(hybla.cwnd_cnt < 0.21 && hybla.cwnd_cnt > 0.19);
    }
}
