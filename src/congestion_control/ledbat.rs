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

//! LEDBAT: Low Extra Delay Background Transport.
//!
//! A scavenger algorithm keeping the one-way queueing delay around a target.
//! The one-way delay is read from the TCP timestamp fields of the control
//! block. Without valid timestamps it falls back to NewReno.
//!
//! See RFC 6817.

use std::any::Any;
use std::time::Duration;

use enumflags2::bitflags;
use enumflags2::BitFlags;
use log::*;
use serde::Deserialize;

use super::new_reno;
use super::TcpCongestionOps;
use crate::time::ClockRef;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;

/// Interval after which a new base delay bucket is started, in seconds.
const BASE_DELAY_ROLLOVER_SECS: u64 = 60;

/// Whether slow start is used before the first delay measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SlowStartMode {
    /// Do NewReno slow start while the window is below ssthresh.
    #[default]
    DoSlowStart,

    /// Never slow start.
    DoNotSlowStart,
}

/// Ledbat Configuration.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedbatConfig {
    /// Target queueing delay, default to 100ms.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    target_delay: Duration,

    /// Number of base delay samples kept, default to 10.
    base_history_len: u32,

    /// Number of current delay samples kept, default to 4.
    noise_filter_len: u32,

    /// Window gain, default to 1.0.
    gain: f64,

    /// Slow start mode, default to `DoSlowStart`.
    ss_param: SlowStartMode,

    /// Minimum window in segments, default to 2.
    min_cwnd: u32,
}

impl LedbatConfig {
    /// Update the target delay. It must be at least one millisecond.
    pub fn set_target_delay(&mut self, v: Duration) -> Result<&mut Self> {
        if v.as_millis() == 0 {
            return Err(Error::InvalidConfig(format!("ledbat target_delay {:?}", v)));
        }
        self.target_delay = v;
        Ok(self)
    }

    /// Update the base history length. It must be positive.
    pub fn set_base_history_len(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("ledbat base_history_len 0".into()));
        }
        self.base_history_len = v;
        Ok(self)
    }

    /// Update the noise filter length. It must be positive.
    pub fn set_noise_filter_len(&mut self, v: u32) -> Result<&mut Self> {
        if v == 0 {
            return Err(Error::InvalidConfig("ledbat noise_filter_len 0".into()));
        }
        self.noise_filter_len = v;
        Ok(self)
    }

    /// Update the gain. It must be positive.
    pub fn set_gain(&mut self, v: f64) -> Result<&mut Self> {
        if !(v > 0.0) {
            return Err(Error::InvalidConfig(format!("ledbat gain {}", v)));
        }
        self.gain = v;
        Ok(self)
    }

    /// Update the slow start mode.
    pub fn set_ss_param(&mut self, v: SlowStartMode) -> &mut Self {
        self.ss_param = v;
        self
    }

    /// Update the minimum window in segments.
    pub fn set_min_cwnd(&mut self, v: u32) -> &mut Self {
        self.min_cwnd = v;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.clone()
            .set_target_delay(self.target_delay)?
            .set_base_history_len(self.base_history_len)?
            .set_noise_filter_len(self.noise_filter_len)?
            .set_gain(self.gain)?;
        Ok(())
    }
}

impl Default for LedbatConfig {
    fn default() -> Self {
        Self {
            target_delay: Duration::from_millis(100),
            base_history_len: 10,
            noise_filter_len: 4,
            gain: 1.0,
            ss_param: SlowStartMode::DoSlowStart,
            min_cwnd: 2,
        }
    }
}

#[bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LedbatFlags {
    /// Slow start is still allowed.
    CanSlowStart = 1 << 0,

    /// The last ACK carried usable timestamps.
    ValidOwd = 1 << 1,
}

/// Bounded history of one-way delays, remembering the index of its minimum.
#[derive(Debug, Clone, Default)]
struct OwdCircBuf {
    buffer: Vec<u32>,
    min: usize,
}

impl OwdCircBuf {
    /// Minimum delay, `u32::MAX` when empty.
    fn min(&self) -> u32 {
        match self.buffer.get(self.min) {
            Some(v) => *v,
            None => u32::MAX,
        }
    }

    fn add(&mut self, owd: u32, max_len: usize) {
        if self.buffer.is_empty() {
            self.buffer.push(owd);
            self.min = 0;
            return;
        }

        self.buffer.push(owd);
        if self.buffer[self.min] > owd {
            self.min = self.buffer.len() - 1;
        }

        if self.buffer.len() >= max_len {
            self.buffer.remove(0);
            self.min = 0;
            for i in 1..self.buffer.len() {
                if self.buffer[i] < self.buffer[self.min] {
                    self.min = i;
                }
            }
        }
    }
}

/// LEDBAT congestion control.
#[derive(Clone)]
pub struct Ledbat {
    config: LedbatConfig,

    /// Base delay history, one bucket per rollover interval.
    base_history: OwdCircBuf,

    /// Recent delay samples.
    noise_filter: OwdCircBuf,

    /// Time of the last base delay rollover, in seconds.
    last_rollover: u64,

    /// Window increment of the last update, in bytes times milliseconds.
    snd_cwnd_cnt: i32,

    flags: BitFlags<LedbatFlags>,

    clock: ClockRef,
}

impl Ledbat {
    pub fn new(config: LedbatConfig, clock: ClockRef) -> Self {
        Self {
            config,
            base_history: OwdCircBuf::default(),
            noise_filter: OwdCircBuf::default(),
            last_rollover: 0,
            snd_cwnd_cnt: 0,
            flags: BitFlags::from(LedbatFlags::CanSlowStart),
            clock,
        }
    }

    pub fn config(&self) -> &LedbatConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut LedbatConfig {
        &mut self.config
    }

    /// Current one-way delay, the minimum of the noise filter.
    pub fn current_delay(&self) -> u32 {
        self.noise_filter.min()
    }

    /// Base one-way delay, the minimum of the base history.
    pub fn base_delay(&self) -> u32 {
        self.base_history.min()
    }

    fn update_base_delay(&mut self, owd: u32) {
        let max_len = self.config.base_history_len as usize;
        if self.base_history.buffer.is_empty() {
            self.base_history.add(owd, max_len);
            return;
        }

        let now = self.clock.now().as_secs();
        if now.saturating_sub(self.last_rollover) > BASE_DELAY_ROLLOVER_SECS {
            self.last_rollover = now;
            self.base_history.add(owd, max_len);
            return;
        }

        // Keep the minimum of the current bucket.
        let last = self.base_history.buffer.len() - 1;
        if owd < self.base_history.buffer[last] {
            self.base_history.buffer[last] = owd;
            if owd < self.base_history.buffer[self.base_history.min] {
                self.base_history.min = last;
            }
        }
    }

    fn congestion_avoidance(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if !self.flags.contains(LedbatFlags::ValidOwd) {
            new_reno::congestion_avoidance(tcb, segments_acked);
            return;
        }

        let target_ms = self.config.target_delay.as_millis() as f64;
        let current_delay = self.current_delay() as u64;
        let base_delay = self.base_delay() as u64;

        let mut offset = if current_delay > base_delay {
            target_ms - (current_delay - base_delay) as f64
        } else {
            target_ms + (base_delay - current_delay) as f64
        };
        offset *= self.config.gain;

        self.snd_cwnd_cnt = (offset * segments_acked as f64 * tcb.segment_size as f64) as i32;
        let inc = self.snd_cwnd_cnt as f64 / (target_ms * tcb.cwnd as f64);
        let mut cwnd = (tcb.cwnd as f64 + inc * tcb.segment_size as f64) as u32;

        let max_cwnd = (tcb.high_tx_mark - tcb.last_acked_seq)
            .saturating_add(segments_acked * tcb.segment_size);
        cwnd = std::cmp::min(cwnd, max_cwnd);
        cwnd = std::cmp::max(cwnd, self.config.min_cwnd * tcb.segment_size);
        tcb.cwnd = cwnd;

        if tcb.cwnd <= tcb.ssthresh {
            tcb.ssthresh = tcb.cwnd.saturating_sub(1);
        }

        trace!(
            "{} congestion avoidance: current_delay={} base_delay={} cwnd={} ssthresh={}",
            self.name(),
            current_delay,
            base_delay,
            tcb.cwnd,
            tcb.ssthresh
        );
    }
}

impl TcpCongestionOps for Ledbat {
    fn name(&self) -> &str {
        "TcpLedbat"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        if tcb.cwnd <= tcb.segment_size {
            self.flags.insert(LedbatFlags::CanSlowStart);
        }

        if self.config.ss_param == SlowStartMode::DoSlowStart
            && tcb.cwnd <= tcb.ssthresh
            && self.flags.contains(LedbatFlags::CanSlowStart)
        {
            new_reno::slow_start(tcb, segments_acked);
        } else {
            self.flags.remove(LedbatFlags::CanSlowStart);
            self.congestion_avoidance(tcb, segments_acked);
        }
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if tcb.rcv_timestamp_value == 0 || tcb.rcv_timestamp_echo_reply == 0 {
            self.flags.remove(LedbatFlags::ValidOwd);
        } else {
            self.flags.insert(LedbatFlags::ValidOwd);
        }

        if !rtt.is_zero() {
            let owd = tcb
                .rcv_timestamp_value
                .wrapping_sub(tcb.rcv_timestamp_echo_reply);
            self.noise_filter
                .add(owd, self.config.noise_filter_len as usize);
            self.update_base_delay(owd);
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
    use crate::time::SimClock;
    use crate::SequenceNumber32;

    fn ack_with_owd(ledbat: &mut Ledbat, tcb: &mut TcpSocketState, tsval: u32, tsecr: u32) {
        tcb.rcv_timestamp_value = tsval;
        tcb.rcv_timestamp_echo_reply = tsecr;
        ledbat.pkts_acked(tcb, 1, Duration::from_millis(100));
    }

    #[test]
    fn ledbat_config() {
        let mut config = LedbatConfig::default();
        assert!(config.set_target_delay(Duration::ZERO).is_err());
        assert!(config.set_base_history_len(0).is_err());
        assert!(config.set_noise_filter_len(0).is_err());
        assert!(config.set_gain(0.0).is_err());
        assert_eq!(config, LedbatConfig::default());

        config.set_ss_param(SlowStartMode::DoNotSlowStart).set_min_cwnd(4);
        assert_eq!(config.ss_param, SlowStartMode::DoNotSlowStart);
        assert_eq!(config.min_cwnd, 4);
    }

    #[test]
    fn ledbat_circular_buffer() {
        let mut buf = OwdCircBuf::default();
        assert_eq!(buf.min(), u32::MAX);

        buf.add(50, 4);
        buf.add(30, 4);
        buf.add(40, 4);
        assert_eq!(buf.min(), 30);

        // Reaching the length drops the oldest sample.
        buf.add(60, 4);
        assert_eq!(buf.buffer, vec![30, 40, 60]);
        assert_eq!(buf.min(), 30);

        buf.add(70, 4);
        assert_eq!(buf.buffer, vec![40, 60, 70]);
        assert_eq!(buf.min(), 40);
    }

    #[test]
    fn ledbat_base_delay_rollover() {
        let clock = SimClock::new();
        let mut ledbat = Ledbat::new(LedbatConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(500, 10, u32::MAX);

        ack_with_owd(&mut ledbat, &mut tcb, 1100, 1000);
        assert_eq!(ledbat.base_delay(), 100);

        // Same bucket keeps the minimum.
        ack_with_owd(&mut ledbat, &mut tcb, 1180, 1100);
        ack_with_owd(&mut ledbat, &mut tcb, 1300, 1150);
        assert_eq!(ledbat.base_history.buffer, vec![80]);
        assert_eq!(ledbat.base_delay(), 80);
        assert_eq!(ledbat.current_delay(), 80);

        // A new bucket after the rollover interval.
        clock.set(Duration::from_secs(61));
        ack_with_owd(&mut ledbat, &mut tcb, 1400, 1250);
        assert_eq!(ledbat.base_history.buffer, vec![80, 150]);
        assert_eq!(ledbat.base_delay(), 80);
    }

    #[test]
    fn ledbat_invalid_timestamps_fall_back() {
        let clock = SimClock::new();
        let mut ledbat = Ledbat::new(LedbatConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(500, 10, 500);

        ack_with_owd(&mut ledbat, &mut tcb, 0, 1000);
        assert!(!ledbat.flags.contains(LedbatFlags::ValidOwd));

        ledbat.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 5000 + 500 * 500 / 5000);
        assert!(!ledbat.flags.contains(LedbatFlags::CanSlowStart));
    }

    #[test]
    fn ledbat_slow_start() {
        let clock = SimClock::new();
        let mut ledbat = Ledbat::new(LedbatConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(500, 2, 5000);

        ledbat.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 1500);

        ledbat
            .config_mut()
            .set_ss_param(SlowStartMode::DoNotSlowStart);
        ledbat.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 1500 + 500 * 500 / 1500);
    }

    #[test]
    fn ledbat_delay_based_growth() {
        let clock = SimClock::new();
        let mut ledbat = Ledbat::new(LedbatConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(500, 10, 500);
        tcb.high_tx_mark = SequenceNumber32::new(100000);

        // No queueing delay: offset is the full target, one segment per
        // window of ACKs.
        ack_with_owd(&mut ledbat, &mut tcb, 1100, 1000);
        ledbat.increase_window(&mut tcb, 10);
        assert_eq!(tcb.cwnd, 5500);
        assert_eq!(tcb.ssthresh, 500);

        // Queueing delay of twice the target shrinks the window by one
        // segment per window of ACKs.
        ack_with_owd(&mut ledbat, &mut tcb, 1350, 1050);
        ack_with_owd(&mut ledbat, &mut tcb, 1350, 1050);
        ack_with_owd(&mut ledbat, &mut tcb, 1350, 1050);
        ack_with_owd(&mut ledbat, &mut tcb, 1350, 1050);
        assert_eq!(ledbat.current_delay(), 300);
        ledbat.increase_window(&mut tcb, 11);
        assert_eq!(tcb.cwnd, 5000);
    }

    #[test]
    fn ledbat_window_bounds() {
        let clock = SimClock::new();
        let mut ledbat = Ledbat::new(LedbatConfig::default(), clock.handle());
        let mut tcb = TcpSocketState::new(500, 10, 5000);

        // Growth is capped by the outstanding data.
        tcb.ssthresh = 500;
        tcb.last_acked_seq = SequenceNumber32::new(1000);
        tcb.high_tx_mark = SequenceNumber32::new(3000);
        ack_with_owd(&mut ledbat, &mut tcb, 1100, 1000);
        ledbat.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 3000);

        // Huge delay cannot push below the minimum window, ssthresh follows.
        for _ in 0..4 {
            ack_with_owd(&mut ledbat, &mut tcb, 100000, 1000);
        }
        tcb.ssthresh = 5000;
        ledbat.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 1000);
        assert_eq!(tcb.ssthresh, 999);
    }
}
