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

//! TCP-LP: a low priority algorithm.
//!
//! An early congestion indication is inferred when the smoothed one-way
//! delay exceeds 15% of the observed delay range. The window is then halved,
//! or reset to one segment if the previous indication happened within the
//! inference time.
//!
//! See "TCP-LP: A Distributed Algorithm for Low Priority Data Transfer",
//! A. Kuzmanovic, E. Knightly, INFOCOM 2003.

use std::any::Any;
use std::time::Duration;

use enumflags2::bitflags;
use enumflags2::BitFlags;
use log::*;

use super::new_reno;
use super::TcpCongestionOps;
use crate::time::ClockRef;
use crate::TcpSocketState;

/// Delay threshold, in percent of the delay range.
const OWD_THRESHOLD_PERCENT: u32 = 15;

#[bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LpFlags {
    /// The last one-way delay sample is valid.
    ValidOwd = 1 << 0,

    /// The smoothed delay is within the threshold.
    WithinThr = 1 << 1,

    /// The last early congestion indication is within the inference time.
    WithinInf = 1 << 2,
}

/// TCP-LP congestion control.
#[derive(Clone)]
pub struct Lp {
    flags: BitFlags<LpFlags>,

    /// Smoothed one-way delay, scaled by 8.
    s_owd: u32,

    owd_min: u32,
    owd_max: u32,

    /// Reserved maximum, used to drop a single outlier.
    owd_max_rsv: u32,

    /// Time of the last early congestion indication.
    last_drop: Duration,

    /// Inference time.
    inference: Duration,

    clock: ClockRef,
}

impl Lp {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            flags: BitFlags::empty(),
            s_owd: 0,
            owd_min: u32::MAX,
            owd_max: 0,
            owd_max_rsv: 0,
            last_drop: Duration::ZERO,
            inference: Duration::ZERO,
            clock,
        }
    }

    fn owd_calculator(&mut self, tcb: &TcpSocketState) -> u32 {
        let owd = tcb
            .rcv_timestamp_value
            .wrapping_sub(tcb.rcv_timestamp_echo_reply);
        if owd > 0 {
            self.flags.insert(LpFlags::ValidOwd);
        } else {
            self.flags.remove(LpFlags::ValidOwd);
        }
        owd
    }

    fn rtt_sample(&mut self, tcb: &TcpSocketState) {
        let mut mowd = self.owd_calculator(tcb);
        if !self.flags.contains(LpFlags::ValidOwd) {
            return;
        }

        if mowd < self.owd_min {
            self.owd_min = mowd;
        }

        // A single sample above the reserved maximum only moves the
        // reservation.
        if mowd > self.owd_max {
            if mowd > self.owd_max_rsv {
                if self.owd_max_rsv == 0 {
                    self.owd_max = mowd;
                } else {
                    self.owd_max = self.owd_max_rsv;
                }
                self.owd_max_rsv = mowd;
            } else {
                self.owd_max = mowd;
            }
        }

        // s_owd = 7/8 s_owd + 1/8 new
        if self.s_owd != 0 {
            mowd = mowd.wrapping_sub(self.s_owd >> 3);
            self.s_owd = self.s_owd.wrapping_add(mowd);
        } else {
            self.s_owd = mowd << 3;
        }
    }
}

impl TcpCongestionOps for Lp {
    fn name(&self) -> &str {
        "TcpLp"
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, mut segments_acked: u32) {
        if tcb.cwnd < tcb.ssthresh {
            segments_acked = new_reno::slow_start(tcb, segments_acked);
        }

        if tcb.cwnd >= tcb.ssthresh && !self.flags.contains(LpFlags::WithinInf) {
            new_reno::congestion_avoidance(tcb, segments_acked);
        }
    }

    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {
        if !rtt.is_zero() {
            self.rtt_sample(tcb);
        }

        let now = self.clock.now();
        let tsval = Duration::from_millis(tcb.rcv_timestamp_value as u64);
        if now > tsval {
            self.inference = 3 * (now - tsval);
        }

        if !self.last_drop.is_zero() && now.saturating_sub(self.last_drop) < self.inference {
            self.flags.insert(LpFlags::WithinInf);
        } else {
            self.flags.remove(LpFlags::WithinInf);
        }

        let thresh = self.owd_min.wrapping_add(
            OWD_THRESHOLD_PERCENT.wrapping_mul(self.owd_max.wrapping_sub(self.owd_min)) / 100,
        );
        if self.s_owd >> 3 <= thresh {
            self.flags.insert(LpFlags::WithinThr);
        } else {
            self.flags.remove(LpFlags::WithinThr);
        }

        if self.flags.contains(LpFlags::WithinThr) {
            return;
        }

        self.owd_min = self.s_owd >> 3;
        self.owd_max = self.s_owd >> 2;
        self.owd_max_rsv = self.s_owd >> 2;

        if self.flags.contains(LpFlags::WithinInf) {
            tcb.cwnd = tcb.segment_size;
        } else {
            tcb.cwnd = std::cmp::max(tcb.cwnd >> 1, tcb.segment_size);
        }
        self.last_drop = now;

        debug!(
            "{} early congestion: s_owd={} within_inference={} cwnd={}",
            self.name(),
            self.s_owd >> 3,
            self.flags.contains(LpFlags::WithinInf),
            tcb.cwnd
        );
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
