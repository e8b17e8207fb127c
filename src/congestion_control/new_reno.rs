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

//! NewReno congestion control.
//!
//! The slow start and congestion avoidance steps are exposed as free
//! functions, since most delay based algorithms fall back to them.

use std::any::Any;

use log::*;

use super::TcpCongestionOps;
use crate::TcpSocketState;

/// Slow start: grow the window by one segment and consume one acked segment.
///
/// Returns the number of acked segments left over for congestion avoidance.
pub(crate) fn slow_start(tcb: &mut TcpSocketState, segments_acked: u32) -> u32 {
    if segments_acked >= 1 {
        tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
        trace!(
            "slow start: cwnd={} ssthresh={}",
            tcb.cwnd,
            tcb.ssthresh
        );
        return segments_acked - 1;
    }

    0
}

/// Congestion avoidance: grow the window by roughly one segment per window
/// of acked data, and at least one byte per call.
pub(crate) fn congestion_avoidance(tcb: &mut TcpSocketState, segments_acked: u32) {
    if segments_acked > 0 {
        let seg = tcb.segment_size;
        let adder = seg.wrapping_mul(seg) as f64 / tcb.cwnd as f64;
        let adder = adder.max(1.0);
        tcb.cwnd = tcb.cwnd.saturating_add(adder as u32);
        trace!(
            "congestion avoidance: cwnd={} ssthresh={}",
            tcb.cwnd,
            tcb.ssthresh
        );
    }
}

/// Slow start while below the threshold, then congestion avoidance with the
/// remaining acked segments.
pub(crate) fn increase_window(tcb: &mut TcpSocketState, mut segments_acked: u32) {
    if tcb.cwnd < tcb.ssthresh {
        segments_acked = slow_start(tcb, segments_acked);
    }

    if tcb.cwnd >= tcb.ssthresh {
        congestion_avoidance(tcb, segments_acked);
    }
}

/// Half of the data in flight, and at least two segments.
pub(crate) fn ss_thresh(tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
    std::cmp::max(2 * tcb.segment_size, bytes_in_flight / 2)
}

/// NewReno congestion control (RFC 5681, RFC 6582).
#[derive(Debug, Clone, Default)]
pub struct NewReno;

impl NewReno {
    pub fn new() -> Self {
        Self
    }
}

impl TcpCongestionOps for NewReno {
    fn name(&self) -> &str {
        "TcpNewReno"
    }

    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32 {
        ss_thresh(tcb, bytes_in_flight)
    }

    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        increase_window(tcb, segments_acked)
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
    use rand::Rng;

    #[test]
    fn new_reno_slow_start() {
        let mut tcb = TcpSocketState::new(500, 2, 4000);
        let mut cc = NewReno::new();

        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 1500);

        // One segment per call regardless of the acked count.
        cc.increase_window(&mut tcb, 3);
        assert_eq!(tcb.cwnd, 2000);

        // No acked segments, no growth.
        cc.increase_window(&mut tcb, 0);
        assert_eq!(tcb.cwnd, 2000);
    }

    #[test]
    fn new_reno_slow_start_to_avoidance() {
        let mut tcb = TcpSocketState::new(500, 7, 4000);
        let mut cc = NewReno::new();

        // Slow start reaches ssthresh, the remaining ack is used by
        // congestion avoidance.
        cc.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 4000 + 500 * 500 / 4000);
    }

    #[test]
    fn new_reno_congestion_avoidance() {
        let mut tcb = TcpSocketState::new(536, 10, 536);
        let mut cc = NewReno::new();

        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 5360 + 53);

        // Once per call, not per segment.
        let cwnd = tcb.cwnd;
        cc.increase_window(&mut tcb, 5);
        assert_eq!(tcb.cwnd, cwnd + (536.0 * 536.0 / cwnd as f64) as u32);

        // At least one byte.
        tcb.cwnd = 536 * 1000;
        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 536 * 1000 + 1);
    }

    #[test]
    fn new_reno_monotonic_in_avoidance() {
        let mut rng = rand::thread_rng();
        let mut cc = NewReno::new();

        for _ in 0..1000 {
            let seg = rng.gen_range(1..1500);
            let mut tcb = TcpSocketState::new(seg, 1, seg);
            tcb.cwnd = rng.gen_range(seg..seg * 10000);
            tcb.ssthresh = rng.gen_range(seg..=tcb.cwnd);
            let acked = rng.gen_range(1..100);

            let before = tcb.cwnd;
            cc.increase_window(&mut tcb, acked);
            assert!(tcb.cwnd > before);
        }
    }

    #[test]
    fn new_reno_ss_thresh() {
        let tcb = TcpSocketState::new(536, 10, u32::MAX);
        let mut cc = NewReno::new();

        assert_eq!(cc.get_ss_thresh(&tcb, 10000), 5000);
        assert_eq!(cc.get_ss_thresh(&tcb, 1000), 2 * 536);
        assert_eq!(cc.get_ss_thresh(&tcb, 0), 2 * 536);
        assert_eq!(cc.name(), "TcpNewReno");
    }
}
