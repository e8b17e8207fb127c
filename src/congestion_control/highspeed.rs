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

//! HighSpeed TCP.
//!
//! See RFC 3649. The increase `a(w)` and decrease `b(w)` parameters are read
//! from the table of Appendix B, indexed by the window in segments.

use std::any::Any;

use log::*;

use super::new_reno;
use super::TcpCongestionOps;
use crate::TcpSocketState;

/// Upper window bounds of each row of the table, in segments.
const WINDOW_BOUNDS: [u32; 72] = [
    38, 118, 221, 347, 495, 663, 851, 1058, 1284, 1529, 1793, 2076, 2378, 2699, 3039, 3399, 3778,
    4177, 4596, 5036, 5497, 5979, 6483, 7009, 7558, 8130, 8726, 9346, 9991, 10661, 11358, 12082,
    12834, 13614, 14424, 15265, 16137, 17042, 17981, 18955, 19965, 21013, 22101, 23230, 24402,
    25618, 26881, 28193, 29557, 30975, 32450, 33986, 35586, 37253, 38992, 40808, 42707, 44694,
    46776, 48961, 51258, 53677, 56230, 58932, 61799, 64851, 68113, 71617, 75401, 79517, 84035,
    89053,
];

/// Decrease factor of each row of the table.
const DECREASE: [f64; 72] = [
    0.50, 0.44, 0.41, 0.38, 0.37, 0.35, 0.34, 0.33, 0.32, 0.31, 0.30, 0.29, 0.28, 0.28, 0.27,
    0.27, 0.26, 0.26, 0.25, 0.25, 0.24, 0.24, 0.23, 0.23, 0.22, 0.22, 0.22, 0.21, 0.21, 0.21,
    0.20, 0.20, 0.20, 0.19, 0.19, 0.19, 0.19, 0.18, 0.18, 0.18, 0.17, 0.17, 0.17, 0.17, 0.16,
    0.16, 0.16, 0.16, 0.15, 0.15, 0.15, 0.15, 0.14, 0.14, 0.14, 0.14, 0.13, 0.13, 0.13, 0.13,
    0.13, 0.12, 0.12, 0.12, 0.12, 0.11, 0.11, 0.11, 0.10, 0.10, 0.10, 0.10,
];

/// Decrease factor beyond the last row.
const MIN_DECREASE: f64 = 0.10;

/// Row of the table for a window of `w` segments, or None beyond the table.
fn table_row(w: u32) -> Option<usize> {
    let row = WINDOW_BOUNDS.partition_point(|&bound| bound < w);
    if row < WINDOW_BOUNDS.len() {
        Some(row)
    } else {
        None
    }
}

/// Increase in segments per RTT for a window of `w` segments.
pub fn table_lookup_a(w: u32) -> u32 {
    match table_row(w) {
        Some(row) => row as u32 + 1,
        None => WINDOW_BOUNDS.len() as u32 + 1,
    }
}

/// Fraction of the window removed on loss for a window of `w` segments.
pub fn table_lookup_b(w: u32) -> f64 {
    match table_row(w) {
        Some(row) => DECREASE[row],
        None => MIN_DECREASE,
    }
}

/// HighSpeed TCP congestion control.
#[derive(Debug, Clone, Default)]
pub struct HighSpeed {
    /// Accumulated ACK credit, in segments times a(w).
    ack_cnt: u32,
}

impl HighSpeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn congestion_avoidance(&mut self, tcb: &mut TcpSocketState, segments_acked: u32) {
        let mut seg_cwnd = tcb.cwnd_in_segments();
        let old_cwnd = seg_cwnd;
        if seg_cwnd == 0 {
            return;
        }

        if segments_acked > 0 {
            let coeff_a = table_lookup_a(seg_cwnd);
            self.ack_cnt = self.ack_cnt.saturating_add(segments_acked * coeff_a);
        }

        while self.ack_cnt >= seg_cwnd {
            self.ack_cnt -= seg_cwnd;
            seg_cwnd += 1;
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

impl TcpCongestionOps for HighSpeed {
    fn name(&self) -> &str {
        "TcpHighSpeed"
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
        let b = 1.0 - table_lookup_b(seg_cwnd);
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
    fn highspeed_tables() {
        assert_eq!(table_lookup_a(1), 1);
        assert_eq!(table_lookup_a(38), 1);
        assert_eq!(table_lookup_a(39), 2);
        assert_eq!(table_lookup_a(118), 2);
        assert_eq!(table_lookup_a(1000), 8);
        assert_eq!(table_lookup_a(89053), 72);
        assert_eq!(table_lookup_a(89054), 73);
        assert_eq!(table_lookup_a(u32::MAX), 73);

        assert_eq!(table_lookup_b(38), 0.50);
        assert_eq!(table_lookup_b(39), 0.44);
        assert_eq!(table_lookup_b(1000), 0.33);
        assert_eq!(table_lookup_b(89053), 0.10);
        assert_eq!(table_lookup_b(100000), 0.10);

        // Both are monotonic step functions.
        let mut last_a = 0;
        let mut last_b = 1.0;
        for w in (1..100000).step_by(97) {
            assert!(table_lookup_a(w) >= last_a);
            assert!(table_lookup_b(w) <= last_b);
            last_a = table_lookup_a(w);
            last_b = table_lookup_b(w);
        }
    }

    #[test]
    fn highspeed_congestion_avoidance() {
        let mut tcb = TcpSocketState::new(500, 40, 500);
        let mut hs = HighSpeed::new();

        // a(40) = 2, twenty ACKs give one segment.
        hs.increase_window(&mut tcb, 19);
        assert_eq!(tcb.cwnd, 40 * 500);
        hs.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 41 * 500);
        assert_eq!(hs.ack_cnt, 0);
    }

    #[test]
    fn highspeed_ss_thresh() {
        let tcb = TcpSocketState::new(500, 40, 500);
        let mut hs = HighSpeed::new();

        // b(101) = 0.44
        assert_eq!(hs.get_ss_thresh(&tcb, 101 * 500), 56 * 500);
        // b(30) = 0.5
        assert_eq!(hs.get_ss_thresh(&tcb, 30 * 500), 15 * 500);
        assert_eq!(hs.get_ss_thresh(&tcb, 500), 2 * 500);
    }
}
