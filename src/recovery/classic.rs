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

//! Classic fast recovery, see RFC 6582 Section 3.2.

use std::any::Any;

use log::*;

use super::TcpRecoveryOps;
use crate::TcpSocketState;

/// Classic window inflation recovery.
///
/// The window is deflated to the slow start threshold on entry, while the
/// inflated window grows by one segment for each segment that has left the
/// network.
#[derive(Debug, Clone, Default)]
pub struct ClassicRecovery;

impl ClassicRecovery {
    pub fn new() -> Self {
        Self
    }
}

impl TcpRecoveryOps for ClassicRecovery {
    fn name(&self) -> &str {
        "TcpClassicRecovery"
    }

    fn enter_recovery(
        &mut self,
        tcb: &mut TcpSocketState,
        dup_ack_count: u32,
        unack_data_count: u32,
        last_sacked_bytes: u32,
    ) {
        tcb.cwnd = tcb.ssthresh;
        tcb.cwnd_infl = tcb
            .ssthresh
            .saturating_add(dup_ack_count.saturating_mul(tcb.segment_size));
        debug!(
            "{} enter: cwnd={} cwnd_infl={} dup_ack_count={}",
            self.name(),
            tcb.cwnd,
            tcb.cwnd_infl,
            dup_ack_count
        );
    }

    fn do_recovery(&mut self, tcb: &mut TcpSocketState, last_acked_bytes: u32, last_sacked_bytes: u32) {
        tcb.cwnd_infl = tcb.cwnd_infl.saturating_add(tcb.segment_size);
        trace!("{} inflate: cwnd_infl={}", self.name(), tcb.cwnd_infl);
    }

    fn exit_recovery(&mut self, tcb: &mut TcpSocketState) {
        tcb.cwnd_infl = tcb.ssthresh;
        debug!("{} exit: cwnd={}", self.name(), tcb.cwnd);
    }

    fn fork(&self) -> Box<dyn TcpRecoveryOps> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
