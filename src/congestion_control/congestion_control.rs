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

#![allow(unused_variables)]

use core::str::FromStr;
use std::any::Any;
use std::fmt;
use std::time::Duration;

use strum_macros::EnumIter;

use crate::time::ClockRef;
use crate::Config;
use crate::Error;
use crate::Result;
use crate::TcpCaEvent;
use crate::TcpCongState;
use crate::TcpSocketState;
pub use bic::Bic;
pub use bic::BicConfig;
pub use highspeed::HighSpeed;
pub use htcp::Htcp;
pub use htcp::HtcpConfig;
pub use hybla::Hybla;
pub use hybla::HyblaConfig;
pub use illinois::Illinois;
pub use illinois::IllinoisConfig;
pub use ledbat::Ledbat;
pub use ledbat::LedbatConfig;
pub use ledbat::SlowStartMode;
pub use lp::Lp;
pub use new_reno::NewReno;
pub use scalable::Scalable;
pub use scalable::ScalableConfig;
pub use vegas::Vegas;
pub use vegas::VegasConfig;
pub use veno::Veno;
pub use veno::VenoConfig;
pub use yeah::Yeah;
pub use yeah::YeahConfig;

/// Available congestion control algorithm
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionControlAlgorithm {
    /// NewReno is the standard AIMD algorithm of RFC 5681, with one segment
    /// of growth per ACK in slow start and per window in congestion
    /// avoidance.
    #[default]
    NewReno,

    /// BIC searches for the window at which the last loss happened using a
    /// binary search, then probes above it.
    Bic,

    /// Hybla normalizes the window growth of long RTT connections against a
    /// reference RTT, targeting satellite links.
    Hybla,

    /// H-TCP raises its additive increase with the time elapsed since the
    /// last congestion event and adapts its backoff to the RTT ratio.
    Htcp,

    /// HighSpeed TCP (RFC 3649) picks increase and decrease parameters from a
    /// table indexed by the window size.
    HighSpeed,

    /// TCP-Illinois is a concave AIMD whose parameters are functions of the
    /// measured queueing delay.
    Illinois,

    /// LEDBAT (RFC 6817) is a less-than-best-effort algorithm targeting a
    /// fixed one-way queueing delay.
    Ledbat,

    /// TCP-LP is a low priority algorithm backing off early on one-way delay
    /// increase.
    Lp,

    /// Scalable TCP uses a fixed increase per ACK and a fixed fraction
    /// decrease on loss.
    Scalable,

    /// Vegas keeps a small backlog in the bottleneck queue, estimated from
    /// the difference between expected and actual throughput.
    Vegas,

    /// Veno uses the Vegas backlog estimate to tell random losses from
    /// congestion losses.
    Veno,

    /// YeAH switches between a fast scalable mode and a slow Reno mode based
    /// on the estimated queue backlog.
    Yeah,
}

impl CongestionControlAlgorithm {
    /// Return the type name of the algorithm, as reported by `name()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            CongestionControlAlgorithm::NewReno => "TcpNewReno",
            CongestionControlAlgorithm::Bic => "TcpBic",
            CongestionControlAlgorithm::Hybla => "TcpHybla",
            CongestionControlAlgorithm::Htcp => "TcpHtcp",
            CongestionControlAlgorithm::HighSpeed => "TcpHighSpeed",
            CongestionControlAlgorithm::Illinois => "TcpIllinois",
            CongestionControlAlgorithm::Ledbat => "TcpLedbat",
            CongestionControlAlgorithm::Lp => "TcpLp",
            CongestionControlAlgorithm::Scalable => "TcpScalable",
            CongestionControlAlgorithm::Vegas => "TcpVegas",
            CongestionControlAlgorithm::Veno => "TcpVeno",
            CongestionControlAlgorithm::Yeah => "TcpYeah",
        }
    }
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    /// Accepts the short name ("vegas"), the type name ("TcpVegas") or the
    /// fully qualified type name ("ns3::TcpVegas"), ignoring case.
    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        let algor = algor.strip_prefix("ns3::").unwrap_or(algor);
        let algor = match algor.get(..3) {
            Some(p) if p.eq_ignore_ascii_case("tcp") && algor.len() > 3 => &algor[3..],
            _ => algor,
        };

        if algor.eq_ignore_ascii_case("newreno") {
            Ok(CongestionControlAlgorithm::NewReno)
        } else if algor.eq_ignore_ascii_case("bic") {
            Ok(CongestionControlAlgorithm::Bic)
        } else if algor.eq_ignore_ascii_case("hybla") {
            Ok(CongestionControlAlgorithm::Hybla)
        } else if algor.eq_ignore_ascii_case("htcp") {
            Ok(CongestionControlAlgorithm::Htcp)
        } else if algor.eq_ignore_ascii_case("highspeed") {
            Ok(CongestionControlAlgorithm::HighSpeed)
        } else if algor.eq_ignore_ascii_case("illinois") {
            Ok(CongestionControlAlgorithm::Illinois)
        } else if algor.eq_ignore_ascii_case("ledbat") {
            Ok(CongestionControlAlgorithm::Ledbat)
        } else if algor.eq_ignore_ascii_case("lp") {
            Ok(CongestionControlAlgorithm::Lp)
        } else if algor.eq_ignore_ascii_case("scalable") {
            Ok(CongestionControlAlgorithm::Scalable)
        } else if algor.eq_ignore_ascii_case("vegas") {
            Ok(CongestionControlAlgorithm::Vegas)
        } else if algor.eq_ignore_ascii_case("veno") {
            Ok(CongestionControlAlgorithm::Veno)
        } else if algor.eq_ignore_ascii_case("yeah") {
            Ok(CongestionControlAlgorithm::Yeah)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

impl<'de> serde::Deserialize<'de> for CongestionControlAlgorithm {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CongestionControlAlgorithm::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Congestion control interfaces shared by different algorithms.
///
/// The socket owns the control block and hands it to the algorithm for the
/// duration of each call. Algorithms never keep a reference to it.
pub trait TcpCongestionOps {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Compute the slow start threshold after a loss event.
    ///
    /// Called once per loss, before the congestion state is changed. It must
    /// not modify the control block, though the algorithm may update its own
    /// bookkeeping.
    fn get_ss_thresh(&mut self, tcb: &TcpSocketState, bytes_in_flight: u32) -> u32;

    /// Grow the congestion window on an ACK of new data outside recovery.
    fn increase_window(&mut self, tcb: &mut TcpSocketState, segments_acked: u32);

    /// Callback with the number of segments acknowledged and the RTT sample
    /// of the ACK. It may be called before or after `increase_window()`.
    fn pkts_acked(&mut self, tcb: &mut TcpSocketState, segments_acked: u32, rtt: Duration) {}

    /// Callback before the congestion state of the control block changes to
    /// `new_state`.
    fn congestion_state_set(&mut self, tcb: &TcpSocketState, new_state: TcpCongState) {}

    /// Callback for congestion avoidance events.
    fn cwnd_event(&mut self, tcb: &mut TcpSocketState, event: TcpCaEvent) {}

    /// Return an independent copy carrying the same configuration and state.
    fn fork(&self) -> Box<dyn TcpCongestionOps>;

    /// Downcast support for callers that know the concrete algorithm.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl fmt::Debug for dyn TcpCongestionOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion ops {}.", self.name())
    }
}

/// Build a congestion control algorithm from the configuration.
pub fn build_congestion_ops(conf: &Config, clock: ClockRef) -> Box<dyn TcpCongestionOps> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::NewReno => Box::new(NewReno::new()),
        CongestionControlAlgorithm::Bic => Box::new(Bic::new(conf.bic.clone(), clock)),
        CongestionControlAlgorithm::Hybla => Box::new(Hybla::new(conf.hybla.clone())),
        CongestionControlAlgorithm::Htcp => Box::new(Htcp::new(conf.htcp.clone(), clock)),
        CongestionControlAlgorithm::HighSpeed => Box::new(HighSpeed::new()),
        CongestionControlAlgorithm::Illinois => {
            Box::new(Illinois::new(conf.illinois.clone()))
        }
        CongestionControlAlgorithm::Ledbat => Box::new(Ledbat::new(conf.ledbat.clone(), clock)),
        CongestionControlAlgorithm::Lp => Box::new(Lp::new(clock)),
        CongestionControlAlgorithm::Scalable => {
            Box::new(Scalable::new(conf.scalable.clone()))
        }
        CongestionControlAlgorithm::Vegas => Box::new(Vegas::new(conf.vegas.clone())),
        CongestionControlAlgorithm::Veno => Box::new(Veno::new(conf.veno.clone())),
        CongestionControlAlgorithm::Yeah => Box::new(Yeah::new(conf.yeah.clone())),
    }
}


mod bic;
mod highspeed;
mod htcp;
mod hybla;
mod illinois;
mod ledbat;
mod lp;
pub(crate) mod new_reno;
mod scalable;
mod vegas;
mod veno;
mod yeah;
