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

//! TCPCC is a TCP congestion control engine for discrete event network
//! simulation.
//!
//! ## Features
//!
//! * **Congestion control**: NewReno, BIC, Hybla, H-TCP, HighSpeed,
//!   Illinois, LEDBAT, TCP-LP, Scalable, Vegas, Veno and YeAH, all behind
//!   the `TcpCongestionOps` interface and selected at runtime.
//! * **Fast recovery**: classic window inflation and Proportional Rate
//!   Reduction behind the `TcpRecoveryOps` interface.
//! * **Sender state machine**: `TcpSender` turns transmissions, ACKs,
//!   retransmission timeouts and ECN echoes into algorithm calls, moving the
//!   connection through the `CA_OPEN`, `CA_DISORDER`, `CA_CWR`,
//!   `CA_RECOVERY` and `CA_LOSS` states.
//! * **Observability**: debug logs through the `log` facade and an optional
//!   congestion trace in the qlog JSON-SEQ format.
//!
//! ## Get started
//!
//! ```
//! use std::time::Duration;
//! use tcpcc::*;
//!
//! let clock = SimClock::new();
//! let conf = Config::from_json(r#"{"congestion_control_algorithm": "TcpVegas"}"#)?;
//! let mut sender = TcpSender::new(&conf, clock.handle());
//!
//! sender.on_data_sent(536, false);
//! clock.advance(Duration::from_millis(100));
//! sender.on_ack(SequenceNumber32::new(536), 0, Duration::from_millis(100));
//! assert_eq!(sender.cong_state(), TcpCongState::Open);
//! # Ok::<(), tcpcc::Error>(())
//! ```
//!
//! All state lives on a single simulation thread. Algorithms that need time
//! hold a shared handle to a `Clock`, which is never the wall clock.

use serde::Deserialize;

/// Default sender maximum segment size in bytes.
pub const DEFAULT_SEGMENT_SIZE: u32 = 536;

/// Default initial congestion window in segments.
pub const DEFAULT_INITIAL_CWND: u32 = 10;

/// Default number of duplicate ACKs that trigger fast retransmit.
pub const DEFAULT_RETX_THRESHOLD: u32 = 3;

/// Result type for congestion control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about a congestion controlled sender.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Congestion control algorithm.
    congestion_control_algorithm: CongestionControlAlgorithm,

    /// Fast recovery algorithm.
    recovery_algorithm: RecoveryAlgorithm,

    /// Sender maximum segment size in bytes.
    segment_size: u32,

    /// Initial congestion window in segments.
    initial_cwnd: u32,

    /// Initial slow start threshold in bytes.
    initial_ssthresh: u32,

    /// Duplicate ACKs that trigger fast retransmit.
    retx_threshold: u32,

    bic: BicConfig,
    hybla: HyblaConfig,
    htcp: HtcpConfig,
    illinois: IllinoisConfig,
    ledbat: LedbatConfig,
    scalable: ScalableConfig,
    vegas: VegasConfig,
    veno: VenoConfig,
    yeah: YeahConfig,
    prr: PrrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            congestion_control_algorithm: CongestionControlAlgorithm::NewReno,
            recovery_algorithm: RecoveryAlgorithm::Classic,
            segment_size: DEFAULT_SEGMENT_SIZE,
            initial_cwnd: DEFAULT_INITIAL_CWND,
            initial_ssthresh: u32::MAX,
            retx_threshold: DEFAULT_RETX_THRESHOLD,
            bic: BicConfig::default(),
            hybla: HyblaConfig::default(),
            htcp: HtcpConfig::default(),
            illinois: IllinoisConfig::default(),
            ledbat: LedbatConfig::default(),
            scalable: ScalableConfig::default(),
            vegas: VegasConfig::default(),
            veno: VenoConfig::default(),
            yeah: YeahConfig::default(),
            prr: PrrConfig::default(),
        }
    }
}

impl Config {
    /// Create default configuration.
    pub fn new() -> Result<Self> {
        Ok(Self::default())
    }

    /// Parse a configuration from JSON. Missing fields take their default
    /// values, and every value is validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let conf: Config = serde_json::from_str(json)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Set the congestion control algorithm.
    /// The default value is `NewReno`.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the fast recovery algorithm.
    /// The default value is `Classic`.
    pub fn set_recovery_algorithm(&mut self, algor: RecoveryAlgorithm) {
        self.recovery_algorithm = algor;
    }

    /// Set the sender maximum segment size in bytes. It must be positive.
    /// The default value is `536`.
    pub fn set_segment_size(&mut self, v: u32) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig("segment size 0".into()));
        }
        self.segment_size = v;
        Ok(())
    }

    /// Set the initial congestion window in segments.
    /// The default value is `10`.
    pub fn set_initial_cwnd(&mut self, v: u32) {
        self.initial_cwnd = v;
    }

    /// Set the initial slow start threshold in bytes.
    /// The default value is `u32::MAX`.
    pub fn set_initial_ssthresh(&mut self, v: u32) {
        self.initial_ssthresh = v;
    }

    /// Set the number of duplicate ACKs that trigger fast retransmit. It
    /// must be positive.
    /// The default value is `3`.
    pub fn set_retx_threshold(&mut self, v: u32) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig("retx threshold 0".into()));
        }
        self.retx_threshold = v;
        Ok(())
    }

    pub fn set_bic_config(&mut self, v: BicConfig) {
        self.bic = v;
    }

    pub fn set_hybla_config(&mut self, v: HyblaConfig) {
        self.hybla = v;
    }

    pub fn set_htcp_config(&mut self, v: HtcpConfig) {
        self.htcp = v;
    }

    pub fn set_illinois_config(&mut self, v: IllinoisConfig) {
        self.illinois = v;
    }

    pub fn set_ledbat_config(&mut self, v: LedbatConfig) {
        self.ledbat = v;
    }

    pub fn set_scalable_config(&mut self, v: ScalableConfig) {
        self.scalable = v;
    }

    pub fn set_vegas_config(&mut self, v: VegasConfig) {
        self.vegas = v;
    }

    pub fn set_veno_config(&mut self, v: VenoConfig) {
        self.veno = v;
    }

    pub fn set_yeah_config(&mut self, v: YeahConfig) {
        self.yeah = v;
    }

    pub fn set_prr_config(&mut self, v: PrrConfig) {
        self.prr = v;
    }

    fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::InvalidConfig("segment size 0".into()));
        }
        if self.retx_threshold == 0 {
            return Err(Error::InvalidConfig("retx threshold 0".into()));
        }

        self.bic.validate()?;
        self.hybla.validate()?;
        self.htcp.validate()?;
        self.illinois.validate()?;
        self.ledbat.validate()?;
        self.scalable.validate()?;
        self.vegas.validate()?;
        self.veno.validate()?;
        self.yeah.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn config_default() -> Result<()> {
        let conf = Config::new()?;
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::NewReno
        );
        assert_eq!(conf.recovery_algorithm, RecoveryAlgorithm::Classic);
        assert_eq!(conf.segment_size, 536);
        assert_eq!(conf.initial_cwnd, 10);
        assert_eq!(conf.initial_ssthresh, u32::MAX);
        assert_eq!(conf.retx_threshold, 3);
        Ok(())
    }

    #[test]
    fn config_setters() {
        let mut conf = Config::default();
        assert!(conf.set_segment_size(0).is_err());
        assert_eq!(conf.segment_size, 536);
        assert!(conf.set_retx_threshold(0).is_err());
        assert_eq!(conf.retx_threshold, 3);

        let mut vegas = VegasConfig::default();
        assert!(vegas.set_alpha(5).is_err());
        vegas.set_beta(6).unwrap();
        vegas.set_alpha(5).unwrap();
        conf.set_vegas_config(vegas.clone());
        assert_eq!(conf.vegas, vegas);
    }

    #[test]
    fn config_from_json() -> Result<()> {
        let conf = Config::from_json("{}")?;
        assert_eq!(conf.segment_size, DEFAULT_SEGMENT_SIZE);

        let conf = Config::from_json(
            r#"{
                "congestion_control_algorithm": "ns3::TcpHybla",
                "recovery_algorithm": "prr",
                "segment_size": 1448,
                "initial_cwnd": 4,
                "retx_threshold": 2,
                "hybla": {"rrtt": 25},
                "prr": {"reduction_bound": "CRB"}
            }"#,
        )?;
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::Hybla
        );
        assert_eq!(conf.recovery_algorithm, RecoveryAlgorithm::Prr);
        assert_eq!(conf.segment_size, 1448);
        assert_eq!(conf.initial_cwnd, 4);
        assert_eq!(conf.initial_ssthresh, u32::MAX);
        assert_eq!(conf.retx_threshold, 2);

        let mut hybla = HyblaConfig::default();
        hybla.set_rrtt(Duration::from_millis(25))?;
        assert_eq!(conf.hybla, hybla);
        assert_eq!(conf.prr.reduction_bound(), ReductionBound::Crb);
        Ok(())
    }

    #[test]
    fn config_from_invalid_json() {
        let cases = [
            r#"{"congestion_control_algorithm": "cubic"}"#,
            r#"{"recovery_algorithm": "rack"}"#,
            r#"{"segment_size": 0}"#,
            r#"{"retx_threshold": 0}"#,
            r#"{"hybla": {"rrtt": 0}}"#,
            r#"{"scalable": {"md_factor": 1.5}}"#,
            r#"{"yeah": {"gamma": 0}}"#,
            r#"{"prr": {"reduction_bound": "none"}}"#,
            r#"{"segment_size": "1448"}"#,
            "not json",
        ];

        for json in cases {
            assert!(
                matches!(Config::from_json(json), Err(Error::InvalidConfig(_))),
                "{}",
                json
            );
        }
    }
}

pub use crate::congestion_control::*;
pub use crate::error::Error;
pub use crate::qlog::events::EventImportance;
pub use crate::recovery::*;
pub use crate::sender::TcpSender;
pub use crate::sequence::SequenceNumber32;
pub use crate::socket_state::EcnState;
pub use crate::socket_state::TcpCaEvent;
pub use crate::socket_state::TcpCongState;
pub use crate::socket_state::TcpSocketState;
pub use crate::time::Clock;
pub use crate::time::ClockRef;
pub use crate::time::SimClock;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

#[path = "recovery/recovery.rs"]
mod recovery;

#[path = "qlog/qlog.rs"]
mod qlog;

pub mod error;
mod sender;
mod sequence;
mod socket_state;
pub mod time;
