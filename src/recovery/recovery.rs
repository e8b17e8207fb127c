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

use strum_macros::EnumIter;

use crate::Config;
use crate::Error;
use crate::Result;
use crate::TcpSocketState;
pub use classic::ClassicRecovery;
pub use prr::PrrConfig;
pub use prr::PrrRecovery;
pub use prr::ReductionBound;

/// Available fast recovery algorithm
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum RecoveryAlgorithm {
    /// Classic NewReno fast recovery (RFC 6582): the window is set to the
    /// slow start threshold and inflated by one segment per duplicate ACK.
    #[default]
    Classic,

    /// Proportional Rate Reduction (RFC 6937) paces transmissions during
    /// recovery in proportion to the data delivered.
    Prr,
}

impl RecoveryAlgorithm {
    /// Return the type name of the algorithm, as reported by `name()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            RecoveryAlgorithm::Classic => "TcpClassicRecovery",
            RecoveryAlgorithm::Prr => "TcpPrrRecovery",
        }
    }
}

impl FromStr for RecoveryAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<RecoveryAlgorithm> {
        let algor = algor.strip_prefix("ns3::").unwrap_or(algor);

        if algor.eq_ignore_ascii_case("classic")
            || algor.eq_ignore_ascii_case("TcpClassicRecovery")
        {
            Ok(RecoveryAlgorithm::Classic)
        } else if algor.eq_ignore_ascii_case("prr") || algor.eq_ignore_ascii_case("TcpPrrRecovery")
        {
            Ok(RecoveryAlgorithm::Prr)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

impl<'de> serde::Deserialize<'de> for RecoveryAlgorithm {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RecoveryAlgorithm::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Fast recovery interfaces shared by different algorithms.
///
/// The window is driven by the recovery algorithm between `enter_recovery()`
/// and `exit_recovery()`, the congestion control algorithm is not consulted
/// for window growth in the meantime.
pub trait TcpRecoveryOps {
    /// Name of recovery algorithm.
    fn name(&self) -> &str;

    /// Called once when the congestion state changes to recovery, after the
    /// slow start threshold has been updated.
    fn enter_recovery(
        &mut self,
        tcb: &mut TcpSocketState,
        dup_ack_count: u32,
        unack_data_count: u32,
        last_sacked_bytes: u32,
    );

    /// Called on every ACK received in recovery.
    fn do_recovery(&mut self, tcb: &mut TcpSocketState, last_acked_bytes: u32, last_sacked_bytes: u32);

    /// Called once when the recovery point is fully acknowledged.
    fn exit_recovery(&mut self, tcb: &mut TcpSocketState);

    /// Callback for data (re)transmitted in recovery.
    fn update_bytes_sent(&mut self, bytes_sent: u32) {}

    /// Return an independent copy carrying the same configuration and state.
    fn fork(&self) -> Box<dyn TcpRecoveryOps>;

    /// Downcast support for callers that know the concrete algorithm.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn TcpRecoveryOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recovery ops {}.", self.name())
    }
}

/// Build a recovery algorithm from the configuration.
pub fn build_recovery_ops(conf: &Config) -> Box<dyn TcpRecoveryOps> {
    match conf.recovery_algorithm {
        RecoveryAlgorithm::Classic => Box::new(ClassicRecovery::new()),
        RecoveryAlgorithm::Prr => Box::new(PrrRecovery::new(conf.prr.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn recovery_name() {
        let cases = [
            ("classic", Ok(RecoveryAlgorithm::Classic)),
            ("Classic", Ok(RecoveryAlgorithm::Classic)),
            ("TcpClassicRecovery", Ok(RecoveryAlgorithm::Classic)),
            ("ns3::TcpClassicRecovery", Ok(RecoveryAlgorithm::Classic)),
            ("prr", Ok(RecoveryAlgorithm::Prr)),
            ("PRR", Ok(RecoveryAlgorithm::Prr)),
            ("ns3::TcpPrrRecovery", Ok(RecoveryAlgorithm::Prr)),
            ("rack", Err(Error::InvalidConfig("unknown".into()))),
            ("", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(RecoveryAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn recovery_build() {
        let mut conf = Config::default();

        for algor in RecoveryAlgorithm::iter() {
            conf.set_recovery_algorithm(algor);
            let recovery = build_recovery_ops(&conf);
            assert_eq!(recovery.name(), algor.type_name());
            assert_eq!(RecoveryAlgorithm::from_str(recovery.name()), Ok(algor));

            let forked = recovery.fork();
            assert_eq!(
                format!("{:?}", forked),
                format!("recovery ops {}.", recovery.name())
            );
        }
    }
}

mod classic;
mod prr;
