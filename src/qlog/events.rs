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

//! Congestion control event definitions, following the recovery events of
//! draft-ietf-quic-qlog-quic-events-06 with TCP specific fields.

use serde::Deserialize;
use serde::Serialize;

use crate::TcpCongState;

/// Each event is specified as a generic object with a number of member fields
/// and their associated data.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Event {
    /// Milliseconds since the start of the trace.
    pub time: f32,

    /// The per-event metadata.
    #[serde(flatten)]
    pub data: EventData,

    /// Identifies the connection when several traces share one file.
    pub group_id: Option<String>,
}

impl Event {
    pub fn new(time: f32, data: EventData) -> Self {
        Event {
            time,
            data,
            group_id: None,
        }
    }

    /// Return the importance of the event.
    pub fn importance(&self) -> EventImportance {
        self.data.importance()
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "name", content = "data")]
pub enum EventData {
    /// Initial parameters of the sender. Emitted once, or again when the
    /// parameters are changed.
    #[serde(rename = "recovery:parameters_set")]
    RecoveryParametersSet {
        congestion_control: Option<String>,
        recovery: Option<String>,
        reordering_threshold: Option<u32>,
        max_datagram_size: Option<u32>,
        initial_congestion_window: Option<u64>,
        initial_ssthresh: Option<u64>,
    },

    /// Emitted when one or more of the window metrics changes value. Metrics
    /// updated at the same time are grouped in a single event.
    #[serde(rename = "recovery:metrics_updated")]
    RecoveryMetricsUpdated {
        min_rtt: Option<f32>,
        latest_rtt: Option<f32>,
        congestion_window: Option<u64>,
        inflated_congestion_window: Option<u64>,
        bytes_in_flight: Option<u64>,
        ssthresh: Option<u64>,
    },

    /// Emitted when the congestion state changes.
    #[serde(rename = "recovery:congestion_state_updated")]
    RecoveryCongestionStateUpdated {
        old: Option<String>,
        new: String,
        trigger: Option<CongestionStateUpdatedTrigger>,
    },
}

impl EventData {
    /// Return importance of the concrete event.
    pub fn importance(&self) -> EventImportance {
        match *self {
            EventData::RecoveryParametersSet { .. } => EventImportance::Base,
            EventData::RecoveryMetricsUpdated { .. } => EventImportance::Core,
            EventData::RecoveryCongestionStateUpdated { .. } => EventImportance::Base,
        }
    }

    /// Build a congestion state change event.
    pub fn congestion_state_updated(
        old: TcpCongState,
        new: TcpCongState,
        trigger: Option<CongestionStateUpdatedTrigger>,
    ) -> Self {
        EventData::RecoveryCongestionStateUpdated {
            old: Some(old.name().to_string()),
            new: new.name().to_string(),
            trigger,
        }
    }
}

/// An "importance indicator" in decreasing order of importance and expected
/// usage.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum EventImportance {
    /// Window updates, present in every trace.
    Core = 0,

    /// State changes and parameters.
    Base = 1,

    /// Low-level debugging of the implementation.
    Extra = 2,
}

impl EventImportance {
    /// Return true if this importance level is included by `other`.
    pub fn is_contained_in(&self, other: &EventImportance) -> bool {
        self <= other
    }
}

/// What caused a congestion state change.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CongestionStateUpdatedTrigger {
    /// Duplicate ACKs or SACKs received.
    DuplicateAck,

    /// The recovery point was acknowledged.
    RecoveryPointAcked,

    /// The retransmission timer fired.
    RetransmissionTimeout,

    /// An ECN echo was received.
    Ecn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_importance() {
        assert!(EventImportance::Core.is_contained_in(&EventImportance::Base));
        assert!(EventImportance::Base.is_contained_in(&EventImportance::Base));
        assert!(!EventImportance::Extra.is_contained_in(&EventImportance::Base));
    }

    #[test]
    fn congestion_state_updated() -> crate::Result<()> {
        let data = EventData::congestion_state_updated(
            TcpCongState::Open,
            TcpCongState::Recovery,
            Some(CongestionStateUpdatedTrigger::DuplicateAck),
        );
        assert_eq!(data.importance(), EventImportance::Base);

        let event = Event::new(1.5, data);
        let json = serde_json::to_string(&event)?;
        assert_eq!(
            json,
            r#"{"time":1.5,"name":"recovery:congestion_state_updated","data":{"old":"CA_OPEN","new":"CA_RECOVERY","trigger":"duplicate_ack"}}"#
        );
        Ok(())
    }

    #[test]
    fn metrics_updated() -> crate::Result<()> {
        let event = Event::new(
            0.0,
            EventData::RecoveryMetricsUpdated {
                min_rtt: None,
                latest_rtt: None,
                congestion_window: Some(5360),
                inflated_congestion_window: None,
                bytes_in_flight: Some(0),
                ssthresh: None,
            },
        );
        let json = serde_json::to_string(&event)?;
        assert_eq!(
            json,
            r#"{"time":0.0,"name":"recovery:metrics_updated","data":{"congestion_window":5360,"bytes_in_flight":0}}"#
        );

        let parsed: Event = serde_json::from_str(&json)?;
        assert_eq!(parsed, event);
        Ok(())
    }
}
