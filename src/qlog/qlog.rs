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

//! A congestion trace in the qlog main logging schema, streamed as JSON
//! Text Sequences.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use self::events::Event;
use self::events::EventData;
use self::events::EventImportance;
use crate::Error;
use crate::Result;

/// The qlog_version is 0.4 for draft-ietf-quic-qlog-main-schema-07
pub const QLOG_VERSION: &str = "0.4";

/// The serialization format for QlogFileSeq is JSON-SEQ
/// See RFC 7464: JavaScript Object Notation (JSON) Text Sequences
pub const JSON_TEXT_SEQS: &str = "JSON-SEQ";

/// Header of a streamed qlog file.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct QlogFileSeq {
    /// The qlog_format field MUST have the value "JSON-SEQ".
    pub qlog_format: String,

    /// The qlog_version field MUST have the value "0.4".
    pub qlog_version: String,

    pub title: Option<String>,

    pub description: Option<String>,

    /// All events in the file belong to this trace.
    pub trace: TraceSeq,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Debug)]
pub struct TraceSeq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub common_fields: Option<CommonFields>,
}

impl TraceSeq {
    pub fn new(title: Option<String>, description: Option<String>) -> Self {
        TraceSeq {
            title,
            description,
            common_fields: Some(CommonFields {
                time_format: Some("relative".into()),
                protocol_type: Some(vec!["TCP".into()]),
                ..CommonFields::default()
            }),
        }
    }
}

/// Fields shared by all events in the trace.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Debug)]
pub struct CommonFields {
    /// One of "absolute", "delta" or "relative".
    pub time_format: Option<String>,

    /// Simulated time of the trace start, in milliseconds.
    pub reference_time: Option<f64>,

    pub protocol_type: Option<Vec<String>>,

    pub group_id: Option<String>,
}

/// Qlog writer using the QlogFileSeq schema
pub struct QlogWriter {
    qlog: QlogFileSeq,

    /// Events below this level will not be written out.
    level: EventImportance,

    /// The underlying writer for qlog streaming
    writer: Box<dyn std::io::Write>,

    /// Whether the top-level element (QlogFileSeq) has been written
    ready: bool,

    /// Simulated time at which the trace starts.
    start_time: Duration,
}

impl QlogWriter {
    pub fn new(
        title: Option<String>,
        description: Option<String>,
        mut trace: TraceSeq,
        level: EventImportance,
        writer: Box<dyn std::io::Write>,
        start_time: Duration,
    ) -> Self {
        if let Some(common_fields) = trace.common_fields.as_mut() {
            common_fields.reference_time = Some(start_time.as_secs_f64() * 1000.0);
        }

        let qlog = QlogFileSeq {
            qlog_format: JSON_TEXT_SEQS.to_string(),
            qlog_version: QLOG_VERSION.to_string(),
            title,
            description,
            trace,
        };

        QlogWriter {
            qlog,
            level,
            writer,
            ready: false,
            start_time,
        }
    }

    /// Start qlog serialization and write the QlogFileSeq.
    pub fn start(&mut self) -> Result<()> {
        if self.ready {
            return Err(Error::Done);
        }

        self.writer.write_all(b"\x1e")?;
        serde_json::to_writer(self.writer.as_mut(), &self.qlog)?;
        self.writer.write_all(b"\n")?;
        self.ready = true;
        Ok(())
    }

    /// Flush qlog serialization data.
    pub fn flush(&mut self) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("expect ready state".into()));
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Write an event in JSON-SEQ format.
    pub fn add_event(&mut self, event: Event) -> Result<()> {
        self.check(event.importance())?;

        self.writer.write_all(b"\x1e")?;
        serde_json::to_writer(self.writer.as_mut(), &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Write an event that happened at the simulated time `time`.
    pub fn add_event_data(&mut self, time: Duration, event_data: EventData) -> Result<()> {
        let event = Event::new(self.relative_time(time), event_data);
        self.add_event(event)
    }

    /// Return whether the event should be written
    fn check(&self, ei: EventImportance) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("not ready".into()));
        }
        if !ei.is_contained_in(&self.level) {
            return Err(Error::Done);
        }
        Ok(())
    }

    /// Return the time relative to the trace start, in milliseconds.
    pub fn relative_time(&self, time: Duration) -> f32 {
        time.saturating_sub(self.start_time).as_secs_f32() * 1000.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::qlog::events::CongestionStateUpdatedTrigger;
    use crate::TcpCongState;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A writer whose output stays readable after being boxed.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Rc<RefCell<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    #[test]
    fn qlog_writer_operations() -> Result<()> {
        let buf = SharedBuf::default();
        let mut qlog_writer = QlogWriter::new(
            Some("title".to_string()),
            None,
            TraceSeq::new(Some("cc trace".to_string()), None),
            EventImportance::Base,
            Box::new(buf.clone()),
            Duration::from_millis(1000),
        );

        // Add an event before the QlogWriter is started
        let event1 = Event::new(
            0.0,
            EventData::congestion_state_updated(
                TcpCongState::Open,
                TcpCongState::Disorder,
                Some(CongestionStateUpdatedTrigger::DuplicateAck),
            ),
        );
        assert!(qlog_writer.add_event(event1.clone()).is_err());
        assert!(qlog_writer.flush().is_err());

        qlog_writer.start()?;
        assert_eq!(qlog_writer.start(), Err(Error::Done));
        qlog_writer.add_event(event1)?;

        // Events at a lower level are filtered out.
        let mut extra_writer = QlogWriter::new(
            None,
            None,
            TraceSeq::default(),
            EventImportance::Core,
            Box::new(SharedBuf::default()),
            Duration::ZERO,
        );
        extra_writer.start()?;
        assert_eq!(
            extra_writer.add_event_data(
                Duration::ZERO,
                EventData::congestion_state_updated(TcpCongState::Open, TcpCongState::Loss, None)
            ),
            Err(Error::Done)
        );

        qlog_writer.add_event_data(
            Duration::from_millis(1250),
            EventData::RecoveryMetricsUpdated {
                min_rtt: None,
                latest_rtt: None,
                congestion_window: Some(2500),
                inflated_congestion_window: Some(4000),
                bytes_in_flight: None,
                ssthresh: Some(2500),
            },
        )?;
        qlog_writer.flush()?;

        assert_eq!(
            buf.contents(),
            "\x1e{\"qlog_format\":\"JSON-SEQ\",\"qlog_version\":\"0.4\",\"title\":\"title\",\"trace\":{\"title\":\"cc trace\",\"common_fields\":{\"time_format\":\"relative\",\"reference_time\":1000.0,\"protocol_type\":[\"TCP\"]}}}\n\
             \x1e{\"time\":0.0,\"name\":\"recovery:congestion_state_updated\",\"data\":{\"old\":\"CA_OPEN\",\"new\":\"CA_DISORDER\",\"trigger\":\"duplicate_ack\"}}\n\
             \x1e{\"time\":250.0,\"name\":\"recovery:metrics_updated\",\"data\":{\"congestion_window\":2500,\"inflated_congestion_window\":4000,\"ssthresh\":2500}}\n"
        );

        Ok(())
    }
}

pub mod events;
