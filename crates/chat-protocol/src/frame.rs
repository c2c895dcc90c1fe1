//! Inbound frame classification.
//!
//! Order matters and the first match wins:
//!
//! 1. `</llm-ready>`
//! 2. `<function-data>{json}</function-data>`
//! 3. `</llm-…>` control tags
//! 4. `<end-of-line>`
//! 5. `</functioncall>` / `</functioncall-complete>`
//! 6. `<history-display-name>{json}</history-display-name>`
//! 7. anything non-blank is streamed text

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::event::{ChatHistory, ControlEvent, HostLinkRecord};
use crate::filter::TextFilter;
use crate::*;

/// Function-call payload as sent by the server.
#[derive(Debug, Deserialize)]
struct FunctionDataWire {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "DataJson", default)]
    data_json: Option<Vec<HostWire>>,
}

#[derive(Debug, Deserialize)]
struct HostWire {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "UserID", default)]
    user_id: String,
    #[serde(rename = "DateStarted", default)]
    date_started: String,
}

/// Turns raw text frames into [`ControlEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct FrameParser {
    filter: TextFilter,
}

impl FrameParser {
    pub fn new(filter: TextFilter) -> Self {
        Self { filter }
    }

    /// Classify one frame.  Returns `None` for blank frames, unknown control
    /// tags, and payload frames that fail to decode (those are logged).
    pub fn parse(&self, frame: &str) -> Option<ControlEvent> {
        if frame == TAG_READY {
            return Some(ControlEvent::Ready);
        }

        if let Some(inner) = frame
            .strip_prefix(TAG_FUNCTION_DATA_OPEN)
            .and_then(|rest| rest.strip_suffix(TAG_FUNCTION_DATA_CLOSE))
        {
            return match parse_function_data(inner) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping function-data frame");
                    None
                }
            };
        }

        if frame.starts_with(TAG_CONTROL_PREFIX) {
            return parse_control(frame);
        }

        match frame {
            TAG_END_OF_LINE => return Some(ControlEvent::EndOfTurn),
            TAG_FUNCTION_CALL => return Some(ControlEvent::FunctionCallStart),
            TAG_FUNCTION_CALL_COMPLETE => return Some(ControlEvent::FunctionCallEnd),
            _ => {}
        }

        if let Some(rest) = frame.strip_prefix(TAG_HISTORY_OPEN) {
            let parsed = rest
                .strip_suffix(TAG_HISTORY_CLOSE)
                .ok_or(ProtocolError::UnterminatedFrame("history-display-name"))
                .and_then(parse_histories);
            return match parsed {
                Ok(histories) => Some(ControlEvent::HistoryList(histories)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping history frame");
                    None
                }
            };
        }

        if frame.trim().is_empty() {
            return None;
        }

        Some(ControlEvent::TextDelta(self.filter.filter(frame)))
    }
}

fn parse_control(frame: &str) -> Option<ControlEvent> {
    if let Some(text) = frame.strip_prefix(TAG_ERROR) {
        Some(ControlEvent::Error(text.to_string()))
    } else if let Some(text) = frame.strip_prefix(TAG_INFO) {
        Some(ControlEvent::Info(text.to_string()))
    } else if let Some(text) = frame.strip_prefix(TAG_WARNING) {
        Some(ControlEvent::Warning(text.to_string()))
    } else if let Some(text) = frame.strip_prefix(TAG_SUCCESS) {
        Some(ControlEvent::Success(text.to_string()))
    } else if frame == TAG_BUSY {
        Some(ControlEvent::LlmBusy)
    } else if frame == TAG_LISTENING {
        Some(ControlEvent::LlmIdle)
    } else {
        tracing::debug!(frame, "ignoring unknown control tag");
        None
    }
}

/// Map a function-data payload onto host records.  `Ok(None)` means the
/// function name carries nothing for the dashboard.
fn parse_function_data(json: &str) -> Result<Option<ControlEvent>> {
    let wire: FunctionDataWire = serde_json::from_str(json)?;

    let name = wire
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ProtocolError::MalformedFunctionData("missing Name".into()))?;
    let hosts = wire
        .data_json
        .ok_or_else(|| ProtocolError::MalformedFunctionData("missing DataJson".into()))?;

    let records: Vec<HostLinkRecord> = match name.as_str() {
        "get_host_list" | "add_host" | "edit_host" => hosts
            .into_iter()
            .map(|host| HostLinkRecord {
                is_host_list: host.user_id != "default",
                address: host.address,
                user_id: Some(host.user_id),
                is_host_data: false,
                data_set_id: 0,
                date_started: host.date_started,
            })
            .collect(),
        "get_host_data" => hosts
            .into_iter()
            .map(|host| HostLinkRecord {
                address: host.address,
                user_id: None,
                is_host_list: false,
                is_host_data: true,
                data_set_id: 0,
                date_started: host.date_started,
            })
            .collect(),
        other => {
            tracing::debug!(function = other, "no dashboard mapping for function data");
            return Ok(None);
        }
    };

    Ok(Some(ControlEvent::FunctionData { name, records }))
}

/// History listings use inconsistent key casing; normalize before decoding.
fn parse_histories(json: &str) -> Result<Vec<ChatHistory>> {
    let value: Value = serde_json::from_str(json)?;
    Ok(serde_json::from_value(lowercase_keys(value))?)
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: &str) -> Option<ControlEvent> {
        FrameParser::default().parse(frame)
    }

    #[test]
    fn ready_tag() {
        assert_eq!(parse("</llm-ready>"), Some(ControlEvent::Ready));
    }

    #[test]
    fn message_tags_keep_exact_remainder() {
        assert_eq!(
            parse("</llm-error>Model  crashed "),
            Some(ControlEvent::Error("Model  crashed ".into()))
        );
        assert_eq!(
            parse("</llm-info>Loading model"),
            Some(ControlEvent::Info("Loading model".into()))
        );
        assert_eq!(
            parse("</llm-warning>queue is long"),
            Some(ControlEvent::Warning("queue is long".into()))
        );
        assert_eq!(
            parse("</llm-success>Host added"),
            Some(ControlEvent::Success("Host added".into()))
        );
        assert_eq!(parse("</llm-error>"), Some(ControlEvent::Error(String::new())));
    }

    #[test]
    fn state_tags() {
        assert_eq!(parse("</llm-busy>"), Some(ControlEvent::LlmBusy));
        assert_eq!(parse("</llm-listening>"), Some(ControlEvent::LlmIdle));
        assert_eq!(parse("<end-of-line>"), Some(ControlEvent::EndOfTurn));
        assert_eq!(parse("</functioncall>"), Some(ControlEvent::FunctionCallStart));
        assert_eq!(
            parse("</functioncall-complete>"),
            Some(ControlEvent::FunctionCallEnd)
        );
    }

    #[test]
    fn tags_are_case_sensitive() {
        assert_eq!(
            parse("</LLM-READY>"),
            Some(ControlEvent::TextDelta("</LLM-READY>".into()))
        );
    }

    #[test]
    fn unknown_control_tag_is_ignored() {
        assert_eq!(parse("</llm-something>"), None);
        assert_eq!(parse("</llm-busy>extra"), None);
    }

    #[test]
    fn blank_frames_produce_nothing() {
        for frame in ["", " ", "\n", "\t \r\n"] {
            assert_eq!(parse(frame), None, "frame: {frame:?}");
        }
    }

    #[test]
    fn text_delta_is_filtered() {
        assert_eq!(
            parse("<|im_start|>assistant\nHello"),
            Some(ControlEvent::TextDelta("<Assistant:>Hello".into()))
        );
        assert_eq!(parse(" world"), Some(ControlEvent::TextDelta(" world".into())));
    }

    #[test]
    fn host_list_default_user_is_not_a_host_list() {
        let frame = r#"<function-data>{"Name":"get_host_list","DataJson":[{"Address":"10.0.0.1","UserID":"default","DateStarted":"2024-01-01"}]}</function-data>"#;
        match parse(frame) {
            Some(ControlEvent::FunctionData { name, records }) => {
                assert_eq!(name, "get_host_list");
                assert_eq!(
                    records,
                    vec![HostLinkRecord {
                        address: "10.0.0.1".into(),
                        user_id: Some("default".into()),
                        is_host_list: false,
                        is_host_data: false,
                        data_set_id: 0,
                        date_started: "2024-01-01".into(),
                    }]
                );
            }
            other => panic!("expected FunctionData, got {other:?}"),
        }
    }

    #[test]
    fn add_and_edit_host_share_host_list_shape() {
        for name in ["add_host", "edit_host"] {
            let frame = format!(
                r#"<function-data>{{"Name":"{name}","DataJson":[{{"Address":"example.com","UserID":"u-42"}}]}}</function-data>"#
            );
            match parse(&frame) {
                Some(ControlEvent::FunctionData { records, .. }) => {
                    assert_eq!(records.len(), 1);
                    assert!(records[0].is_host_list);
                    assert_eq!(records[0].user_id.as_deref(), Some("u-42"));
                    assert_eq!(records[0].date_started, "");
                }
                other => panic!("expected FunctionData for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn host_data_marks_records() {
        let frame = r#"<function-data>{"Name":"get_host_data","DataJson":[{"Address":"a"},{"Address":"b"}]}</function-data>"#;
        match parse(frame) {
            Some(ControlEvent::FunctionData { records, .. }) => {
                assert_eq!(records.len(), 2);
                assert!(records.iter().all(|r| r.is_host_data && !r.is_host_list));
                assert!(records.iter().all(|r| r.user_id.is_none()));
            }
            other => panic!("expected FunctionData, got {other:?}"),
        }
    }

    #[test]
    fn bad_function_data_is_dropped() {
        assert_eq!(parse("<function-data>{not json</function-data>"), None);
        assert_eq!(parse(r#"<function-data>{"Name":"","DataJson":[]}</function-data>"#), None);
        assert_eq!(parse(r#"<function-data>{"Name":"get_host_list"}</function-data>"#), None);
        assert_eq!(
            parse(r#"<function-data>{"Name":"run_nmap","DataJson":[]}</function-data>"#),
            None
        );
    }

    #[test]
    fn history_keys_are_case_insensitive() {
        let frame = r#"<history-display-name>[{"Name":"Ping checks","SESSIONID":"s-1","History":[{"Role":"user","Content":"ping","Timestamp":"2024-01-01T00:00:00Z"}],"startUnixTime":1704067200,"UserId":"u","LLMType":"TurboLLM"}]</history-display-name>"#;
        match parse(frame) {
            Some(ControlEvent::HistoryList(histories)) => {
                assert_eq!(histories.len(), 1);
                let h = &histories[0];
                assert_eq!(h.name, "Ping checks");
                assert_eq!(h.session_id, "s-1");
                assert_eq!(h.start_unix_time, 1_704_067_200);
                assert_eq!(h.user_id, "u");
                assert_eq!(h.llm_type, "TurboLLM");
                assert_eq!(h.history[0].role, "user");
                assert_eq!(h.history[0].content, "ping");
            }
            other => panic!("expected HistoryList, got {other:?}"),
        }
    }

    #[test]
    fn empty_history_list() {
        assert_eq!(
            parse("<history-display-name>[]</history-display-name>"),
            Some(ControlEvent::HistoryList(vec![]))
        );
    }

    #[test]
    fn malformed_history_is_dropped() {
        assert_eq!(parse("<history-display-name>[{]</history-display-name>"), None);
        assert_eq!(parse(r#"<history-display-name>{"name":"x"}</history-display-name>"#), None);
        assert_eq!(parse("<history-display-name>[]"), None);
    }
}
