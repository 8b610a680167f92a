//! JSON frames exchanged with a data module socket.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Number, Value};
use smol_str::SmolStr;

use crate::error::SchemeError;

/// Outbound command sent by a telemetry channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Subscribe to change-of-value pushes.
    Cov { data_ids: Vec<SmolStr> },
    /// Request current values.
    Get { data_ids: DataIds },
    /// Write request.
    Set { data: IndexMap<SmolStr, String> },
}

/// `data_ids` of a `get`: a list for the batch, a bare string for a single id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DataIds {
    Many(Vec<SmolStr>),
    One(SmolStr),
}

impl Command {
    #[must_use]
    pub fn cov(data_ids: Vec<SmolStr>) -> Self {
        Self::Cov { data_ids }
    }

    #[must_use]
    pub fn get_batch(data_ids: Vec<SmolStr>) -> Self {
        Self::Get {
            data_ids: DataIds::Many(data_ids),
        }
    }

    #[must_use]
    pub fn get_single(data_id: SmolStr) -> Self {
        Self::Get {
            data_ids: DataIds::One(data_id),
        }
    }

    #[must_use]
    pub fn set(data_id: SmolStr, value: String) -> Self {
        let mut data = IndexMap::new();
        data.insert(data_id, value);
        Self::Set { data }
    }

    pub fn to_json(&self) -> Result<String, SchemeError> {
        serde_json::to_string(self)
            .map_err(|err| SchemeError::Protocol(format!("encode command: {err}").into()))
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Acknowledgement or error from the data module; never routed as data.
    Status {
        status: i64,
        detail: Option<String>,
    },
    /// `data_id -> value` pairs.
    Values(Vec<(String, Value)>),
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, SchemeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| SchemeError::Protocol(format!("invalid json: {err}").into()))?;
        let Value::Object(map) = value else {
            return Err(SchemeError::Protocol("frame is not a JSON object".into()));
        };
        if let Some(status) = map.get("status") {
            let code = status
                .as_i64()
                .or_else(|| status.as_f64().map(|number| number as i64))
                .or_else(|| status.as_str().and_then(|text| text.trim().parse().ok()))
                .ok_or_else(|| SchemeError::Protocol(format!("invalid status {status}").into()))?;
            let detail = map.get("detail").map(|detail| match detail {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
            return Ok(Self::Status {
                status: code,
                detail,
            });
        }
        Ok(Self::Values(map.into_iter().collect()))
    }
}

/// Text form of an inbound value, as a browser would stringify it.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        Value::Number(number) => number_text(number),
        other => other.to_string(),
    }
}

/// Number to text following JavaScript `Number.prototype.toString`:
/// integral floats lose their `.0` and magnitudes outside `[1e-6, 1e21)`
/// switch to exponent form.
fn number_text(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    let Some(float) = number.as_f64() else {
        return number.to_string();
    };
    if float == 0.0 {
        return "0".to_string();
    }
    let magnitude = float.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        let exponent_form = format!("{float:e}");
        return match exponent_form.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => exponent_form,
        };
    }
    if float.fract() == 0.0 {
        return format!("{float:.0}");
    }
    float.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use serde_json::json;

    #[test]
    fn commands_serialize_to_wire_shape() {
        let cov = Command::cov(vec!["temp".into(), "pressure".into()])
            .to_json()
            .expect("encode");
        expect![[r#"{"command":"cov","data_ids":["temp","pressure"]}"#]].assert_eq(&cov);

        let empty = Command::cov(Vec::new()).to_json().expect("encode");
        expect![[r#"{"command":"cov","data_ids":[]}"#]].assert_eq(&empty);

        let batch = Command::get_batch(vec!["a".into(), "b".into()])
            .to_json()
            .expect("encode");
        expect![[r#"{"command":"get","data_ids":["a","b"]}"#]].assert_eq(&batch);

        let single = Command::get_single("c".into()).to_json().expect("encode");
        expect![[r#"{"command":"get","data_ids":"c"}"#]].assert_eq(&single);

        let set = Command::set("mode".into(), "B".into())
            .to_json()
            .expect("encode");
        expect![[r#"{"command":"set","data":{"mode":"B"}}"#]].assert_eq(&set);
    }

    #[test]
    fn status_frames_are_not_values() {
        let inbound = Inbound::parse(r#"{"status": 403, "detail": "Module does not support COV messages"}"#)
            .expect("parse");
        assert_eq!(
            inbound,
            Inbound::Status {
                status: 403,
                detail: Some("Module does not support COV messages".to_string()),
            }
        );
        let ok = Inbound::parse(r#"{"status": 200, "detail": "Subsribed"}"#).expect("parse");
        assert!(matches!(ok, Inbound::Status { status: 200, .. }));
    }

    #[test]
    fn value_frames_list_every_key() {
        let inbound = Inbound::parse(r#"{"temp": "21.5", "run": true}"#).expect("parse");
        let Inbound::Values(mut values) = inbound else {
            panic!("expected values");
        };
        values.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            values,
            vec![
                ("run".to_string(), json!(true)),
                ("temp".to_string(), json!("21.5")),
            ]
        );
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(Inbound::parse("[1,2]"), Err(SchemeError::Protocol(_))));
        assert!(matches!(Inbound::parse("not json"), Err(SchemeError::Protocol(_))));
        assert!(matches!(
            Inbound::parse(r#"{"status": {}}"#),
            Err(SchemeError::Protocol(_))
        ));
    }

    #[test]
    fn values_stringify_like_a_browser() {
        assert_eq!(value_text(&json!("on")), "on");
        assert_eq!(value_text(&json!(3.5)), "3.5");
        assert_eq!(value_text(&json!(42)), "42");
        assert_eq!(value_text(&json!(false)), "false");
        assert_eq!(value_text(&json!(["a", 1])), "a,1");
        assert_eq!(value_text(&Value::Null), "null");
    }

    #[test]
    fn integral_floats_print_without_fraction() {
        assert_eq!(value_text(&json!(1.0)), "1");
        assert_eq!(value_text(&json!(-20.0)), "-20");
        assert_eq!(value_text(&json!([1.0, 2.5])), "1,2.5");
        assert_eq!(value_text(&json!(20.5)), "20.5");
        assert_eq!(value_text(&json!(0.0)), "0");
        assert_eq!(value_text(&json!(123_456_789_012.0)), "123456789012");
    }

    #[test]
    fn large_and_tiny_floats_use_exponent_form() {
        assert_eq!(value_text(&json!(1e21)), "1e+21");
        assert_eq!(value_text(&json!(1.5e300)), "1.5e+300");
        assert_eq!(value_text(&json!(2.5e-8)), "2.5e-8");
        assert_eq!(value_text(&json!(1e20)), "100000000000000000000");
        assert_eq!(value_text(&json!(0.000001)), "0.000001");
    }
}
