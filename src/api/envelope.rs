//! Gateway response envelope
//!
//! Every endpoint answers `{req_serial_num, result_code, result_msg,
//! result_data}`. Only `result_code == "1"` means success; anything else is
//! a business-level rejection even when the HTTP status is 200.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub const SUCCESS_CODE: &str = "1";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub req_serial_num: Option<String>,
    /// Documented as a string; tolerated as a number.
    pub result_code: Option<Value>,
    pub result_msg: Option<String>,
    pub result_data: Option<Value>,
}

impl Envelope {
    pub fn code(&self) -> Option<String> {
        match self.result_code.as_ref()? {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }

    /// Typed `result_data`, or the failure the envelope describes.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        let code = self
            .code()
            .ok_or_else(|| Error::Decode("response has no result_code".to_string()))?;

        if code != SUCCESS_CODE {
            let message = self
                .result_msg
                .filter(|msg| !msg.trim().is_empty())
                .unwrap_or_else(|| "Gateway rejected the request".to_string());
            return Err(Error::Api { code, message });
        }

        let data = self
            .result_data
            .filter(|data| !data.is_null())
            .ok_or_else(|| Error::Decode("response has no result_data".to_string()))?;
        serde_json::from_value(data).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Decode a response body into `T`.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::Decode(format!("{} in body {:?}", e, truncate(body, 200))))?;
    if let Some(serial) = &envelope.req_serial_num {
        tracing::trace!("Gateway request serial {}", serial);
    }
    envelope.into_result()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Data {
        value: u32,
    }

    #[test]
    fn test_success_unwraps_result_data() {
        let body = json!({"req_serial_num": "abc", "result_code": "1", "result_msg": "success", "result_data": {"value": 7}});
        let data: Data = decode(&body.to_string()).unwrap();
        assert_eq!(data, Data { value: 7 });
    }

    #[test]
    fn test_numeric_success_code_tolerated() {
        let body = json!({"result_code": 1, "result_data": {"value": 1}});
        assert!(decode::<Data>(&body.to_string()).is_ok());
    }

    #[test]
    fn test_non_success_code_is_api_error() {
        let body = json!({"result_code": "0", "result_msg": "invalid app key"});
        assert_eq!(
            decode::<Data>(&body.to_string()).unwrap_err(),
            Error::api("0", "invalid app key")
        );

        let body = json!({"result_code": "E900", "result_msg": "", "result_data": null});
        assert_eq!(
            decode::<Data>(&body.to_string()).unwrap_err(),
            Error::api("E900", "Gateway rejected the request")
        );
    }

    #[test]
    fn test_malformed_bodies_are_decode_errors() {
        for body in [
            "<html>gateway timeout</html>",
            r#"{"result_msg":"no code"}"#,
            r#"{"result_code":"1"}"#,
            r#"{"result_code":"1","result_data":{"value":"x"}}"#,
        ] {
            assert!(
                matches!(decode::<Data>(body), Err(Error::Decode(_))),
                "body {} should not decode",
                body
            );
        }
    }
}
