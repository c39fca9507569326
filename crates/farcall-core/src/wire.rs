//! Wire protocol types.
//!
//! Every message is a serde-tagged JSON object. Requests carry `type` =
//! `Call`, `FunctionCall` or `Finalize`; responses carry `type` = `Result`
//! and a second tag `t` naming the result kind.
//!
//! ```text
//! {"type":"Call","callId":"…","parentCallId":"…","path":["foo"],"args":[{"t":"Value","v":1}]}
//! {"type":"Result","callId":"…","t":"Object","static":true,"fields":[{"k":"foo","v":"bar"}]}
//! ```

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one outbound call and of the result/handle it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh, globally unique call id.
    pub fn generate() -> Self {
        CallId(Uuid::new_v4().to_string())
    }

    /// Derived id addressing element `index` of an array result.
    pub fn element(&self, index: usize) -> Self {
        CallId(format!("{}[{}]", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        CallId(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        CallId(id)
    }
}

/// Identifier of a callback within the call that introduced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One classified call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Arg {
    Value {
        #[serde(default)]
        v: serde_json::Value,
    },
    Array {
        #[serde(default)]
        e: Vec<Arg>,
    },
    /// Fields in insertion order; `p` is a JSON object on the wire.
    Object {
        #[serde(default, with = "ordered_fields")]
        p: Vec<(String, Arg)>,
    },
    Function {
        id: FunctionId,
    },
}

/// Serde glue for `Arg::Object::p`: a JSON object read and written in
/// document order.
mod ordered_fields {
    use super::Arg;
    use serde::de::{Deserializer, MapAccess, Visitor};
    use serde::ser::{SerializeMap, Serializer};
    use std::fmt;

    pub fn serialize<S>(fields: &[(String, Arg)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (name, arg) in fields {
            map.serialize_entry(name, arg)?;
        }
        map.end()
    }

    struct FieldsVisitor;

    impl<'de> Visitor<'de> for FieldsVisitor {
        type Value = Vec<(String, Arg)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of argument fields")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields: Vec<(String, Arg)> =
                Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, arg)) = access.next_entry::<String, Arg>()? {
                match fields.iter_mut().find(|(k, _)| *k == name) {
                    Some((_, slot)) => *slot = arg,
                    None => fields.push((name, arg)),
                }
            }
            Ok(fields)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, Arg)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// A statically inlined object field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineField {
    pub k: String,
    pub v: serde_json::Value,
}

/// Result payload, tagged by `t`.
///
/// `Unsupported` never goes on the wire; it is what an unknown `t` decodes to
/// so the decoder can report the offending tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t")]
pub enum ResultBody {
    Value {
        v: serde_json::Value,
    },
    Array {
        e: Vec<ResultBody>,
    },
    Object {
        #[serde(rename = "static")]
        is_static: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<InlineField>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        stream: bool,
    },
    Function,
    Error {
        m: String,
    },
    #[serde(skip_serializing)]
    Unsupported {
        tag: String,
    },
}

impl ResultBody {
    /// Tag name as it appears on the wire.
    pub fn tag(&self) -> &str {
        match self {
            ResultBody::Value { .. } => "Value",
            ResultBody::Array { .. } => "Array",
            ResultBody::Object { .. } => "Object",
            ResultBody::Function => "Function",
            ResultBody::Error { .. } => "Error",
            ResultBody::Unsupported { tag } => tag,
        }
    }
}

fn take_field<T, E>(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Result<T, E>
where
    T: DeserializeOwned + Default,
    E: de::Error,
{
    match map.remove(key) {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(E::custom),
    }
}

impl<'de> Deserialize<'de> for ResultBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = serde_json::Map::deserialize(deserializer)?;
        let tag = match map.remove("t") {
            Some(serde_json::Value::String(tag)) => tag,
            Some(other) => other.to_string(),
            None => return Err(de::Error::missing_field("t")),
        };

        let body = match tag.as_str() {
            "Value" => ResultBody::Value {
                v: map.remove("v").unwrap_or(serde_json::Value::Null),
            },
            "Array" => ResultBody::Array {
                e: take_field::<_, D::Error>(&mut map, "e")?,
            },
            "Object" => ResultBody::Object {
                is_static: take_field::<_, D::Error>(&mut map, "static")?,
                fields: take_field::<_, D::Error>(&mut map, "fields")?,
                stream: take_field::<_, D::Error>(&mut map, "stream")?,
            },
            "Function" => ResultBody::Function,
            "Error" => ResultBody::Error {
                m: take_field::<_, D::Error>(&mut map, "m")?,
            },
            _ => ResultBody::Unsupported { tag },
        };
        Ok(body)
    }
}

/// Invoke `path` (with `args`) on the root service or on a live handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<CallId>,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub args: Vec<Arg>,
}

/// Invoke a callback that the receiver passed as an argument of `parent_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    pub call_id: CallId,
    pub parent_call_id: CallId,
    pub function_id: FunctionId,
    #[serde(default)]
    pub args: Vec<Arg>,
}

/// Release the registry entry and function table of `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finalize {
    pub call_id: CallId,
}

/// Response to any request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub call_id: CallId,
    #[serde(flatten)]
    pub body: ResultBody,
}

impl ResultMessage {
    pub fn new(call_id: CallId, body: ResultBody) -> Self {
        Self { call_id, body }
    }

    /// Create an error result.
    pub fn error(call_id: CallId, message: impl Into<String>) -> Self {
        Self {
            call_id,
            body: ResultBody::Error { m: message.into() },
        }
    }
}

/// Everything that crosses a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    Call(Call),
    FunctionCall(FunctionCall),
    Finalize(Finalize),
    Result(ResultMessage),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call(_) => "Call",
            Message::FunctionCall(_) => "FunctionCall",
            Message::Finalize(_) => "Finalize",
            Message::Result(_) => "Result",
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            Message::Call(call) => &call.call_id,
            Message::FunctionCall(call) => &call.call_id,
            Message::Finalize(finalize) => &finalize.call_id,
            Message::Result(result) => &result.call_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_id_element_derivation() {
        let id = CallId::from("abc");
        assert_eq!(id.element(2).as_str(), "abc[2]");
        assert_eq!(id.element(0).element(1).as_str(), "abc[0][1]");
        assert_ne!(CallId::generate(), CallId::generate());
    }

    #[test]
    fn test_call_serialization_shape() {
        let call = Message::Call(Call {
            call_id: "1".into(),
            parent_call_id: None,
            path: vec!["test".into()],
            args: vec![
                Arg::Value { v: json!(1) },
                Arg::Function { id: FunctionId(0) },
            ],
        });
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Call",
                "callId": "1",
                "path": ["test"],
                "args": [{"t": "Value", "v": 1}, {"t": "Function", "id": 0}]
            })
        );
    }

    #[test]
    fn test_static_object_result_shape() {
        let result = Message::Result(ResultMessage::new(
            "1".into(),
            ResultBody::Object {
                is_static: true,
                fields: vec![InlineField {
                    k: "foo".into(),
                    v: json!("bar"),
                }],
                stream: false,
            },
        ));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Result",
                "callId": "1",
                "t": "Object",
                "static": true,
                "fields": [{"k": "foo", "v": "bar"}]
            })
        );

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_nested_array_result_parses() {
        let raw = json!({
            "type": "Result",
            "callId": "7",
            "t": "Array",
            "e": [
                {"t": "Value", "v": null},
                {"t": "Function"},
                {"t": "Object", "static": false, "stream": true}
            ]
        });
        let parsed: Message = serde_json::from_value(raw).unwrap();
        let Message::Result(result) = parsed else {
            panic!("expected a result message");
        };
        assert_eq!(result.call_id.as_str(), "7");
        assert_eq!(
            result.body,
            ResultBody::Array {
                e: vec![
                    ResultBody::Value { v: json!(null) },
                    ResultBody::Function,
                    ResultBody::Object {
                        is_static: false,
                        fields: vec![],
                        stream: true,
                    },
                ]
            }
        );
    }

    #[test]
    fn test_unknown_result_tag_is_preserved() {
        let parsed: ResultMessage =
            serde_json::from_value(json!({"callId": "1", "t": "Promise"})).unwrap();
        assert_eq!(
            parsed.body,
            ResultBody::Unsupported {
                tag: "Promise".into()
            }
        );
        assert_eq!(parsed.body.tag(), "Promise");
    }

    #[test]
    fn test_result_without_tag_is_rejected() {
        let parsed = serde_json::from_value::<ResultMessage>(json!({"callId": "1"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_object_arg_keeps_field_order() {
        let arg = Arg::Object {
            p: vec![
                ("zeta".into(), Arg::Value { v: json!(1) }),
                ("alpha".into(), Arg::Function { id: FunctionId(0) }),
            ],
        };
        let text = serde_json::to_string(&arg).unwrap();
        assert_eq!(
            text,
            r#"{"t":"Object","p":{"zeta":{"t":"Value","v":1},"alpha":{"t":"Function","id":0}}}"#
        );

        let parsed: Arg = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, arg);

        let empty: Arg = serde_json::from_str(r#"{"t":"Object"}"#).unwrap();
        assert_eq!(empty, Arg::Object { p: vec![] });
    }

    #[test]
    fn test_function_call_field_names() {
        let value = serde_json::to_value(Message::FunctionCall(FunctionCall {
            call_id: "2".into(),
            parent_call_id: "1".into(),
            function_id: FunctionId(3),
            args: vec![],
        }))
        .unwrap();
        assert_eq!(value["parentCallId"], json!("1"));
        assert_eq!(value["functionId"], json!(3));
    }
}
