//! A minimal XML-RPC request/response codec, covering exactly the value
//! shapes supervisord's RPC interface uses: strings, integers, booleans,
//! structs, and arrays. Built directly on `quick_xml`'s event reader/writer
//! rather than its serde layer, since XML-RPC's per-value type tag doesn't
//! map onto a single Rust type the way a regular document does.

use super::error::SupervisorError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// A decoded (or to-be-encoded) XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Result<&str, SupervisorError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(SupervisorError::UnexpectedShape {
                expected: "string",
                got: other.kind(),
            }),
        }
    }

    pub fn as_i64(&self) -> Result<i64, SupervisorError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(SupervisorError::UnexpectedShape {
                expected: "int",
                got: other.kind(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, SupervisorError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(SupervisorError::UnexpectedShape {
                expected: "bool",
                got: other.kind(),
            }),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], SupervisorError> {
        match self {
            Value::Array(v) => Ok(v),
            other => Err(SupervisorError::UnexpectedShape {
                expected: "array",
                got: other.kind(),
            }),
        }
    }

    pub fn as_struct(&self) -> Result<&[(String, Value)], SupervisorError> {
        match self {
            Value::Struct(v) => Ok(v),
            other => Err(SupervisorError::UnexpectedShape {
                expected: "struct",
                got: other.kind(),
            }),
        }
    }

    pub fn field(&self, name: &str) -> Result<&Value, SupervisorError> {
        self.as_struct()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .ok_or_else(|| SupervisorError::Malformed(format!("missing struct field `{name}`")))
    }

    fn kind(&self) -> String {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
        .to_string()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// Serializes a `methodCall` envelope naming `method`, with `params` encoded
/// in order.
pub fn encode_request(method: &str, params: &[Value]) -> Result<Vec<u8>, SupervisorError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Start(BytesStart::new("methodCall")))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    write_text_elem(&mut writer, "methodName", method)?;
    if !params.is_empty() {
        writer
            .write_event(Event::Start(BytesStart::new("params")))
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
        for param in params {
            writer
                .write_event(Event::Start(BytesStart::new("param")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            write_value(&mut writer, param)?;
            writer
                .write_event(Event::End(BytesEnd::new("param")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("params")))
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("methodCall")))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    Ok(writer.into_inner().into_inner())
}

fn write_text_elem<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), SupervisorError> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))
}

fn write_value<W: std::io::Write>(writer: &mut Writer<W>, value: &Value) -> Result<(), SupervisorError> {
    writer
        .write_event(Event::Start(BytesStart::new("value")))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
    match value {
        Value::String(s) => write_text_elem(writer, "string", s)?,
        Value::Int(v) => write_text_elem(writer, "int", &v.to_string())?,
        Value::Bool(v) => write_text_elem(writer, "boolean", if *v { "1" } else { "0" })?,
        Value::Array(items) => {
            writer
                .write_event(Event::Start(BytesStart::new("array")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            writer
                .write_event(Event::Start(BytesStart::new("data")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            for item in items {
                write_value(writer, item)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("data")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            writer
                .write_event(Event::End(BytesEnd::new("array")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
        }
        Value::Struct(members) => {
            writer
                .write_event(Event::Start(BytesStart::new("struct")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            for (name, member_value) in members {
                writer
                    .write_event(Event::Start(BytesStart::new("member")))
                    .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
                write_text_elem(writer, "name", name)?;
                write_value(writer, member_value)?;
                writer
                    .write_event(Event::End(BytesEnd::new("member")))
                    .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("struct")))
                .map_err(|e| SupervisorError::Malformed(e.to_string()))?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("value")))
        .map_err(|e| SupervisorError::Malformed(e.to_string()))
}

/// Parses a `methodResponse` body, returning the single reply value or a
/// [`SupervisorError::Fault`] if the body was a `<fault>`.
pub fn decode_response(xml: &[u8]) -> Result<Value, SupervisorError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"params" => {
                return parse_params(&mut reader);
            }
            Event::Start(e) if e.local_name().as_ref() == b"fault" => {
                let fault = parse_single_value(&mut reader, "fault")?;
                let code = fault.field("faultCode")?.as_i64()?;
                let message = fault.field("faultString")?.as_str()?.to_string();
                return Err(SupervisorError::Fault { code, message });
            }
            Event::Eof => {
                return Err(SupervisorError::Malformed(
                    "methodResponse had neither params nor fault".into(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_params(reader: &mut Reader<&[u8]>) -> Result<Value, SupervisorError> {
    parse_single_value(reader, "param")
}

fn parse_single_value(reader: &mut Reader<&[u8]>, wrapper_tag: &str) -> Result<Value, SupervisorError> {
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                return read_value(reader);
            }
            Event::End(e) if e.local_name().as_ref() == wrapper_tag.as_bytes() => {
                return Err(SupervisorError::Malformed(format!(
                    "empty <{wrapper_tag}> element"
                )));
            }
            Event::Eof => {
                return Err(SupervisorError::Malformed(format!(
                    "unterminated <{wrapper_tag}> element"
                )))
            }
            _ => {}
        }
        buf.clear();
    }
}

fn read_value(reader: &mut Reader<&[u8]>) -> Result<Value, SupervisorError> {
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) => {
                let tag = e.local_name().as_ref().to_vec();
                let value = match tag.as_slice() {
                    b"string" => Value::String(read_text(reader)?),
                    b"int" | b"i4" | b"i8" => {
                        let text = read_text(reader)?;
                        Value::Int(text.trim().parse().map_err(|_| {
                            SupervisorError::Malformed(format!("invalid int literal `{text}`"))
                        })?)
                    }
                    b"boolean" => {
                        let text = read_text(reader)?;
                        Value::Bool(text.trim() == "1")
                    }
                    b"array" => read_array(reader)?,
                    b"struct" => read_struct(reader)?,
                    other => {
                        return Err(SupervisorError::Malformed(format!(
                            "unsupported XML-RPC value tag `{}`",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                // consume the closing </value>
                skip_to_close(reader, b"value")?;
                return Ok(value);
            }
            // <value> with no inner type tag is a bare string in XML-RPC.
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| SupervisorError::Malformed(e.to_string()))?
                    .into_owned();
                skip_to_close(reader, b"value")?;
                return Ok(Value::String(text));
            }
            Event::End(e) if e.local_name().as_ref() == b"value" => {
                return Ok(Value::String(String::new()));
            }
            Event::Eof => return Err(SupervisorError::Malformed("unterminated <value>".into())),
            _ => {}
        }
        buf.clear();
    }
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, SupervisorError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Text(t) => {
                text.push_str(
                    &t.unescape()
                        .map_err(|e| SupervisorError::Malformed(e.to_string()))?,
                );
            }
            Event::End(_) => return Ok(text),
            Event::Eof => return Err(SupervisorError::Malformed("unterminated text element".into())),
            _ => {}
        }
        buf.clear();
    }
}

fn read_array(reader: &mut Reader<&[u8]>) -> Result<Value, SupervisorError> {
    let mut buf = Vec::new();
    let mut items = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                items.push(read_value_inline(reader)?);
            }
            Event::End(e) if e.local_name().as_ref() == b"array" => return Ok(Value::Array(items)),
            Event::Eof => return Err(SupervisorError::Malformed("unterminated <array>".into())),
            _ => {}
        }
        buf.clear();
    }
}

fn read_struct(reader: &mut Reader<&[u8]>) -> Result<Value, SupervisorError> {
    let mut buf = Vec::new();
    let mut members = Vec::new();
    let mut pending_name: Option<String> = None;
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"name" => {
                pending_name = Some(read_text(reader)?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"value" => {
                let name = pending_name.take().ok_or_else(|| {
                    SupervisorError::Malformed("struct member value without a name".into())
                })?;
                members.push((name, read_value_inline(reader)?));
            }
            Event::End(e) if e.local_name().as_ref() == b"struct" => return Ok(Value::Struct(members)),
            Event::Eof => return Err(SupervisorError::Malformed("unterminated <struct>".into())),
            _ => {}
        }
        buf.clear();
    }
}

/// Reads the inner type tag of a `<value>` whose opening tag has already
/// been consumed by the caller's loop.
fn read_value_inline(reader: &mut Reader<&[u8]>) -> Result<Value, SupervisorError> {
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::Start(e) => {
                let tag = e.local_name().as_ref().to_vec();
                let value = match tag.as_slice() {
                    b"string" => Value::String(read_text(reader)?),
                    b"int" | b"i4" | b"i8" => {
                        let text = read_text(reader)?;
                        Value::Int(text.trim().parse().map_err(|_| {
                            SupervisorError::Malformed(format!("invalid int literal `{text}`"))
                        })?)
                    }
                    b"boolean" => Value::Bool(read_text(reader)?.trim() == "1"),
                    b"array" => read_array(reader)?,
                    b"struct" => read_struct(reader)?,
                    other => {
                        return Err(SupervisorError::Malformed(format!(
                            "unsupported XML-RPC value tag `{}`",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                skip_to_close(reader, b"value")?;
                return Ok(value);
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| SupervisorError::Malformed(e.to_string()))?
                    .into_owned();
                skip_to_close(reader, b"value")?;
                return Ok(Value::String(text));
            }
            Event::End(e) if e.local_name().as_ref() == b"value" => return Ok(Value::String(String::new())),
            Event::Eof => return Err(SupervisorError::Malformed("unterminated <value>".into())),
            _ => {}
        }
        buf.clear();
    }
}

fn skip_to_close(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), SupervisorError> {
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| SupervisorError::Malformed(e.to_string()))?
        {
            Event::End(e) if e.local_name().as_ref() == tag => return Ok(()),
            Event::Eof => return Err(SupervisorError::Malformed(format!(
                "unterminated <{}>",
                String::from_utf8_lossy(tag)
            ))),
            _ => {}
        }
        buf.clear();
    }
}
