//! XML-RPC wire codec.
//!
//! Calls are written directly as text; responses are read with `quick-xml`
//! into a small element tree and then interpreted.

use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::NaiveDateTime;
use gandi_core::value::DATETIME_FORMAT;
use gandi_core::{Error, Record, Value};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Encode a `methodCall` document.
#[must_use]
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(v) => {
            if i32::try_from(*v).is_ok() {
                out.push_str(&format!("<int>{v}</int>"));
            } else {
                out.push_str(&format!("<i8>{v}</i8>"));
            }
        }
        Value::Bool(v) => {
            out.push_str(&format!("<boolean>{}</boolean>", u8::from(*v)));
        }
        Value::String(v) => {
            out.push_str(&format!("<string>{}</string>", escape(v.as_str())));
        }
        Value::Double(v) => {
            out.push_str(&format!("<double>{v}</double>"));
        }
        Value::DateTime(v) => {
            out.push_str(&format!(
                "<dateTime.iso8601>{}</dateTime.iso8601>",
                v.format(DATETIME_FORMAT)
            ));
        }
        Value::Base64(bytes) => {
            out.push_str(&format!("<base64>{}</base64>", STANDARD.encode(bytes)));
        }
        Value::Struct(record) => {
            out.push_str("<struct>");
            for (name, member) in record {
                out.push_str(&format!("<member><name>{}</name>", escape(name.as_str())));
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Array(values) => {
            out.push_str("<array><data>");
            for item in values {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Decode a `methodResponse` document.
///
/// # Errors
///
/// Returns [`Error::Fault`] when the service answered with a fault and
/// [`Error::ParseError`] when the document is not a well-formed response.
pub fn decode_response(body: &str) -> Result<Value> {
    let root = parse_tree(body)?;
    if root.name != "methodResponse" {
        return Err(parse_error(format!("unexpected root element <{}>", root.name)));
    }

    if let Some(fault) = root.child("fault") {
        let value = decode_value(fault.required("value")?)?;
        let record = value
            .as_record()
            .ok_or_else(|| parse_error("fault value is not a struct"))?;
        return Err(Error::Fault {
            code: record.get("faultCode").and_then(Value::as_i64).unwrap_or_default(),
            message: record
                .get("faultString")
                .map(ToString::to_string)
                .unwrap_or_default(),
        });
    }

    let value = root
        .required("params")?
        .required("param")?
        .required("value")?;
    decode_value(value)
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    fn required(&self, name: &str) -> Result<&Node> {
        self.child(name)
            .ok_or_else(|| parse_error(format!("<{}> without <{name}>", self.name)))
    }
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::ParseError(format!("invalid XML-RPC response: {}", message.into()))
}

fn parse_tree(body: &str) -> Result<Node> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(Node {
                name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Ok(Event::Empty(empty)) => {
                let node = Node {
                    name: String::from_utf8_lossy(empty.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| parse_error("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| parse_error(e.to_string()))?;
                    top.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(parse_error(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(parse_error("unexpected end of document"));
    }
    root.ok_or_else(|| parse_error("empty document"))
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(parse_error("multiple root elements"))
    }
}

fn decode_value(node: &Node) -> Result<Value> {
    // An untyped <value> is a string.
    let Some(typed) = node.children.first() else {
        return Ok(Value::String(node.text.clone()));
    };
    let text = typed.text.trim();

    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| parse_error(format!("bad integer `{text}`: {e}"))),
        "boolean" => match text {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(parse_error(format!("bad boolean `{other}`"))),
        },
        "string" => Ok(Value::String(typed.text.clone())),
        "double" => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| parse_error(format!("bad double `{text}`: {e}"))),
        "dateTime.iso8601" => NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
            .map(Value::DateTime)
            .map_err(|e| parse_error(format!("bad dateTime `{text}`: {e}"))),
        "base64" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map(Value::Base64)
                .map_err(|e| parse_error(format!("bad base64: {e}")))
        }
        "struct" => {
            let mut record = Record::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member.required("name")?.text.clone();
                let value = decode_value(member.required("value")?)?;
                record.insert(name, value);
            }
            Ok(Value::Struct(record))
        }
        "array" => typed
            .required("data")?
            .children
            .iter()
            .filter(|c| c.name == "value")
            .map(decode_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        "nil" | "ex:nil" => Ok(Value::Nil),
        other => Err(parse_error(format!("unknown value type <{other}>"))),
    }
}
