// src/proto/parser.rs
use std::{collections::BTreeMap, str::FromStr};

use thiserror::Error;

use super::command::{
    AckRecord, CalibrationRecord, Command, CommandId, Mode, Record, TelemetryRecord,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("not a tag: {0}")]
    NotATag(String),
    #[error("missing tag")]
    MissingTag,
    #[error("malformed attribute near: {0}")]
    BadAttribute(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("unknown command id: {0}")]
    UnknownId(String),
    #[error("no line terminator within {0} bytes")]
    LineTooLong(usize),
}

/// Public API: serialize a command to a CRLF-terminated line.
pub fn format_command(cmd: &Command) -> String {
    let mut out = String::new();

    macro_rules! push_pair {
        ($k:expr, $v:expr) => {{
            out.push(' ');
            out.push_str($k);
            out.push_str("=\"");
            out.push_str(&escape_value($v));
            out.push('"');
        }};
    }

    out.push('<');
    out.push_str(mode_to_str(cmd.mode()));
    push_pair!("ID", cmd.id().as_str());
    for (k, v) in cmd.params() {
        push_pair!(k, v);
    }
    out.push_str(" />\r\n");
    out
}

/// Public API: parse one incoming line.
///
/// `Ok(None)` is the empty-record marker (`<REC />`), which carries nothing.
pub fn parse_record(line: &str) -> Result<Option<Record>, ParseError> {
    let (tag, attrs) = split_tag(line)?;
    match tag {
        "ACK" => {
            let mut map = into_map(attrs);
            let id = take_id(&mut map)?;
            let id = CommandId::from_str(&id).map_err(|_| ParseError::UnknownId(id))?;
            Ok(Some(Record::Ack(AckRecord {
                id,
                attributes: map,
            })))
        }
        "REC" if attrs.is_empty() => Ok(None),
        "REC" => Ok(Some(Record::Telemetry(TelemetryRecord {
            fields: into_map(attrs),
        }))),
        "CAL" => {
            let mut map = into_map(attrs);
            let id = take_id(&mut map)?;
            Ok(Some(Record::Calibration(CalibrationRecord {
                id,
                attributes: map,
            })))
        }
        _ => Err(ParseError::UnknownTag(tag.to_string())),
    }
}

/// Public API: parse a `<SET .../>` or `<GET .../>` line back into a command.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let (tag, attrs) = split_tag(line)?;
    let mode = Mode::from_str(tag).map_err(|_| ParseError::UnknownTag(tag.to_string()))?;
    let mut id = None;
    let mut params = Vec::new();
    for (k, v) in attrs {
        if k == "ID" && id.is_none() {
            id = Some(v);
        } else {
            params.push((k, v));
        }
    }
    let id = id.ok_or(ParseError::MissingField("ID"))?;
    let id = CommandId::from_str(&id).map_err(|_| ParseError::UnknownId(id))?;
    let cmd = match mode {
        Mode::Set => Command::set(id),
        Mode::Get => Command::get(id),
    };
    Ok(params.into_iter().fold(cmd, |cmd, (k, v)| cmd.with(k, v)))
}

/* ---------- helpers ---------- */

/// Split `<TAG K1="v1" K2="v2" />` into the tag and its attributes, in order.
fn split_tag(line: &str) -> Result<(&str, Vec<(String, String)>), ParseError> {
    let s = line.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' ' || c == '\t');
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    let body = s
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix("/>"))
        .ok_or_else(|| ParseError::NotATag(s.to_string()))?;

    let body = body.trim_start();
    let tag_end = body
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(body.len());
    let tag = &body[..tag_end];
    if tag.is_empty() {
        return Err(ParseError::MissingTag);
    }

    let mut attrs = Vec::new();
    let mut rest = body[tag_end..].trim_start();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| ParseError::BadAttribute(rest.to_string()))?;
        let key = rest[..eq].trim_end();
        if key.is_empty() || key.contains(|c: char| c.is_ascii_whitespace()) {
            return Err(ParseError::BadAttribute(rest.to_string()));
        }
        let after = rest[eq + 1..].trim_start();
        let quoted = after
            .strip_prefix('"')
            .ok_or_else(|| ParseError::BadAttribute(rest.to_string()))?;
        let close = quoted
            .find('"')
            .ok_or_else(|| ParseError::BadAttribute(rest.to_string()))?;
        attrs.push((key.to_string(), unescape_value(&quoted[..close])));
        rest = quoted[close + 1..].trim_start();
    }
    Ok((tag, attrs))
}

fn into_map(attrs: Vec<(String, String)>) -> BTreeMap<String, String> {
    attrs.into_iter().collect()
}

fn take_id(map: &mut BTreeMap<String, String>) -> Result<String, ParseError> {
    map.remove("ID").ok_or(ParseError::MissingField("ID"))
}

/* ---------- enum string helpers & FromStr impls ---------- */

fn mode_to_str(m: Mode) -> &'static str {
    match m {
        Mode::Set => "SET",
        Mode::Get => "GET",
    }
}

impl CommandId {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandId::CalibrateReset => "CALIBRATE_RESET",
            CommandId::CalibrateShow => "CALIBRATE_SHOW",
            CommandId::CalibrateStart => "CALIBRATE_START",
            CommandId::CalibrateTimeout => "CALIBRATE_TIMEOUT",
            CommandId::CalibrateDelay => "CALIBRATE_DELAY",
            CommandId::CalibrateResultSummary => "CALIBRATE_RESULT_SUMMARY",
            CommandId::EnableSendData => "ENABLE_SEND_DATA",
            CommandId::EnableSendCounter => "ENABLE_SEND_COUNTER",
            CommandId::EnableSendCursor => "ENABLE_SEND_CURSOR",
            CommandId::EnableSendPogBest => "ENABLE_SEND_POG_BEST",
            CommandId::EnableSendPogFix => "ENABLE_SEND_POG_FIX",
            CommandId::TrackerDisplay => "TRACKER_DISPLAY",
        }
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandId {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl FromStr for Mode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SET" => Ok(Mode::Set),
            "GET" => Ok(Mode::Get),
            _ => Err(()),
        }
    }
}

/* ---------- attribute value escaping ---------- */

fn escape_value(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
fn unescape_value(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/* ---------- tests ---------- */
