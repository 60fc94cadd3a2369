//! Line codec for the monitor's ASCII UDP protocol.
//!
//! Requests are a single CR-terminated line: `"<COMMAND>[ <ARG>]\r"`.
//! Responses echo the command after an `ACK` token; anything that does
//! not start with `ACK` is normalised to [`Reply::NotAcknowledged`]
//! regardless of content.  Channel-info responses additionally carry a
//! parenthesised index and up to three quoted names:
//!
//! ```text
//! ACK GET_CHANNEL_INFO 1 (3) "MXA910-A" "Automix Out" "Automix Out"
//! ```

use crate::model::ChannelRecord;

const ACK: &str = "ACK";
const CHANNEL_INFO_MARKER: &str = "GET_CHANNEL_INFO";

/// One request the device understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Version,
    GetActiveIndex,
    GetChannelInfo(u8),
    GetMute,
    GetVolume,
    GetButtonBrightness,
    GetDisplayBrightness,
    SetActive(u8),
    SetMute(u8),
    SetVolume(u8),
    SetButtonBrightness(u8),
    SetDisplayBrightness(u8),
}

impl Command {
    /// The command mnemonic without arguments, as echoed by the device.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Version => "VERSION",
            Command::GetActiveIndex => "GET_ACTIVE_INDEX",
            Command::GetChannelInfo(_) => "GET_CHANNEL_INFO",
            Command::GetMute => "GET_MUTE",
            Command::GetVolume => "GET_VOLUME",
            Command::GetButtonBrightness => "GET_BUTTON_BRIGHTNESS",
            Command::GetDisplayBrightness => "GET_DISPLAY_BRIGHTNESS",
            Command::SetActive(_) => "SET_ACTIVE",
            Command::SetMute(_) => "SET_MUTE",
            Command::SetVolume(_) => "SET_VOLUME",
            Command::SetButtonBrightness(_) => "SET_BUTTON_BRIGHTNESS",
            Command::SetDisplayBrightness(_) => "SET_DISPLAY_BRIGHTNESS",
        }
    }

    /// Serialise to the CR-terminated request line.
    pub fn encode(&self) -> String {
        match self.arg() {
            Some(arg) => format!("{} {}\r", self.name(), arg),
            None => format!("{}\r", self.name()),
        }
    }

    fn arg(&self) -> Option<u8> {
        match *self {
            Command::GetChannelInfo(n)
            | Command::SetActive(n)
            | Command::SetMute(n)
            | Command::SetVolume(n)
            | Command::SetButtonBrightness(n)
            | Command::SetDisplayBrightness(n) => Some(n),
            _ => None,
        }
    }
}

/// Decoded response.  Call sites pattern-match; there are no sentinel
/// strings to compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledged channel-info payload.
    Channel(ChannelRecord),
    /// Acknowledged single-value payload (third whitespace token).
    Value(String),
    /// Response did not start with the acknowledgement token.
    NotAcknowledged,
    /// Acknowledged but unparseable; treated like NotAcknowledged.
    Malformed,
}

impl Reply {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Reply::Channel(_) | Reply::Value(_))
    }
}

/// Classify and parse a raw response line.
pub fn decode_response(raw: &str) -> Reply {
    let line = raw.trim_end_matches(['\r', '\n']);
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(ACK) {
        return Reply::NotAcknowledged;
    }

    match tokens.next() {
        Some(CHANNEL_INFO_MARKER) => parse_channel_payload(line, tokens),
        Some(_) => {
            // Non-channel payloads are exactly "ACK <ECHO> <VALUE>".
            match (tokens.next(), tokens.next()) {
                (Some(value), None) => Reply::Value(value.to_string()),
                _ => Reply::Malformed,
            }
        }
        None => Reply::Malformed,
    }
}

/// Channel payload: enable state directly after the echo, the index in
/// parentheses, then device / channel / display names in quotes.
/// Missing quoted fields decode as empty strings.
fn parse_channel_payload<'a>(
    line: &str,
    mut tokens: impl Iterator<Item = &'a str>,
) -> Reply {
    let enabled = match tokens.next() {
        Some("1") => true,
        Some("0") => false,
        _ => return Reply::Malformed,
    };

    let index = match bracketed_index(line) {
        Some(n) if (1..=64).contains(&n) => n,
        _ => return Reply::Malformed,
    };

    let mut names = quoted_fields(line);
    let device_name = names.next().unwrap_or_default();
    let channel_name = names.next().unwrap_or_default();
    let display_name = names.next().unwrap_or_default();

    Reply::Channel(ChannelRecord {
        index,
        enabled,
        device_name,
        channel_name,
        display_name,
    })
}

fn bracketed_index(line: &str) -> Option<u8> {
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    line[open + 1..close].trim().parse().ok()
}

/// Quoted substrings in order of appearance.  Quotes do not nest and
/// the device never escapes them.
fn quoted_fields(line: &str) -> impl Iterator<Item = String> + '_ {
    let mut rest = line;
    std::iter::from_fn(move || {
        let open = rest.find('"')?;
        let close = rest[open + 1..].find('"')? + open + 1;
        let field = rest[open + 1..close].to_string();
        rest = &rest[close + 1..];
        Some(field)
    })
}
