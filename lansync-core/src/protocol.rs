//! lansync wire grammar: request verbs, PREPARE replies, presence beacon and filename rules.

/// Payload of the multicast presence datagram.
pub const PRESENCE_BEACON: &[u8] = b"DISCOVER";

/// Files whose name starts with this marker are in-flight transfers and never listed.
pub const STAGING_PREFIX: &str = ".tmp.";

/// Hex digits of the unique token inside a staging name.
pub const STAGING_TOKEN_LEN: usize = 8;

/// Longest shareable filename in bytes: the staging name must still fit a 255-byte path component.
pub const MAX_FILENAME_LEN: usize = 255 - STAGING_PREFIX.len() - STAGING_TOKEN_LEN - 1;

/// Upper bound for a request or reply line, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

const VERB_LIST: &str = "LIST";
const VERB_PREPARE: &str = "PREPARE";
const VERB_CHUNK: &str = "CHUNK";
const REPLY_READY: &str = "READY";
const REPLY_DONE: &str = "DONE";
const REPLY_ERROR: &str = "ERROR";

/// One request per connection, sent as a single `\n`-terminated line before any payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for the peer's full listing.
    List,
    /// Announce a push of exactly `size` bytes for `filename`.
    Prepare { filename: String, size: u64 },
    /// Ask for one block of `filename`.
    Chunk { filename: String, block_index: u64 },
}

impl Request {
    /// Encode as a request line, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            Request::List => VERB_LIST.to_string(),
            Request::Prepare { filename, size } => format!("{VERB_PREPARE}:{filename}:{size}"),
            Request::Chunk {
                filename,
                block_index,
            } => format!("{VERB_CHUNK}:{filename}:{block_index}"),
        };
        let mut out = line.into_bytes();
        out.push(b'\n');
        out
    }

    /// Parse a request line. The trailing `\n` (and `\r`) is optional.
    /// The numeric argument is split off at the last colon, so filenames may contain `:`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = trim_terminator(line);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (verb, rest) = match line.split_once(':') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };
        match (verb, rest) {
            (VERB_LIST, None) => Ok(Request::List),
            (VERB_PREPARE, Some(rest)) => {
                let (filename, size) = split_last_arg(rest, VERB_PREPARE)?;
                Ok(Request::Prepare {
                    filename,
                    size: parse_number(size)?,
                })
            }
            (VERB_CHUNK, Some(rest)) => {
                let (filename, index) = split_last_arg(rest, VERB_CHUNK)?;
                Ok(Request::Chunk {
                    filename,
                    block_index: parse_number(index)?,
                })
            }
            (VERB_PREPARE, None) => Err(ProtocolError::MissingArgument(VERB_PREPARE)),
            (VERB_CHUNK, None) => Err(ProtocolError::MissingArgument(VERB_CHUNK)),
            _ => Err(ProtocolError::UnknownVerb(verb.to_string())),
        }
    }

    /// Short verb name for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Request::List => VERB_LIST,
            Request::Prepare { .. } => VERB_PREPARE,
            Request::Chunk { .. } => VERB_CHUNK,
        }
    }
}

/// Receiver's answers to PREPARE. The sender streams payload only after `Ready`;
/// the push succeeded only once `Done` follows the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareReply {
    Ready,
    /// File installed under its final name.
    Done,
    Error(String),
}

impl PrepareReply {
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            PrepareReply::Ready => REPLY_READY.to_string(),
            PrepareReply::Done => REPLY_DONE.to_string(),
            PrepareReply::Error(reason) => {
                // Reasons travel on one line.
                let reason: String = reason.chars().filter(|c| !c.is_control()).collect();
                format!("{REPLY_ERROR}:{reason}")
            }
        };
        let mut out = line.into_bytes();
        out.push(b'\n');
        out
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = trim_terminator(line);
        if line == REPLY_READY {
            return Ok(PrepareReply::Ready);
        }
        if line == REPLY_DONE {
            return Ok(PrepareReply::Done);
        }
        match line.split_once(':') {
            Some((REPLY_ERROR, reason)) => Ok(PrepareReply::Error(reason.to_string())),
            _ if line == REPLY_ERROR => Ok(PrepareReply::Error(String::new())),
            _ => Err(ProtocolError::UnexpectedReply(line.to_string())),
        }
    }
}

/// True if `name` carries the staging marker.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Accept only a single flat path component that is not a staging name
/// and leaves room for the staging prefix.
pub fn validate_filename(name: &str) -> Result<(), ProtocolError> {
    let invalid = name.is_empty()
        || name.len() > MAX_FILENAME_LEN
        || name == "."
        || name == ".."
        || is_staging_name(name)
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(ProtocolError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

fn trim_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn split_last_arg<'a>(
    rest: &'a str,
    verb: &'static str,
) -> Result<(String, &'a str), ProtocolError> {
    let (filename, arg) = rest
        .rsplit_once(':')
        .ok_or(ProtocolError::MissingArgument(verb))?;
    validate_filename(filename)?;
    Ok((filename.to_string(), arg))
}

fn parse_number(s: &str) -> Result<u64, ProtocolError> {
    s.parse::<u64>()
        .map_err(|_| ProtocolError::InvalidNumber(s.to_string()))
}

/// Malformed request or reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid filename {0:?}")]
    InvalidFilename(String),
    #[error("unexpected reply {0:?}")]
    UnexpectedReply(String),
    #[error("line not terminated within {} bytes", MAX_LINE_LEN)]
    Unterminated,
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("connection closed before end of line")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list() {
        assert_eq!(Request::parse("LIST\n"), Ok(Request::List));
        assert_eq!(Request::parse("LIST"), Ok(Request::List));
        assert_eq!(Request::parse("LIST\r\n"), Ok(Request::List));
    }

    #[test]
    fn parse_prepare_and_chunk() {
        assert_eq!(
            Request::parse("PREPARE:a.txt:5\n"),
            Ok(Request::Prepare {
                filename: "a.txt".into(),
                size: 5
            })
        );
        assert_eq!(
            Request::parse("CHUNK:file.bin:9"),
            Ok(Request::Chunk {
                filename: "file.bin".into(),
                block_index: 9
            })
        );
    }

    #[test]
    fn filename_may_contain_colon() {
        let req = Request::Prepare {
            filename: "notes: draft.txt".into(),
            size: 42,
        };
        let line = String::from_utf8(req.encode()).unwrap();
        assert_eq!(line, "PREPARE:notes: draft.txt:42\n");
        assert_eq!(Request::parse(&line), Ok(req));
    }

    #[test]
    fn rejects_malformed_requests() {
        assert_eq!(Request::parse(""), Err(ProtocolError::Empty));
        assert_eq!(
            Request::parse("GET:/"),
            Err(ProtocolError::UnknownVerb("GET".into()))
        );
        assert_eq!(
            Request::parse("PREPARE"),
            Err(ProtocolError::MissingArgument("PREPARE"))
        );
        assert_eq!(
            Request::parse("CHUNK:a.txt"),
            Err(ProtocolError::MissingArgument("CHUNK"))
        );
        assert_eq!(
            Request::parse("CHUNK:a.txt:-1"),
            Err(ProtocolError::InvalidNumber("-1".into()))
        );
        assert!(Request::parse("LIST:extra").is_err());
    }

    #[test]
    fn rejects_paths_and_staging_names() {
        for bad in ["../etc/passwd:1", "sub/a.txt:1", "..:1", ".tmp.x.a:1", "a\\b:1"] {
            let line = format!("PREPARE:{bad}");
            assert!(
                matches!(Request::parse(&line), Err(ProtocolError::InvalidFilename(_))),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn prepare_reply_tokens() {
        assert_eq!(PrepareReply::parse("READY\n"), Ok(PrepareReply::Ready));
        assert_eq!(
            PrepareReply::parse("ERROR:disk full\n"),
            Ok(PrepareReply::Error("disk full".into()))
        );
        assert_eq!(
            PrepareReply::parse("ERROR"),
            Ok(PrepareReply::Error(String::new()))
        );
        assert_eq!(PrepareReply::parse("DONE\n"), Ok(PrepareReply::Done));
        assert_eq!(PrepareReply::Done.encode(), b"DONE\n");
        assert!(matches!(
            PrepareReply::parse("OK"),
            Err(ProtocolError::UnexpectedReply(_))
        ));
        let encoded = PrepareReply::Error("bad\nname".into()).encode();
        assert_eq!(encoded, b"ERROR:badname\n");
    }

    #[test]
    fn filename_rules() {
        assert!(validate_filename("a.txt").is_ok());
        assert!(validate_filename("notes: draft.txt").is_ok());
        for bad in ["a\\b.txt", "line\nbreak", "tab\there", "", ".", ".."] {
            assert!(validate_filename(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN)).is_ok());
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }

    #[test]
    fn staging_marker() {
        assert!(is_staging_name(".tmp.1234.a.txt"));
        assert!(!is_staging_name("a.tmp.txt"));
    }
}
