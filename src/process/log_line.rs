use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PORT_LINE: Regex = Regex::new(
        r"Listening for (?P<kind>intracluster|client driver|administrative HTTP) connections on port (?P<port>\d+)$"
    )
    .expect("valid port regex");
    static ref SERVER_ID_LINE: Regex =
        Regex::new(r"Our server ID is (?P<uuid>\w{8}-\w{4}-\w{4}-\w{4}-\w{12})$")
            .expect("valid server id regex");
    static ref READY_LINE: Regex = Regex::new(
        r#"(Server|Proxy) ready, ("(?P<name>\w+)" )?((?P<uuid>(proxy-)?\w{8}-\w{4}-\w{4}-\w{4}-\w{12}))?$"#
    )
    .expect("valid ready regex");
}

/// Which listener a "Listening for ..." line announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Cluster,
    Driver,
    Http,
}

/// A log line the harness cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Listening { kind: PortKind, port: u16 },
    ServerId { uuid: String },
    Ready {
        name: Option<String>,
        uuid: Option<String>,
    },
}

/// Matches one appended log line against the log-file contract.
/// Lines that match nothing, or announce port 0, yield `None`.
pub fn parse_log_line(line: &str) -> Option<LogEvent> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(caps) = PORT_LINE.captures(line) {
        let kind = match &caps["kind"] {
            "intracluster" => PortKind::Cluster,
            "client driver" => PortKind::Driver,
            _ => PortKind::Http,
        };
        // out-of-range or zero ports are not a usable discovery
        let port = caps["port"].parse::<u16>().ok().filter(|p| *p > 0)?;
        return Some(LogEvent::Listening { kind, port });
    }

    if let Some(caps) = SERVER_ID_LINE.captures(line) {
        return Some(LogEvent::ServerId {
            uuid: caps["uuid"].to_string(),
        });
    }

    if let Some(caps) = READY_LINE.captures(line) {
        return Some(LogEvent::Ready {
            name: caps.name("name").map(|m| m.as_str().to_string()),
            uuid: caps.name("uuid").map(|m| m.as_str().to_string()),
        });
    }

    None
}
