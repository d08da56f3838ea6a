//! Connect line classification.

/// Literal that starts every connect line.
pub const GNUTELLA_CONNECT_PREFIX: &str = "GNUTELLA ";

/// Connect line we send on outgoing connections, without terminator.
pub const CONNECT_LINE_06: &str = "GNUTELLA CONNECT/0.6";

/// The only legacy connect line that may be accepted.
pub const CONNECT_04: &str = "CONNECT/0.4";

/// Reply given to an accepted legacy peer.
pub const LEGACY_OK: &[u8] = b"GNUTELLA OK\n\n";

/// Protocol generation a peer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectVersion {
    /// 0.4 or unrecognised; no header exchange.
    Legacy,
    /// 0.6 or later.
    Modern,
}

/// Classify a connect line (with or without the leading `GNUTELLA `).
///
/// The line is modern if it contains `CONNECT/<v>` where `<v>` parses as a
/// decimal number no smaller than 0.6.
pub fn classify_connect_line(line: &str) -> ConnectVersion {
    const TOKEN: &str = "CONNECT/";
    let version = match line.find(TOKEN) {
        Some(pos) => line[pos + TOKEN.len()..].trim(),
        None => return ConnectVersion::Legacy,
    };
    match version.parse::<f64>() {
        Ok(v) if v >= 0.6 => ConnectVersion::Modern,
        _ => ConnectVersion::Legacy,
    }
}
