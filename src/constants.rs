// -
// On-disk layout

/// Presence of this file in a data directory skips the `create` step
pub(crate) const INIT_MARKER_FILE: &str = "metadata";

pub(crate) const DEFAULT_LOG_FILE: &str = "log_file.txt";
/// Log file name used by older data directories
pub(crate) const LEGACY_LOG_FILE: &str = "log_file";

pub(crate) const CONSOLE_FILE: &str = "console.txt";

pub(crate) const TLS_KEY_FILE: &str = "key.pem";
pub(crate) const TLS_CERT_FILE: &str = "cert.pem";

/// Random suffix length for generated data directories
pub(crate) const DATA_DIR_SUFFIX_LEN: usize = 3;

// -
// Partition daemon line protocol

pub(crate) const OP_BLOCK: &str = "block";
pub(crate) const OP_UNBLOCK: &str = "unblock";

// -
// TLS flags used on macOS where drivers link the system OpenSSL

pub(crate) const MACOS_TLS_MIN_PROTOCOL: &str = "TLSv1";
pub(crate) const MACOS_TLS_CIPHERS: &str =
    "EECDH+AESGCM:EDH+AESGCM:AES256+EECDH:AES256+EDH:AES256-SHA";
