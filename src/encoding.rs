//! Line format shared by the WAL and SSTables.
//!
//! Every record is one UTF-8 line `key=value`, split on the first `=`.
//! Subsequent `=` bytes belong to the value. A value equal to [`TOMBSTONE`]
//! denotes a deleted key; in memory tombstones are represented as `None`.

/// Canonical tombstone marker stored in the WAL and SSTables. Callers must
/// not store this exact string as a live value.
pub const TOMBSTONE: &str = "__TOMBSTONE__";

/// Encodes a key and optional value as a `key=value` line, without the
/// trailing newline. A `None` value encodes as the tombstone marker.
pub fn encode_line(key: &str, value: Option<&str>) -> String {
    format!("{}={}", key, value.unwrap_or(TOMBSTONE))
}

/// Decodes a `key=value` line. Returns `None` for malformed lines (no `=`
/// separator, or an empty key). A tombstone-marker value decodes to `None`.
pub fn decode_line(line: &str) -> Option<(&str, Option<&str>)> {
    let (key, value) = line.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    if value == TOMBSTONE {
        Some((key, None))
    } else {
        Some((key, Some(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_value_and_tombstone() {
        assert_eq!(encode_line("name", Some("Likitha")), "name=Likitha");
        assert_eq!(encode_line("k", None), "k=__TOMBSTONE__");
        assert_eq!(encode_line("k", Some("")), "k=");
    }

    #[test]
    fn test_decode_splits_on_first_equals() {
        assert_eq!(
            decode_line("key=with=equals=value=with=equals"),
            Some(("key", Some("with=equals=value=with=equals")))
        );
    }

    #[test]
    fn test_decode_tombstone() {
        assert_eq!(decode_line("k=__TOMBSTONE__"), Some(("k", None)));
    }

    #[test]
    fn test_decode_empty_value() {
        assert_eq!(decode_line("k="), Some(("k", Some(""))));
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(decode_line("no separator"), None);
        assert_eq!(decode_line("=value without key"), None);
        assert_eq!(decode_line(""), None);
    }

    #[test]
    fn test_round_trip() {
        for (key, value) in [
            ("user:1", Some("John Doe")),
            ("lang", Some("")),
            ("gone", None),
            ("__TOMBSTONE__", Some("a key may equal the marker")),
        ] {
            let line = encode_line(key, value);
            assert_eq!(decode_line(&line), Some((key, value)));
        }
    }
}
