//! Plain-text scan reports

use crate::discovery::IdPair;
use crate::dump::DumpResult;

/// Longest payload prefix shown in a dump line.
const PREVIEW_BYTES: usize = 16;

/// Render discovered ID pairs, one per line.
pub fn format_discovery(pairs: &[IdPair]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Discovered {} responder(s)\n", pairs.len()));
    for pair in pairs {
        out.push_str(&format!(
            "  0x{:03X} -> 0x{:03X}\n",
            pair.request_id, pair.response_id
        ));
    }
    out
}

/// Render a dump as `DID  length  hex  ascii` lines plus a summary.
pub fn format_dump(result: &DumpResult) -> String {
    let mut out = String::new();
    for (did, payload) in &result.records {
        out.push_str(&format!(
            "0x{did:04X}  {:4} B  {}\n",
            payload.len(),
            preview(payload)
        ));
    }
    out.push_str(&format!(
        "\n{} DID(s) found, {} timed out\n",
        result.found(),
        result.timed_out.len()
    ));
    for did in &result.timed_out {
        out.push_str(&format!("  timed out: 0x{did:04X}\n"));
    }
    out
}

fn preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_BYTES)];
    let ellipsis = if payload.len() > PREVIEW_BYTES { ".." } else { "" };
    let ascii: String = shown
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    format!("{}{ellipsis}  |{ascii}{ellipsis}|", hex::encode(shown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dump_lines_show_hex_and_ascii() {
        let mut result = DumpResult::default();
        result.records.insert(0x00F1, b"VIN12".to_vec());
        result.records.insert(0x0001, vec![0x00, 0xFF]);
        result.timed_out.push(0x0042);

        let report = format_dump(&result);
        assert!(report.contains("0x0001     2 B  00ff  |..|"));
        assert!(report.contains("0x00F1     5 B  56494e3132  |VIN12|"));
        assert!(report.contains("2 DID(s) found, 1 timed out"));
        assert!(report.contains("timed out: 0x0042"));
    }

    #[test]
    fn long_payloads_are_truncated() {
        let mut result = DumpResult::default();
        result.records.insert(0x0010, vec![b'A'; 20]);
        let report = format_dump(&result);
        assert!(report.contains(&format!("{}..", "41".repeat(16))));
    }

    #[test]
    fn discovery_lists_pairs() {
        let pairs = vec![IdPair {
            request_id: 0x701,
            response_id: 0x709,
        }];
        let report = format_discovery(&pairs);
        assert_eq!(report, "Discovered 1 responder(s)\n  0x701 -> 0x709\n");
    }
}
