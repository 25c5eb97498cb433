//! JSON-content detection for usage analytics
//!
//! Payload text is scanned once for balanced `{...}` / `[...]` regions
//! of at least 100 bytes that actually parse as JSON. The resulting
//! flags feed the TOON-conversion recommendation: callers shipping lots
//! of structured JSON through their prompts are good candidates for a
//! more compact encoding.

/// A region only counts once it reaches this size; smaller fragments
/// are noise (inline examples, emoji-adjacent braces, etc).
pub const MIN_JSON_REGION_BYTES: usize = 100;

/// Scan result for one direction of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonScan {
    pub has_json: bool,
    pub json_bytes: u64,
}

impl JsonScan {
    pub fn merge(self, other: JsonScan) -> JsonScan {
        JsonScan {
            has_json: self.has_json || other.has_json,
            json_bytes: self.json_bytes + other.json_bytes,
        }
    }
}

/// Find balanced JSON regions in free text.
///
/// The scanner walks the text once. At each top-level `{` or `[` it
/// tracks nesting (honoring string literals and escapes) until the
/// opener balances; regions that are long enough and survive a real
/// JSON parse are counted, and scanning resumes after them.
pub fn scan_text(text: &str) -> JsonScan {
    let bytes = text.as_bytes();
    let mut result = JsonScan::default();
    let mut pos = 0;

    while pos < bytes.len() {
        let byte = bytes[pos];
        if byte != b'{' && byte != b'[' {
            pos += 1;
            continue;
        }

        match find_balanced_end(bytes, pos) {
            Some(end) => {
                let region = &text[pos..end];
                if region.len() >= MIN_JSON_REGION_BYTES
                    && serde_json::from_str::<serde_json::Value>(region).is_ok()
                {
                    result.has_json = true;
                    result.json_bytes += region.len() as u64;
                    pos = end;
                } else {
                    // Balanced but too small or not valid JSON; step
                    // past the opener so nested candidates get a look.
                    pos += 1;
                }
            }
            None => {
                pos += 1;
            }
        }
    }

    result
}

/// Byte offset one past the close that balances the opener at `start`,
/// or None if the text ends first.
fn find_balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_json() -> String {
        // comfortably past the 100-byte threshold
        serde_json::json!({
            "items": [
                {"name": "alpha", "value": 1, "tags": ["x", "y"]},
                {"name": "beta", "value": 2, "tags": ["z"]},
                {"name": "gamma", "value": 3, "tags": []}
            ]
        })
        .to_string()
    }

    #[test]
    fn test_plain_text_has_no_json() {
        let scan = scan_text("Just some prose about numbers like 1, 2 and 3.");
        assert!(!scan.has_json);
        assert_eq!(scan.json_bytes, 0);
    }

    #[test]
    fn test_small_json_ignored() {
        let scan = scan_text(r#"inline {"a": 1} fragment"#);
        assert!(!scan.has_json);
    }

    #[test]
    fn test_embedded_json_found() {
        let json = big_json();
        let text = format!("Here is the data:\n{}\nthanks!", json);
        let scan = scan_text(&text);
        assert!(scan.has_json);
        assert_eq!(scan.json_bytes, json.len() as u64);
    }

    #[test]
    fn test_multiple_regions_summed() {
        let json = big_json();
        let text = format!("{} and also {}", json, json);
        let scan = scan_text(&text);
        assert_eq!(scan.json_bytes, 2 * json.len() as u64);
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse() {
        let json = serde_json::json!({
            "text": "a string with } and { and \" escapes",
            "filler": "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
        })
        .to_string();
        let scan = scan_text(&json);
        assert!(scan.has_json);
        assert_eq!(scan.json_bytes, json.len() as u64);
    }

    #[test]
    fn test_unbalanced_region_ignored() {
        let scan = scan_text(&format!("{{\"broken\": [1, 2, {}", "x".repeat(200)));
        assert!(!scan.has_json);
    }

    #[test]
    fn test_balanced_but_invalid_ignored() {
        // long, balanced, not JSON
        let text = format!("{{{}}}", "not json at all ".repeat(20));
        let scan = scan_text(&text);
        assert!(!scan.has_json);
    }

    #[test]
    fn test_array_region_counts() {
        let json = serde_json::to_string(&vec![serde_json::json!({"k": "v", "n": 42}); 10]).unwrap();
        let scan = scan_text(&json);
        assert!(scan.has_json);
    }

    #[test]
    fn test_merge() {
        let a = JsonScan {
            has_json: true,
            json_bytes: 100,
        };
        let b = JsonScan {
            has_json: false,
            json_bytes: 0,
        };
        let merged = a.merge(b);
        assert!(merged.has_json);
        assert_eq!(merged.json_bytes, 100);
    }
}
