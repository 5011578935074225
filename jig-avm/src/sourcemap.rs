//! Source maps
//!
//! A version 3 source map with one segment per program counter. Each mapped
//! pc carries the source line delta from the previous mapped pc; unmapped pcs
//! are empty segments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const VLQ_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Source map document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    /// Always 3
    pub version: u32,
    /// Source file names
    pub sources: Vec<String>,
    /// Symbol names (unused)
    pub names: Vec<String>,
    /// `;`-separated segments, one per pc
    pub mappings: String,
}

impl SourceMap {
    /// Build from a pc to line (0-based) map
    pub fn new(sources: Vec<String>, offset_to_line: &BTreeMap<usize, usize>) -> Self {
        let max_pc = offset_to_line.keys().next_back().copied().unwrap_or(0);
        let mut segments = Vec::with_capacity(max_pc + 1);
        let mut prev_line: i64 = 0;
        for pc in 0..=max_pc {
            match offset_to_line.get(&pc) {
                Some(&line) => {
                    let line = line as i64;
                    segments.push(segment(&[0, 0, line - prev_line, 0]));
                    prev_line = line;
                }
                None => segments.push(String::new()),
            }
        }
        Self {
            version: 3,
            sources,
            names: Vec::new(),
            mappings: segments.join(";"),
        }
    }

    /// Render as compact JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Line (0-based) of a program counter, or of the closest mapped pc before it
    pub fn line_of(&self, pc: usize) -> Option<usize> {
        let mut line: i64 = 0;
        let mut found = None;
        for (i, seg) in self.mappings.split(';').enumerate() {
            if i > pc {
                break;
            }
            if seg.is_empty() {
                continue;
            }
            let fields = decode_segment(seg)?;
            line += *fields.get(2)?;
            found = Some(line as usize);
        }
        found
    }
}

fn segment(fields: &[i64]) -> String {
    let mut out = String::new();
    for &v in fields {
        encode_vlq(&mut out, v);
    }
    out
}

/// Base64 VLQ of a signed value
fn encode_vlq(out: &mut String, value: i64) {
    let mut v: u64 = if value < 0 {
        ((value.unsigned_abs()) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (v & 0x1f) as usize;
        v >>= 5;
        if v > 0 {
            digit |= 0x20;
        }
        out.push(VLQ_ALPHABET[digit] as char);
        if v == 0 {
            break;
        }
    }
}

fn decode_segment(seg: &str) -> Option<Vec<i64>> {
    let mut out = Vec::new();
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for c in seg.bytes() {
        let digit = VLQ_ALPHABET.iter().position(|a| *a == c)? as u64;
        value |= (digit & 0x1f) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
            continue;
        }
        let magnitude = (value >> 1) as i64;
        out.push(if value & 1 == 1 { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq() {
        let mut s = String::new();
        encode_vlq(&mut s, 0);
        encode_vlq(&mut s, 1);
        encode_vlq(&mut s, -1);
        encode_vlq(&mut s, 16);
        assert_eq!(s, "ACDgB");
        assert_eq!(decode_segment("ACDgB").unwrap(), vec![0, 1, -1, 16]);
    }

    #[test]
    fn test_unmapped_pcs_are_empty() {
        let mut map = BTreeMap::new();
        map.insert(1, 1);
        map.insert(3, 2);
        let sm = SourceMap::new(vec![String::new()], &map);
        assert_eq!(sm.mappings, ";AACA;;AACA");
        assert_eq!(sm.line_of(3), Some(2));
        assert_eq!(sm.line_of(2), Some(1));
        assert_eq!(sm.line_of(0), None);
    }

    #[test]
    fn test_json_shape() {
        let sm = SourceMap::new(vec![String::new()], &BTreeMap::new());
        assert_eq!(
            sm.to_json().unwrap(),
            r#"{"version":3,"sources":[""],"names":[],"mappings":""}"#
        );
    }
}
