//! Detector label files: one `<class_id> <cx> <cy> <w> <h>` line per box.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use crate::fs_atomic;

/// One box in a label file, center format, normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelLine {
    pub class_id: u32,
    pub center: [f32; 4],
}

impl LabelLine {
    /// Build a line with every coordinate clamped into `[0, 1]`.
    pub fn clamped(class_id: u32, center: [f32; 4]) -> Self {
        let mut center = center;
        for value in &mut center {
            *value = if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        Self { class_id, center }
    }

    pub fn render(&self) -> String {
        let [cx, cy, w, h] = self.center;
        format!("{} {cx:.6} {cy:.6} {w:.6} {h:.6}", self.class_id)
    }
}

/// A parsed label file line; malformed lines are kept so repairs can report them.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Valid(LabelLine),
    /// Coordinates parse but the class token is not a non-negative integer.
    BadClass { token: String, center: [f32; 4] },
    Malformed(String),
}

pub fn parse_line(line: &str) -> ParsedLine {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return ParsedLine::Malformed(line.trim().to_string());
    }
    let mut center = [0.0f32; 4];
    for (slot, token) in center.iter_mut().zip(&parts[1..5]) {
        match token.parse::<f32>() {
            Ok(value) => *slot = value,
            Err(_) => return ParsedLine::Malformed(line.trim().to_string()),
        }
    }
    match parts[0].parse::<u32>() {
        Ok(class_id) => ParsedLine::Valid(LabelLine { class_id, center }),
        Err(_) => ParsedLine::BadClass {
            token: parts[0].to_string(),
            center,
        },
    }
}

/// Parse every non-blank line of a label file.
pub fn read_label_file(path: &Path) -> io::Result<Vec<ParsedLine>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect())
}

/// Only the valid lines of a label file.
pub fn read_valid_lines(path: &Path) -> io::Result<Vec<LabelLine>> {
    Ok(read_label_file(path)?
        .into_iter()
        .filter_map(|line| match line {
            ParsedLine::Valid(line) => Some(line),
            _ => None,
        })
        .collect())
}

pub fn write_label_file(path: &Path, lines: &[LabelLine]) -> io::Result<()> {
    let mut text = String::new();
    for line in lines {
        let _ = writeln!(text, "{}", line.render());
    }
    fs_atomic::write_atomic(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lines_are_clamped_and_rendered() {
        let line = LabelLine::clamped(3, [1.2, 0.5, -0.1, f32::NAN]);
        assert_eq!(line.render(), "3 1.000000 0.500000 0.000000 0.000000");
    }

    #[test]
    fn parser_separates_bad_classes_from_malformed_lines() {
        assert!(matches!(parse_line("1 0.5 0.5 0.2 0.2"), ParsedLine::Valid(_)));
        assert!(matches!(
            parse_line("cat 0.5 0.5 0.2 0.2"),
            ParsedLine::BadClass { .. }
        ));
        assert!(matches!(parse_line("1 0.5 0.5"), ParsedLine::Malformed(_)));
        assert!(matches!(parse_line("1 a b c d"), ParsedLine::Malformed(_)));
    }

    #[test]
    fn write_then_read_preserves_boxes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.txt");
        let lines = vec![
            LabelLine::clamped(0, [0.25, 0.25, 0.1, 0.1]),
            LabelLine::clamped(1, [0.75, 0.5, 0.2, 0.3]),
        ];
        write_label_file(&path, &lines).unwrap();
        let read = read_valid_lines(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].class_id, 1);
        assert!((read[1].center[3] - 0.3).abs() < 1e-5);
    }
}
