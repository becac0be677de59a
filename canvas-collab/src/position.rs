//! Line/column to linear offset conversion.
//!
//! Columns count characters; offsets are in the document's index unit
//! (UTF-8 bytes), so a clamped position never lands inside a multibyte
//! character.

use crate::types::Position;

/// Convert a 0-based `(line, column)` to an offset into `text`.
///
/// The column is clamped to the length of its line and a line past the end
/// of the text clamps to the end, so the result is always a valid index.
pub fn to_offset(text: &str, position: Position) -> u32 {
    let mut offset = 0usize;
    for (index, line) in text.split('\n').enumerate() {
        if index == position.line as usize {
            let column = line
                .char_indices()
                .nth(position.column as usize)
                .map_or(line.len(), |(byte, _)| byte);
            return (offset + column) as u32;
        }
        offset += line.len() + 1;
    }
    text.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(to_offset("hello", Position::new(0, 0)), 0);
        assert_eq!(to_offset("hello", Position::new(0, 3)), 3);
        assert_eq!(to_offset("hello", Position::new(0, 5)), 5);
    }

    #[test]
    fn test_later_lines_add_terminators() {
        let text = "ab\ncde\nf";
        assert_eq!(to_offset(text, Position::new(1, 0)), 3);
        assert_eq!(to_offset(text, Position::new(1, 2)), 5);
        assert_eq!(to_offset(text, Position::new(2, 1)), 8);
    }

    #[test]
    fn test_column_clamped_to_line() {
        let text = "ab\ncde";
        assert_eq!(to_offset(text, Position::new(0, 99)), 2);
        assert_eq!(to_offset(text, Position::new(1, 99)), 6);
    }

    #[test]
    fn test_line_past_end_clamps() {
        assert_eq!(to_offset("ab\ncd", Position::new(7, 1)), 5);
        assert_eq!(to_offset("", Position::new(3, 3)), 0);
    }

    #[test]
    fn test_empty_lines() {
        let text = "a\n\nb";
        assert_eq!(to_offset(text, Position::new(1, 5)), 2);
        assert_eq!(to_offset(text, Position::new(2, 0)), 3);
    }

    #[test]
    fn test_multibyte_columns() {
        let text = "héllo\nwörld";
        // 'é' is two bytes.
        assert_eq!(to_offset(text, Position::new(0, 2)), 3);
        assert_eq!(to_offset(text, Position::new(1, 2)), 7 + 3);
        assert_eq!(to_offset(text, Position::new(1, 50)), text.len() as u32);
    }
}
