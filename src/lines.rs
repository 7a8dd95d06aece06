//! Splitting text into the lines handed to the tokenizer.

/// Splits `text` after each line terminator (`\n`, `\r\n` or a lone `\r`), keeping
/// the terminators. Text after the last terminator is a line of its own; nothing
/// after it doesn't add an empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..=i]);
                start = i + 1;
            }
            b'\r' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                lines.push(&text[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Byte length of the line without its terminator.
pub fn content_end(line: &str) -> usize {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .or_else(|| line.strip_suffix('\r'))
        .unwrap_or(line)
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines() {
        let test_cases: Vec<(&str, Vec<&str>)> = vec![
            ("", vec![]),
            ("abc", vec!["abc"]),
            ("a\nb", vec!["a\n", "b"]),
            ("a\n", vec!["a\n"]),
            ("a\r\nb\rc\n\nd", vec!["a\r\n", "b\r", "c\n", "\n", "d"]),
            ("\r\r\n", vec!["\r", "\r\n"]),
            ("é\nü", vec!["é\n", "ü"]),
        ];

        for (text, expected) in test_cases {
            assert_eq!(split_lines(text), expected, "{text:?}");
        }
    }

    #[test]
    fn test_content_end() {
        assert_eq!(content_end("abc"), 3);
        assert_eq!(content_end("abc\n"), 3);
        assert_eq!(content_end("abc\r\n"), 3);
        assert_eq!(content_end("abc\r"), 3);
        assert_eq!(content_end("\n"), 0);
        assert_eq!(content_end(""), 0);
    }
}
