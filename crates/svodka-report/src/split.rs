//! Splits rendered report text into Telegram-sized messages. The hard
//! platform limit is 4096 characters; the default budget leaves headroom
//! for escape expansion.

pub const DEFAULT_BUDGET: usize = 3900;

/// Ordered chunks, each at most `budget` characters (character count,
/// not bytes) and never ending in a lone trailing backslash.
pub fn split_for_platform(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    if text.chars().count() <= budget {
        return vec![trim_trailing_escape(text.to_string())];
    }
    accumulate(text.split("\n\n"), "\n\n", budget, |paragraph, budget| {
        accumulate(paragraph.split('\n'), "\n", budget, hard_cut)
    })
}

/// Greedy accumulation of pieces into budget-sized chunks; an oversized
/// single piece is handed to `overflow` for finer splitting.
fn accumulate<'a, I, F>(pieces: I, sep: &str, budget: usize, overflow: F) -> Vec<String>
where
    I: Iterator<Item = &'a str>,
    F: Fn(&str, usize) -> Vec<String>,
{
    let sep_len = sep.chars().count();
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    let flush = |buffer: &mut String, buffer_len: &mut usize, chunks: &mut Vec<String>| {
        if !buffer.is_empty() {
            chunks.push(trim_trailing_escape(std::mem::take(buffer)));
            *buffer_len = 0;
        }
    };

    for piece in pieces {
        let piece_len = piece.chars().count();
        if piece_len > budget {
            flush(&mut buffer, &mut buffer_len, &mut chunks);
            chunks.extend(overflow(piece, budget));
            continue;
        }
        let needed = if buffer.is_empty() {
            piece_len
        } else {
            buffer_len + sep_len + piece_len
        };
        if needed > budget {
            flush(&mut buffer, &mut buffer_len, &mut chunks);
            buffer.push_str(piece);
            buffer_len = piece_len;
        } else {
            if !buffer.is_empty() {
                buffer.push_str(sep);
            }
            buffer.push_str(piece);
            buffer_len = needed;
        }
    }
    flush(&mut buffer, &mut buffer_len, &mut chunks);
    chunks
}

/// Last resort for a single line longer than the budget: cut at
/// character boundaries.
fn hard_cut(line: &str, budget: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(budget)
        .map(|window| trim_trailing_escape(window.iter().collect()))
        .collect()
}

/// A chunk ending in an odd number of backslashes would leave a dangling
/// escape; drop trailing backslashes until the tail is well-formed.
fn trim_trailing_escape(mut chunk: String) -> String {
    while trailing_backslashes(&chunk) % 2 == 1 {
        chunk.pop();
    }
    chunk
}

fn trailing_backslashes(chunk: &str) -> usize {
    chunk.chars().rev().take_while(|&c| c == '\\').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(split_for_platform("привет", 100), vec!["привет"]);
    }

    #[test]
    fn splits_on_paragraphs_first() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(50), "b".repeat(50), "c".repeat(20));
        let chunks = split_for_platform(&text, 80);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(50));
        assert_eq!(chunks[1], format!("{}\n\n{}", "b".repeat(50), "c".repeat(20)));
    }

    #[test]
    fn oversized_paragraph_falls_back_to_lines() {
        let paragraph = format!("{}\n{}\n{}", "a".repeat(60), "b".repeat(60), "c".repeat(10));
        let text = format!("intro\n\n{paragraph}");
        let chunks = split_for_platform(&text, 80);
        assert_eq!(chunks[0], "intro");
        assert_eq!(chunks[1], "a".repeat(60));
        assert_eq!(chunks[2], format!("{}\n{}", "b".repeat(60), "c".repeat(10)));
    }

    #[test]
    fn oversized_line_is_hard_cut_char_safe() {
        let line = "я".repeat(25);
        let chunks = split_for_platform(&line, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
        assert_eq!(chunks.concat(), line);
    }

    #[test]
    fn every_chunk_respects_budget() {
        let text = format!(
            "{}\n\n{}\n{}\n\n{}",
            "п".repeat(300),
            "x".repeat(90),
            "y".repeat(40),
            "z".repeat(10)
        );
        for budget in [10, 33, 100] {
            for chunk in split_for_platform(&text, budget) {
                assert!(chunk.chars().count() <= budget);
            }
        }
    }

    #[test]
    fn no_chunk_ends_with_lone_backslash() {
        let text = format!("{}\\\nвторая строка \\(скобка\\)", "a".repeat(9));
        let chunks = split_for_platform(&text, 10);
        for chunk in &chunks {
            assert_eq!(
                trailing_backslashes(chunk) % 2,
                0,
                "dangling escape in {chunk:?}"
            );
        }
    }

    #[test]
    fn even_backslash_tail_is_kept() {
        assert_eq!(trim_trailing_escape("ok\\\\".to_string()), "ok\\\\");
        assert_eq!(trim_trailing_escape("ok\\".to_string()), "ok");
        assert_eq!(trim_trailing_escape("ok\\\\\\".to_string()), "ok\\\\");
    }

    #[test]
    fn content_is_preserved_across_paragraph_split() {
        let paragraphs: Vec<String> = (0..8).map(|i| format!("абзац номер {i}")).collect();
        let text = paragraphs.join("\n\n");
        let chunks = split_for_platform(&text, 40);
        let rejoined = chunks.join("\n\n");
        assert_eq!(rejoined, text);
    }
}
