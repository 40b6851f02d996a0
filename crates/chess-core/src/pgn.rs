//! Lightweight PGN import for the analysis board: pull SAN moves out of a
//! pasted game so a move tree can be seeded from them.

use regex::Regex;

use crate::wire::TimeControl;

/// Extract SAN moves from PGN text, ignoring headers, comments, NAGs and
/// nested variations. Ordering follows the main line.
pub fn extract_san_moves(pgn: &str) -> Vec<String> {
    let header_re = Regex::new(r"\[[^\]]*\]").unwrap();
    let stripped = header_re.replace_all(pgn, "");

    let comment_re = Regex::new(r"\{[^}]*\}").unwrap();
    let stripped = comment_re.replace_all(&stripped, "");

    // One level of nesting per pass is enough for real-world exports.
    let variation_re = Regex::new(r"\([^()]*\)").unwrap();
    let mut text = stripped.to_string();
    loop {
        let next = variation_re.replace_all(&text, "").to_string();
        if next == text {
            break;
        }
        text = next;
    }

    let move_re =
        Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?[+#]?|O-O-O|O-O").unwrap();
    move_re
        .find_iter(&text)
        .map(|m| m.as_str().trim_end_matches(['+', '#']).to_string())
        .collect()
}

/// Extract a single header value, e.g. `extract_header(pgn, "TimeControl")`.
pub fn extract_header(pgn: &str, header_name: &str) -> Option<String> {
    let pattern = format!(r#"\[{}\s+"([^"]*)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(pgn)?.get(1)?.as_str().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Time control advertised by the PGN, e.g. `[TimeControl "5+3"]`.
pub fn extract_time_control(pgn: &str) -> Option<TimeControl> {
    let raw = extract_header(pgn, "TimeControl")?;
    TimeControl::parse(&raw).ok()
}
