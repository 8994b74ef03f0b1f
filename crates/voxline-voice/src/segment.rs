//! Text segmentation and pre-synthesis text preparation.

/// One clause of response text, synthesized independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub text: String,
}

/// Splits on whitespace that follows `.`, `!` or `?`, trimming each clause
/// and dropping empty ones.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            let clause = text[start..i].trim();
            if !clause.is_empty() {
                sentences.push(clause);
            }
            while chars.next_if(|&(_, n)| n.is_whitespace()).is_some() {}
            start = chars.peek().map_or(text.len(), |&(j, _)| j);
            prev = None;
            continue;
        }
        prev = Some(c);
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Packs words greedily into chunks of at most `max_chars` characters.
/// A word longer than the budget becomes a chunk of its own.
fn pack_words(clause: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0;

    for word in clause.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            out.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}

/// Splits response text into ordered segments of at most `max_chars`
/// characters each, breaking at sentence boundaries first and at word
/// boundaries inside overlong sentences.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<Segment> {
    let mut parts = Vec::new();
    for sentence in split_sentences(text) {
        if sentence.chars().count() <= max_chars {
            parts.push(sentence.to_string());
        } else {
            pack_words(sentence, max_chars, &mut parts);
        }
    }

    parts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Segment { index, text })
        .collect()
}

/// Whether `text` should skip segmentation and go out as one fetch: it is
/// at most `short_chars` characters long, or has at most two sentences.
pub fn is_short_text(text: &str, short_chars: usize) -> bool {
    text.trim().chars().count() <= short_chars || split_sentences(text).len() <= 2
}

const UNITS: [(&str, &str); 6] = [
    ("km", "kilomeetrit"),
    ("kg", "kilogrammi"),
    ("cm", "sentimeetrit"),
    ("mm", "millimeetrit"),
    ("m", "meetrit"),
    ("h", "tundi"),
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Reads a run of digits starting at `i`, turning any `.` between digits
/// into a decimal comma. Returns the number text and the index after it.
fn read_number(chars: &[char], mut i: usize) -> (String, usize) {
    let mut number = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            number.push(c);
            i += 1;
        } else if c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            number.push(',');
            i += 1;
        } else {
            break;
        }
    }
    (number, i)
}

fn skip_spaces(chars: &[char], mut i: usize) -> usize {
    while chars.get(i) == Some(&' ') {
        i += 1;
    }
    i
}

/// Matches a unit abbreviation at `i` (case-insensitive, ending on a word
/// boundary). Returns its spoken form and the index after it.
fn match_unit(chars: &[char], i: usize) -> Option<(&'static str, usize)> {
    UNITS.iter().find_map(|(abbr, spoken)| {
        let len = abbr.len();
        let candidate = chars.get(i..i + len)?;
        let matches = candidate
            .iter()
            .zip(abbr.chars())
            .all(|(c, a)| c.to_ascii_lowercase() == a);
        let bounded = chars.get(i + len).map_or(true, |&n| !is_word_char(n));
        (matches && bounded).then_some((*spoken, i + len))
    })
}

/// Normalizes response text for Estonian speech synthesis.
///
/// Collapses whitespace, writes decimals with a comma, and spells out `%`,
/// `€` and the common metric unit abbreviations that follow a number.
pub fn prepare_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    let mut out = String::with_capacity(collapsed.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_ascii_digit() {
            let (number, end) = read_number(&chars, i);
            let after = skip_spaces(&chars, end);
            out.push_str(&number);

            match chars.get(after) {
                Some('%') => {
                    out.push_str(" protsenti");
                    i = after + 1;
                }
                Some('€') => {
                    out.push_str(" eurot");
                    i = after + 1;
                }
                _ => match match_unit(&chars, after) {
                    Some((spoken, next)) => {
                        out.push(' ');
                        out.push_str(spoken);
                        i = next;
                    }
                    None => i = end,
                },
            }
            continue;
        }

        if c == '€' {
            let start = skip_spaces(&chars, i + 1);
            if chars.get(start).is_some_and(|n| n.is_ascii_digit()) {
                let (number, end) = read_number(&chars, start);
                out.push_str(&number);
                out.push_str(" eurot");
                i = end;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}
