//! Presentation transform for right-to-left plate text.
//!
//! Arabic letters are replaced by their contextual presentation forms
//! (isolated, final, initial, medial) and the result is reordered into
//! visual order with the Unicode bidirectional algorithm. Character identity
//! is never changed, only its shape and position.

use unicode_bidi::BidiInfo;

use super::Script;
use crate::error::ShapingError;

const TATWEEL: char = '\u{0640}';
const LAM: char = '\u{0644}';

/// Presentation forms of one letter: isolated, final, initial, medial.
/// Letters that never join the following letter have no initial/medial form.
struct Forms {
    letter: char,
    isolated: char,
    last: char,
    first: Option<char>,
    middle: Option<char>,
}

const fn dual(letter: char, isolated: char, last: char, first: char, middle: char) -> Forms {
    Forms {
        letter,
        isolated,
        last,
        first: Some(first),
        middle: Some(middle),
    }
}

const fn right(letter: char, isolated: char, last: char) -> Forms {
    Forms {
        letter,
        isolated,
        last,
        first: None,
        middle: None,
    }
}

const LETTERS: &[Forms] = &[
    right('\u{0622}', '\u{FE81}', '\u{FE82}'),
    right('\u{0623}', '\u{FE83}', '\u{FE84}'),
    right('\u{0624}', '\u{FE85}', '\u{FE86}'),
    right('\u{0625}', '\u{FE87}', '\u{FE88}'),
    dual('\u{0626}', '\u{FE89}', '\u{FE8A}', '\u{FE8B}', '\u{FE8C}'),
    right('\u{0627}', '\u{FE8D}', '\u{FE8E}'),
    dual('\u{0628}', '\u{FE8F}', '\u{FE90}', '\u{FE91}', '\u{FE92}'),
    right('\u{0629}', '\u{FE93}', '\u{FE94}'),
    dual('\u{062A}', '\u{FE95}', '\u{FE96}', '\u{FE97}', '\u{FE98}'),
    dual('\u{062B}', '\u{FE99}', '\u{FE9A}', '\u{FE9B}', '\u{FE9C}'),
    dual('\u{062C}', '\u{FE9D}', '\u{FE9E}', '\u{FE9F}', '\u{FEA0}'),
    dual('\u{062D}', '\u{FEA1}', '\u{FEA2}', '\u{FEA3}', '\u{FEA4}'),
    dual('\u{062E}', '\u{FEA5}', '\u{FEA6}', '\u{FEA7}', '\u{FEA8}'),
    right('\u{062F}', '\u{FEA9}', '\u{FEAA}'),
    right('\u{0630}', '\u{FEAB}', '\u{FEAC}'),
    right('\u{0631}', '\u{FEAD}', '\u{FEAE}'),
    right('\u{0632}', '\u{FEAF}', '\u{FEB0}'),
    dual('\u{0633}', '\u{FEB1}', '\u{FEB2}', '\u{FEB3}', '\u{FEB4}'),
    dual('\u{0634}', '\u{FEB5}', '\u{FEB6}', '\u{FEB7}', '\u{FEB8}'),
    dual('\u{0635}', '\u{FEB9}', '\u{FEBA}', '\u{FEBB}', '\u{FEBC}'),
    dual('\u{0636}', '\u{FEBD}', '\u{FEBE}', '\u{FEBF}', '\u{FEC0}'),
    dual('\u{0637}', '\u{FEC1}', '\u{FEC2}', '\u{FEC3}', '\u{FEC4}'),
    dual('\u{0638}', '\u{FEC5}', '\u{FEC6}', '\u{FEC7}', '\u{FEC8}'),
    dual('\u{0639}', '\u{FEC9}', '\u{FECA}', '\u{FECB}', '\u{FECC}'),
    dual('\u{063A}', '\u{FECD}', '\u{FECE}', '\u{FECF}', '\u{FED0}'),
    dual(TATWEEL, TATWEEL, TATWEEL, TATWEEL, TATWEEL),
    dual('\u{0641}', '\u{FED1}', '\u{FED2}', '\u{FED3}', '\u{FED4}'),
    dual('\u{0642}', '\u{FED5}', '\u{FED6}', '\u{FED7}', '\u{FED8}'),
    dual('\u{0643}', '\u{FED9}', '\u{FEDA}', '\u{FEDB}', '\u{FEDC}'),
    dual(LAM, '\u{FEDD}', '\u{FEDE}', '\u{FEDF}', '\u{FEE0}'),
    dual('\u{0645}', '\u{FEE1}', '\u{FEE2}', '\u{FEE3}', '\u{FEE4}'),
    dual('\u{0646}', '\u{FEE5}', '\u{FEE6}', '\u{FEE7}', '\u{FEE8}'),
    dual('\u{0647}', '\u{FEE9}', '\u{FEEA}', '\u{FEEB}', '\u{FEEC}'),
    right('\u{0648}', '\u{FEED}', '\u{FEEE}'),
    right('\u{0649}', '\u{FEEF}', '\u{FEF0}'),
    dual('\u{064A}', '\u{FEF1}', '\u{FEF2}', '\u{FEF3}', '\u{FEF4}'),
];

/// Lam followed by an alef variant: (alef, isolated ligature, final ligature).
const LAM_ALEF: &[(char, char, char)] = &[
    ('\u{0622}', '\u{FEF5}', '\u{FEF6}'),
    ('\u{0623}', '\u{FEF7}', '\u{FEF8}'),
    ('\u{0625}', '\u{FEF9}', '\u{FEFA}'),
    ('\u{0627}', '\u{FEFB}', '\u{FEFC}'),
];

fn forms(c: char) -> Option<&'static Forms> {
    LETTERS.iter().find(|forms| forms.letter == c)
}

/// Harakat and other combining marks; they do not break joining.
fn is_transparent(c: char) -> bool {
    matches!(c, '\u{0610}'..='\u{061A}' | '\u{064B}'..='\u{065F}' | '\u{0670}')
}

fn is_supported(c: char) -> bool {
    c.is_ascii_graphic()
        || c.is_whitespace()
        || c == '\u{0621}'
        || forms(c).is_some()
        || is_transparent(c)
        || matches!(
            c,
            '\u{060C}' | '\u{061B}' | '\u{061F}'
                | '\u{0660}'..='\u{0669}'
                | '\u{06F0}'..='\u{06F9}'
                | '\u{FB50}'..='\u{FDFF}'
                | '\u{FE70}'..='\u{FEFC}'
        )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptShaper;

impl ScriptShaper {
    /// Display form of `text`. Left-to-right scripts pass through untouched.
    pub fn shape(&self, text: &str, script: Script) -> Result<String, ShapingError> {
        if !script.is_right_to_left() || text.is_empty() {
            return Ok(text.to_string());
        }

        if let Some((position, ch)) = text.chars().enumerate().find(|(_, c)| !is_supported(*c)) {
            return Err(ShapingError::Unsupported {
                ch,
                code: ch as u32,
                position,
            });
        }

        let shaped = reshape(text);
        Ok(visual_order(&shaped))
    }
}

/// Replaces every Arabic letter with its contextual form.
fn reshape(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut shaped = String::with_capacity(text.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let Some(letter) = forms(c) else {
            shaped.push(c);
            i += 1;
            continue;
        };

        let joins_previous = previous_letter(&chars, i)
            .map_or(false, |previous| previous.first.is_some());

        if c == LAM {
            if let Some((alef_index, ligature)) = lam_alef(&chars, i) {
                let (isolated, last) = ligature;
                shaped.push(if joins_previous { last } else { isolated });
                // Marks between lam and alef are kept after the ligature.
                shaped.extend(chars[i + 1..alef_index].iter());
                i = alef_index + 1;
                continue;
            }
        }

        let joins_next = letter.first.is_some() && next_letter(&chars, i).is_some();
        let form = match (joins_previous, joins_next) {
            (false, false) => letter.isolated,
            (true, false) => letter.last,
            (false, true) => letter.first.unwrap_or(letter.isolated),
            (true, true) => letter.middle.unwrap_or(letter.last),
        };
        shaped.push(form);
        i += 1;
    }

    shaped
}

fn previous_letter(chars: &[char], index: usize) -> Option<&'static Forms> {
    chars[..index]
        .iter()
        .rev()
        .find(|c| !is_transparent(**c))
        .and_then(|c| forms(*c))
}

fn next_letter(chars: &[char], index: usize) -> Option<&'static Forms> {
    chars[index + 1..]
        .iter()
        .find(|c| !is_transparent(**c))
        .and_then(|c| forms(*c))
}

fn lam_alef(chars: &[char], lam_index: usize) -> Option<(usize, (char, char))> {
    let (offset, alef) = chars[lam_index + 1..]
        .iter()
        .enumerate()
        .find(|(_, c)| !is_transparent(**c))?;
    LAM_ALEF
        .iter()
        .find(|(variant, _, _)| variant == alef)
        .map(|(_, isolated, last)| (lam_index + 1 + offset, (*isolated, *last)))
}

/// Reorders logical text into display order, paragraph by paragraph.
fn visual_order(text: &str) -> String {
    let bidi_info = BidiInfo::new(text, None);
    let mut visual = String::with_capacity(text.len());
    for paragraph in &bidi_info.paragraphs {
        let line = paragraph.range.clone();
        visual.push_str(&bidi_info.reorder_line(paragraph, line));
    }
    visual
}
