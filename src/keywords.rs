// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Free-form header content: extra keywords, COMMENT cards and HISTORY.

use fitsio::{hdu::FitsHdu, FitsFile};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{trace, warn};
use num_complex::Complex;

use crate::{
    error::UnsupportedValueError,
    io::{
        read::fits::{fits_get_header_cards, fits_get_optional_key_long_string, FitsError},
        write::{
            fits_write_bool_key, fits_write_comment, fits_write_complex_key,
            fits_write_float_key, fits_write_history, fits_write_int_key, fits_write_string_key,
        },
    },
};

/// The longest key a FITS header can hold.
pub const MAX_KEY_LEN: usize = 8;

/// Extra keywords are stored against this key when they are commentary.
pub const COMMENT_KEY: &str = "COMMENT";

/// Cards cfitsio adds on its own accord. These are not provenance supplied by
/// a user.
const CFITSIO_BOILERPLATE: &[&str] = &[
    "FITS (Flexible Image Transport System) format is defined in 'Astronomy",
    "and Astrophysics', volume 376, page 359; bibcode: 2001A&A...376..359H",
    "This FITS file may contain long string keyword values that are",
    "continued over multiple keywords.  The HEASARC convention uses the &",
    "character at the end of each substring which is then continued",
    "on the next keyword which has the name CONTINUE.",
];

/// Keys that are part of every FITS image header, or that only describe axes.
const STANDARD_KEYS: &[&str] = &[
    "SIMPLE", "BITPIX", "EXTEND", "EXTNAME", "XTENSION", "PCOUNT", "GCOUNT", "BSCALE",
    "BZERO", "LONGSTRN", "CONTINUE", "HISTORY", "END", "",
];

const AXIS_KEY_PREFIXES: &[&str] = &["NAXIS", "CTYPE", "CUNIT", "CRVAL", "CRPIX", "CDELT", "CROTA"];

/// cfitsio splits COMMENT and HISTORY text over 72 characters across cards on
/// its own, which can't be told apart from a line break when reading. Lines
/// are cut before that happens, and every card but the last of a line ends
/// with this marker.
const CARD_CONTINUATION: char = '&';

/// The most text put on a COMMENT or HISTORY card, leaving room for the
/// continuation marker.
const CARD_TEXT_LEN: usize = 70;

/// The value of an extra keyword. Only scalars can be written to a header;
/// the composite variants exist so that they can be rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(Complex<f64>),
    String(String),
    List(Vec<KeywordValue>),
    Map(IndexMap<String, KeywordValue>),
}

impl KeywordValue {
    fn composite_kind(&self) -> Option<&'static str> {
        match self {
            KeywordValue::List(_) => Some("list"),
            KeywordValue::Map(_) => Some("mapping"),
            _ => None,
        }
    }
}

impl From<bool> for KeywordValue {
    fn from(v: bool) -> Self {
        KeywordValue::Bool(v)
    }
}

impl From<i64> for KeywordValue {
    fn from(v: i64) -> Self {
        KeywordValue::Int(v)
    }
}

impl From<i32> for KeywordValue {
    fn from(v: i32) -> Self {
        KeywordValue::Int(v.into())
    }
}

impl From<f64> for KeywordValue {
    fn from(v: f64) -> Self {
        KeywordValue::Float(v)
    }
}

impl From<Complex<f64>> for KeywordValue {
    fn from(v: Complex<f64>) -> Self {
        KeywordValue::Complex(v)
    }
}

impl From<&str> for KeywordValue {
    fn from(v: &str) -> Self {
        KeywordValue::String(v.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(v: String) -> Self {
        KeywordValue::String(v)
    }
}

/// Arbitrary provenance attached to a calibration solution or beam.
pub type ExtraKeywords = IndexMap<String, KeywordValue>;

/// Ensure that all extra keywords can be written to a header.
pub(crate) fn validate_extra_keywords(
    extra_keywords: &ExtraKeywords,
    format: &'static str,
) -> Result<(), UnsupportedValueError> {
    for (key, value) in extra_keywords {
        if let Some(kind) = value.composite_kind() {
            return Err(UnsupportedValueError::CompositeKeyword {
                key: key.clone(),
                kind,
                format,
            });
        }
    }
    Ok(())
}

/// Warn about extra keywords that can't be written as they are.
pub(crate) fn check_extra_keywords(extra_keywords: &ExtraKeywords) {
    for (key, value) in extra_keywords {
        if key.len() > MAX_KEY_LEN {
            warn!("Key {key} in extra_keywords is longer than {MAX_KEY_LEN} characters. It will be truncated to {MAX_KEY_LEN} if written to a FITS file format");
        }
        if let Some(kind) = value.composite_kind() {
            warn!("{key} in extra_keywords is a {kind}; it can't be written to a FITS file format");
        }
    }
}

/// The header key that an extra keyword is written under. Keys are
/// upper-cased and cut to 8 characters; no attempt is made to detect two keys
/// becoming the same.
pub fn header_key(key: &str) -> String {
    let upper = key.to_uppercase();
    match upper.char_indices().nth(MAX_KEY_LEN) {
        Some((i, _)) => {
            warn!("Extra keyword {key} is longer than {MAX_KEY_LEN} characters; writing it as {}", &upper[..i]);
            upper[..i].to_string()
        }
        None => upper,
    }
}

#[track_caller]
pub(crate) fn write_extra_keywords(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    extra_keywords: &ExtraKeywords,
) -> Result<(), FitsError> {
    for (key, value) in extra_keywords {
        if key.eq_ignore_ascii_case(COMMENT_KEY) {
            let text = match value {
                KeywordValue::String(s) => s.clone(),
                other => format_scalar(other),
            };
            for card in split_card_text(&text) {
                fits_write_comment(fits_fptr, hdu, &card)?;
            }
            continue;
        }

        let key = header_key(key);
        match value {
            KeywordValue::Bool(v) => fits_write_bool_key(fits_fptr, hdu, &key, *v)?,
            KeywordValue::Int(v) => fits_write_int_key(fits_fptr, hdu, &key, *v)?,
            KeywordValue::Float(v) => fits_write_float_key(fits_fptr, hdu, &key, *v)?,
            KeywordValue::Complex(v) => fits_write_complex_key(fits_fptr, hdu, &key, *v)?,
            KeywordValue::String(v) => fits_write_string_key(fits_fptr, hdu, &key, v)?,
            // Rejected before anything is written.
            KeywordValue::List(_) | KeywordValue::Map(_) => (),
        }
    }
    Ok(())
}

fn format_scalar(value: &KeywordValue) -> String {
    match value {
        KeywordValue::Bool(v) => v.to_string(),
        KeywordValue::Int(v) => v.to_string(),
        KeywordValue::Float(v) => v.to_string(),
        KeywordValue::Complex(v) => v.to_string(),
        KeywordValue::String(v) => v.clone(),
        KeywordValue::List(_) | KeywordValue::Map(_) => String::new(),
    }
}

/// Write history text as HISTORY cards.
#[track_caller]
pub(crate) fn write_history(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    history: &str,
) -> Result<(), FitsError> {
    for card in split_card_text(history) {
        fits_write_history(fits_fptr, hdu, &card)?;
    }
    Ok(())
}

/// Cut multi-line text into the contents of COMMENT or HISTORY cards. Long
/// lines take several cards, joined by [`join_card_text`].
pub(crate) fn split_card_text(text: &str) -> Vec<String> {
    let mut cards = vec![];
    for line in text.lines() {
        let mut pieces: Vec<String> = line
            .chars()
            .chunks(CARD_TEXT_LEN)
            .into_iter()
            .map(|chunk| chunk.collect())
            .collect();
        // A line that really ends with the marker gets an empty last card.
        if pieces
            .last()
            .map_or(true, |piece| piece.ends_with(CARD_CONTINUATION))
        {
            pieces.push(String::new());
        }
        let last = pieces.len() - 1;
        for piece in &mut pieces[..last] {
            piece.push(CARD_CONTINUATION);
        }
        // cfitsio doesn't write a card for empty text.
        cards.extend(
            pieces
                .into_iter()
                .map(|piece| if piece.is_empty() { " ".to_string() } else { piece }),
        );
    }
    cards
}

/// The inverse of [`split_card_text`].
pub(crate) fn join_card_text<S: AsRef<str>>(cards: &[S]) -> String {
    let mut lines = vec![];
    let mut line = String::new();
    let mut continued = false;
    for card in cards {
        let card = card.as_ref();
        match card.strip_suffix(CARD_CONTINUATION) {
            Some(piece) => {
                line.push_str(piece);
                continued = true;
            }
            None => {
                line.push_str(card);
                lines.push(std::mem::take(&mut line));
                continued = false;
            }
        }
    }
    if continued {
        lines.push(line);
    }
    lines.join("\n")
}

/// Is this one of the keys that every FITS image has, or an axis key?
pub(crate) fn is_standard_key(key: &str) -> bool {
    STANDARD_KEYS.contains(&key)
        || AXIS_KEY_PREFIXES.iter().any(|prefix| {
            key.strip_prefix(prefix)
                .map(|rest| rest.is_empty() || rest.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false)
        })
}

/// Read the HISTORY text and the extra keywords of a header. Keys for which
/// `is_reserved` returns true are ones the caller reads itself.
#[track_caller]
pub(crate) fn read_history_and_extra_keywords(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    is_reserved: impl Fn(&str) -> bool,
) -> Result<(String, ExtraKeywords), FitsError> {
    let cards = fits_get_header_cards(fits_fptr, hdu)?;

    let mut history = vec![];
    let mut comments = vec![];
    let mut extra_keywords = ExtraKeywords::new();
    for card in cards {
        match card.name.as_str() {
            "HISTORY" => history.push(card.comment.trim_end().to_string()),
            COMMENT_KEY => {
                let text = card.comment.trim_end();
                if !CFITSIO_BOILERPLATE.contains(&text.trim()) {
                    comments.push(text.to_string());
                }
            }
            name if is_standard_key(name) || is_reserved(name) => (),
            name => {
                let value = if card.value.starts_with('\'') {
                    // Re-read strings so that CONTINUE cards are included.
                    let s = fits_get_optional_key_long_string(fits_fptr, hdu, name)?
                        .unwrap_or_default();
                    KeywordValue::String(s)
                } else {
                    parse_card_value(&card.value)
                };
                trace!("Extra keyword {name} = {value:?}");
                extra_keywords.insert(name.to_string(), value);
            }
        }
    }
    if !comments.is_empty() {
        extra_keywords.insert(COMMENT_KEY.to_string(), KeywordValue::String(join_card_text(&comments)));
    }

    Ok((join_card_text(&history), extra_keywords))
}

/// Type a non-string header value.
fn parse_card_value(value: &str) -> KeywordValue {
    let value = value.trim();
    match value {
        "T" => return KeywordValue::Bool(true),
        "F" => return KeywordValue::Bool(false),
        _ => (),
    }

    if let Some((re, im)) = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .and_then(|v| v.split_once(','))
    {
        if let (Some(re), Some(im)) = (parse_float(re), parse_float(im)) {
            return KeywordValue::Complex(Complex::new(re, im));
        }
    }

    if let Ok(i) = value.parse::<i64>() {
        return KeywordValue::Int(i);
    }
    match parse_float(value) {
        Some(f) => KeywordValue::Float(f),
        None => KeywordValue::String(value.to_string()),
    }
}

/// FITS allows a 'D' exponent.
fn parse_float(s: &str) -> Option<f64> {
    s.trim().replace(['D', 'd'], "E").parse().ok()
}

/// Is `stamp` already part of `history`? Whitespace is ignored, as history
/// may have been re-wrapped.
pub(crate) fn history_contains(history: &str, stamp: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<String>();
    squash(history).contains(&squash(stamp))
}

/// Append the version stamp to the history, unless it's already there.
pub(crate) fn stamp_history(history: &mut String, stamp: &str) {
    if history_contains(history, stamp) {
        return;
    }
    if !history.is_empty() && !history.ends_with('\n') {
        history.push('\n');
    }
    history.push_str(stamp);
}
