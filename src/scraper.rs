//! Pure text extraction from album HTML/XML (§4.3, C3). No I/O; every miss
//! is non-fatal (`ScrapeError`) and left for the caller to log at DEBUG.

use regex::{Regex, RegexBuilder};

use crate::error::ScrapeError;

const NO_ALBUM_ART_MARKER: &str = "no_album_art.jpg";

/// Finds the first `id = "album_art" ... "<url>"` match. Any intervening
/// `key="value"` attribute is skipped so the URL — a bare quoted token, not
/// itself an attribute value — is the one captured.
pub fn extract_cover_url(album_html: &str) -> Result<String, ScrapeError> {
    static PATTERN: &str =
        r#"id\s*=\s*"album_art"(?:\s+[^\s=]+\s*=\s*"[^"]*")*\s*"([^"]*)""#;
    let re = build_regex(PATTERN, true);
    let url = re
        .captures(album_html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ScrapeError::NoMatch)?;

    if url.contains(NO_ALBUM_ART_MARKER) {
        return Err(ScrapeError::NoMatch);
    }
    Ok(url)
}

/// Finds the first `class = "release_year" <non-digits> <4 digits>` match.
pub fn extract_year(album_html: &str) -> Result<u16, ScrapeError> {
    static PATTERN: &str = r#"class\s*=\s*"release_year"[^0-9]*([0-9]{4})"#;
    let re = build_regex(PATTERN, true);
    let digits = re
        .captures(album_html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(ScrapeError::NoMatch)?;
    digits
        .parse()
        .map_err(|_| ScrapeError::Unparsable(digits.to_string()))
}

/// Builds a regex from `title` (per §4.3's character-class rules) and
/// searches for `songTitle = "<escaped-title>" … discNum = "<d+>" …
/// trackNum = "<d+>"`, any XML attributes interleaving freely. Returns
/// `(track, disc)`.
pub fn extract_track_disc(title: &str, album_xml: &str) -> Result<(u16, u16), ScrapeError> {
    let escaped = title_to_pattern(title);
    let pattern = format!(
        r#"songTitle\s*=\s*"{escaped}".*?discNum\s*=\s*"(\d+)".*?trackNum\s*=\s*"(\d+)""#
    );
    let re = RegexBuilder::new(&pattern)
        .dot_matches_new_line(true)
        .build()
        .map_err(|_| ScrapeError::NoMatch)?;

    let caps = re.captures(album_xml).ok_or(ScrapeError::NoMatch)?;
    let disc: u16 = caps
        .get(1)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ScrapeError::Unparsable("discNum".to_string()))?;
    let track: u16 = caps
        .get(2)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| ScrapeError::Unparsable("trackNum".to_string()))?;
    Ok((track, disc))
}

/// Replaces each of `^ $ ( ) > < [ { \ | . * + &` with `.` (matches any
/// char in the built regex) and drops `?` entirely.
fn title_to_pattern(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        match c {
            '^' | '$' | '(' | ')' | '>' | '<' | '[' | '{' | '\\' | '|' | '.' | '*' | '+' | '&' => {
                out.push('.')
            }
            '?' => {}
            other => out.push(other),
        }
    }
    out
}

fn build_regex(pattern: &str, dotall: bool) -> Regex {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(dotall)
        .build()
        .expect("scraper patterns are fixed and known to compile")
}
