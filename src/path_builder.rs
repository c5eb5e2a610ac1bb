//! Template rendering and filesystem-safe name sanitization (§4.1, C1).
//!
//! Pure function: no I/O. `ContainerFormat` is a closed Rust enum, so the
//! spec's "unsupported format fails" case can't arise here — every value
//! that type-checks has a known extension.

use std::path::PathBuf;

use crate::config::{ContainerFormat, DerivedMetadata, SongContext};

const MAX_COMPONENT_BYTES: usize = 255;

/// Renders a templated audio-file path from song context and derived metadata.
pub fn render(
    song: &SongContext,
    meta: &DerivedMetadata,
    template: &str,
    use_spaces: bool,
) -> PathBuf {
    let artist = sanitize_name(&song.artist, use_spaces);
    let album = sanitize_name(&song.album, use_spaces);
    let title = sanitize_name(&song.title, use_spaces);

    // Work on raw bytes: `%` is single-byte ASCII and never equal to a UTF-8
    // continuation byte, so copying non-token runs verbatim keeps any
    // multibyte sequence in the template intact.
    let mut out: Vec<u8> = Vec::with_capacity(template.len() + artist.len() + album.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let rest = &template[i..];
        let matched = try_token(rest, "%artist", || artist.clone())
            .or_else(|| try_token(rest, "%album", || album.clone()))
            .or_else(|| try_token(rest, "%title", || title.clone()))
            .or_else(|| try_token(rest, "%02track", || format!("{:02}", meta.track)))
            .or_else(|| try_token(rest, "%track", || format!("{:02}", meta.track)))
            .or_else(|| try_token(rest, "%year", || meta.year.to_string()))
            .or_else(|| try_token(rest, "%disc", || meta.disc.to_string()));

        match matched {
            Some((value, consumed)) => {
                out.extend_from_slice(value.as_bytes());
                i += consumed;
            }
            None => {
                // Unrecognized `%x`: drop both bytes.
                i += if i + 1 < bytes.len() { 2 } else { 1 };
            }
        }
    }

    out.push(b'.');
    out.extend_from_slice(song.format.extension().as_bytes());
    PathBuf::from(String::from_utf8_lossy(&out).into_owned())
}

fn try_token(rest: &str, token: &str, value: impl FnOnce() -> String) -> Option<(String, usize)> {
    if rest.starts_with(token) {
        Some((value(), token.len()))
    } else {
        None
    }
}

/// Sanitizes one path component per §4.1, operating byte-by-byte (documented,
/// not a bug: multibyte UTF-8 continuation bytes pass through unexamined).
pub fn sanitize_name(s: &str, use_spaces: bool) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'/' | b'\\' | b'|' | b':' | b';' | b'*' | b'`' => out.push(b'-'),
            b'<' => out.push(b'('),
            b'>' => out.push(b')'),
            b' ' if !use_spaces => out.push(b'_'),
            b'"' | b'?' => {}
            other => out.push(other),
        }
        if out.len() >= MAX_COMPONENT_BYTES {
            break;
        }
    }
    out.truncate(MAX_COMPONENT_BYTES);
    // SAFETY-ish: truncation can land mid-codepoint. `String::from_utf8_lossy`
    // keeps whatever is valid and replaces a trailing partial sequence instead
    // of panicking.
    String::from_utf8_lossy(&out).into_owned()
}
