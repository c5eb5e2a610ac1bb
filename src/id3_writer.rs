//! ID3v2.4 tag builder and bit-exact prepend writer (§4.5, C5).
//!
//! Binary layout follows the `byteorder`/big-endian idiom the pack's MP4
//! atom editors use (`examples/other_examples/...Saecki-mp4ameta...atom.rs`),
//! applied here to ID3 frames instead of MP4 boxes.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::TagError;

const HEADER_LEN: usize = 10;
const FRAME_HEADER_LEN: usize = 10;
const COPY_BLOCK: usize = 100 * 1024;
const PICTURE_TYPE_FRONT_COVER: u8 = 3;

/// Embedded cover image, bytes verbatim (§4.5 APIC field population).
#[derive(Clone, Debug)]
pub struct CoverImage {
    pub data: Vec<u8>,
}

impl CoverImage {
    fn mime_type(&self) -> &'static str {
        if self.data.starts_with(&[0xFF, 0xD8]) {
            "image/jpeg"
        } else if self
            .data
            .starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])
        {
            "image/png"
        } else {
            ""
        }
    }
}

/// The fields an ID3v2 tag is built from (§3 "ID3 tag").
#[derive(Clone, Debug, Default)]
pub struct Id3Tag {
    pub artist: String,
    pub album: String,
    pub title: String,
    /// 0 = omit the TYER frame.
    pub year: u16,
    /// 0 = omit the TRCK frame.
    pub track: u16,
    /// 0 = omit the TPOS frame.
    pub disc: u16,
    pub cover: Option<CoverImage>,
}

/// Renders the full tag (header + frames), with unsynchronisation applied
/// to the frame data. Calling this twice on the same `Id3Tag` is guaranteed
/// to produce identical bytes (§8 "ID3 size stability").
pub fn render(tag: &Id3Tag) -> Vec<u8> {
    let mut frames = Vec::new();
    frames.extend(text_frame(b"TPE1", &tag.artist));
    frames.extend(text_frame(b"TALB", &tag.album));
    frames.extend(text_frame(b"TIT2", &tag.title));
    if tag.year != 0 {
        frames.extend(text_frame(b"TYER", &tag.year.to_string()));
    }
    if tag.track != 0 {
        frames.extend(text_frame(b"TRCK", &tag.track.to_string()));
    }
    if tag.disc != 0 {
        frames.extend(text_frame(b"TPOS", &tag.disc.to_string()));
    }
    if let Some(cover) = &tag.cover {
        frames.extend(apic_frame(cover));
    }

    let unsynced = apply_unsynchronisation(&frames);

    let mut out = Vec::with_capacity(HEADER_LEN + unsynced.len());
    out.extend_from_slice(b"ID3");
    out.push(4); // major version
    out.push(0); // revision
    out.push(0x80); // flags: unsynchronisation set; no extended header/experimental/footer
    out.extend_from_slice(&synchsafe(unsynced.len() as u32));
    out.extend_from_slice(&unsynced);
    out
}

fn text_frame(id: &[u8; 4], value: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + value.len());
    body.push(0x00); // ISO-8859-1 encoding
    body.extend(to_latin1(value));
    encode_frame(id, &body)
}

fn apic_frame(cover: &CoverImage) -> Vec<u8> {
    let mime = cover.mime_type();
    let mut body = Vec::with_capacity(1 + mime.len() + 1 + 1 + 1 + cover.data.len());
    body.push(0x00); // ISO-8859-1 encoding
    body.extend(to_latin1(mime));
    body.push(0x00); // MIME type terminator
    body.push(PICTURE_TYPE_FRONT_COVER);
    body.push(0x00); // empty description, terminated
    body.extend_from_slice(&cover.data);
    encode_frame(b"APIC", &body)
}

fn encode_frame(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(id);
    out.extend_from_slice(&synchsafe(body.len() as u32));
    out.write_u16::<BigEndian>(0).expect("writing to a Vec never fails");
    out.extend_from_slice(body);
    out
}

/// ID3v2.4 synchsafe integer: 4 bytes, 7 usable bits each, MSB-first.
fn synchsafe(n: u32) -> [u8; 4] {
    [
        ((n >> 21) & 0x7F) as u8,
        ((n >> 14) & 0x7F) as u8,
        ((n >> 7) & 0x7F) as u8,
        (n & 0x7F) as u8,
    ]
}

/// Lossily maps a `str` to ISO-8859-1 bytes: code points above U+00FF have
/// no Latin-1 representation and become `?`.
fn to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
        .collect()
}

/// Standard ID3v2 unsynchronisation scheme: a zero byte is inserted after
/// every `0xFF` that is followed by a byte with its top three bits set
/// (a false MPEG sync), and after every `0xFF` followed by a literal
/// `0x00` (so the decoder's "drop the 0x00 after 0xFF" rule can't eat real
/// data).
fn apply_unsynchronisation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (i, &b) in data.iter().enumerate() {
        out.push(b);
        if b == 0xFF {
            if let Some(&next) = data.get(i + 1) {
                if (next & 0xE0) == 0xE0 || next == 0x00 {
                    out.push(0x00);
                }
            }
        }
    }
    out
}

/// Prepends the tag to `audio_path` without rewriting the audio stream in
/// place (§4.5 "On-disk write"). Any failure removes the temp file and
/// leaves `audio_path` untouched.
pub fn write_to(tag: &Id3Tag, audio_path: &Path) -> Result<(), TagError> {
    let first = render(tag);
    let size1 = first.len();
    let second = render(tag);
    debug_assert_eq!(second.len(), size1, "ID3 render must be size-stable");

    let temp_path = temp_path_for(audio_path);
    let result = write_to_temp(&second, audio_path, &temp_path);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_to_temp(tag_bytes: &[u8], audio_path: &Path, temp_path: &Path) -> Result<(), TagError> {
    let mut temp = File::create(temp_path)?;
    temp.write_all(tag_bytes)?;

    let mut source = File::open(audio_path)?;
    let mut buf = vec![0u8; COPY_BLOCK];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        temp.write_all(&buf[..n])?;
    }
    temp.sync_all()?;
    drop(temp);

    fs::rename(temp_path, audio_path)?;
    Ok(())
}

fn temp_path_for(audio_path: &Path) -> std::path::PathBuf {
    let mut name = audio_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tagtmp", std::process::id()));
    audio_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn render_is_size_stable() {
        let tag = Id3Tag {
            artist: "X".into(),
            album: "Y".into(),
            title: "Z".into(),
            ..Default::default()
        };
        let a = render(&tag);
        let b = render(&tag);
        assert_eq!(a, b);
    }

    #[test]
    fn minimal_tag_has_expected_size() {
        let tag = Id3Tag {
            artist: "X".into(),
            title: "Y".into(),
            ..Default::default()
        };
        let bytes = render(&tag);
        // header(10) + TPE1 frame(10 + 1 + 1) + TALB frame(10 + 1 + 0) + TIT2 frame(10 + 1 + 1)
        assert_eq!(bytes.len(), 10 + 12 + 11 + 12);
        assert_eq!(&bytes[0..3], b"ID3");
        assert_eq!(bytes[5], 0x80);
    }

    #[test]
    fn omits_zero_numeric_frames() {
        let tag = Id3Tag {
            artist: "X".into(),
            title: "Y".into(),
            ..Default::default()
        };
        let bytes = render(&tag);
        assert!(!contains_frame_id(&bytes, b"TYER"));
        assert!(!contains_frame_id(&bytes, b"TRCK"));
        assert!(!contains_frame_id(&bytes, b"TPOS"));
    }

    #[test]
    fn includes_numeric_frames_when_present() {
        let tag = Id3Tag {
            artist: "X".into(),
            title: "Y".into(),
            year: 1999,
            track: 3,
            disc: 1,
            ..Default::default()
        };
        let bytes = render(&tag);
        assert!(contains_frame_id(&bytes, b"TYER"));
        assert!(contains_frame_id(&bytes, b"TRCK"));
        assert!(contains_frame_id(&bytes, b"TPOS"));
    }

    #[test]
    fn apic_mime_detected_by_magic_bytes() {
        let jpeg_tag = Id3Tag {
            cover: Some(CoverImage {
                data: vec![0xFF, 0xD8, 0x01, 0x02],
            }),
            ..Default::default()
        };
        let bytes = render(&jpeg_tag);
        let apic_pos = find_frame_id(&bytes, b"APIC").unwrap();
        let body_start = apic_pos + FRAME_HEADER_LEN;
        // encoding(1) + "image/jpeg"(10) + nul(1)
        assert_eq!(&bytes[body_start + 1..body_start + 11], b"image/jpeg");
    }

    #[test]
    fn unsynchronisation_escapes_false_sync() {
        let data = [0xFF, 0xE0, 0x01];
        let out = apply_unsynchronisation(&data);
        assert_eq!(out, vec![0xFF, 0x00, 0xE0, 0x01]);
    }

    #[test]
    fn unsynchronisation_escapes_literal_ff_00() {
        let data = [0xFF, 0x00];
        let out = apply_unsynchronisation(&data);
        assert_eq!(out, vec![0xFF, 0x00, 0x00]);
    }

    #[test]
    fn write_to_prepends_tag_to_existing_audio() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("song.mp3");
        fs::write(&audio_path, b"FAKE-MPEG-FRAMES").unwrap();

        let tag = Id3Tag {
            artist: "Artist".into(),
            album: "Album".into(),
            title: "Title".into(),
            ..Default::default()
        };
        write_to(&tag, &audio_path).unwrap();

        let mut contents = Vec::new();
        File::open(&audio_path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert!(contents.starts_with(b"ID3"));
        assert!(contents.ends_with(b"FAKE-MPEG-FRAMES"));
    }

    fn find_frame_id(bytes: &[u8], id: &[u8; 4]) -> Option<usize> {
        let frames = &bytes[HEADER_LEN..];
        let mut i = 0;
        while i + FRAME_HEADER_LEN <= frames.len() {
            if &frames[i..i + 4] == id {
                return Some(HEADER_LEN + i);
            }
            let size = synchsafe_decode(&frames[i + 4..i + 8]);
            i += FRAME_HEADER_LEN + size as usize;
        }
        None
    }

    fn contains_frame_id(bytes: &[u8], id: &[u8; 4]) -> bool {
        find_frame_id(bytes, id).is_some()
    }

    fn synchsafe_decode(bytes: &[u8]) -> u32 {
        ((bytes[0] as u32) << 21)
            | ((bytes[1] as u32) << 14)
            | ((bytes[2] as u32) << 7)
            | (bytes[3] as u32)
    }
}
