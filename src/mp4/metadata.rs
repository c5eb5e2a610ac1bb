//! iTunes-style `ilst` item encoding (§4.6 field table).
//!
//! Grounded on the atom templates in
//! `examples/other_examples/...Saecki-mp4ameta__src-core-atom.rs`
//! (`data_atom`/`mean_atom`/`name_atom`, the `ContentT::TypedData` variant)
//! translated into flat byte builders instead of a template tree, since this
//! module only ever writes, never parses, item atoms. Big-endian fields are
//! written with `byteorder`, matching the idiom the cited reference uses.

use byteorder::{BigEndian, WriteBytesExt};

use super::ident::{self, Ident};

const TEXT_TYPE: u32 = 1;
const BINARY_TYPE: u32 = 0;
/// Class byte for `covr` data atoms. Not the usual iTunes 13/14 (JPEG/PNG)
/// split — the class is fixed at `0x15` regardless of image format.
const COVER_TYPE: u32 = 0x15;

/// The metadata fields this crate is able to embed into an `ilst` atom.
/// `year`/`track`/`disc` of `0` omit their item atoms; `cover` of `None`
/// omits `covr`.
#[derive(Clone, Debug, Default)]
pub struct Mp4Metadata {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub year: u16,
    pub track: u16,
    pub disc: u16,
    pub cover: Option<Vec<u8>>,
}

/// Builds a full `ilst` atom (header included) from the populated fields.
pub fn build_ilst(fields: &Mp4Metadata) -> Vec<u8> {
    let mut items = Vec::new();
    items.extend(text_item(ident::ARTIST, &fields.artist));
    items.extend(text_item(ident::ALBUM, &fields.album));
    items.extend(text_item(ident::TITLE, &fields.title));
    if fields.year != 0 {
        items.extend(text_item(ident::YEAR, &fields.year.to_string()));
    }
    if fields.track != 0 {
        items.extend(trkn_item(fields.track));
    }
    if fields.disc != 0 {
        items.extend(disk_item(fields.disc));
    }
    if let Some(cover) = &fields.cover {
        items.extend(covr_item(cover));
    }
    wrap_atom(ident::ILST, &items)
}

/// Builds a fixed `hdlr` atom declaring the metadata handler (`mdir`), used
/// when inserting metadata into a file whose `udta`/`meta` chain doesn't
/// already carry one.
pub fn build_hdlr() -> Vec<u8> {
    let mut body = Vec::with_capacity(25);
    body.extend_from_slice(&[0, 0, 0, 0]); // version + flags
    body.extend_from_slice(&[0, 0, 0, 0]); // pre_defined
    body.extend_from_slice(b"mdir");
    body.extend_from_slice(&[0u8; 12]); // reserved
    body.push(0); // empty, null-terminated component name
    wrap_atom(ident::HDLR, &body)
}

/// Builds a `meta` atom wrapping an optional freshly built `hdlr` and the
/// `ilst` bytes. `meta`'s content starts with a 4-byte version/flags field.
pub fn build_meta(hdlr: Option<Vec<u8>>, ilst: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + ilst.len());
    body.extend_from_slice(&[0, 0, 0, 0]);
    if let Some(h) = hdlr {
        body.extend_from_slice(&h);
    }
    body.extend_from_slice(ilst);
    wrap_atom(ident::META, &body)
}

/// Builds a `udta` atom wrapping a freshly built `meta`.
pub fn build_udta(meta: &[u8]) -> Vec<u8> {
    wrap_atom(ident::UDTA, meta)
}

fn text_item(ident: Ident, value: &str) -> Vec<u8> {
    data_item(ident, TEXT_TYPE, value.as_bytes())
}

fn trkn_item(track: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.write_u16::<BigEndian>(0).expect("writing to a Vec never fails");
    payload.write_u16::<BigEndian>(track).expect("writing to a Vec never fails");
    payload.write_u32::<BigEndian>(0).expect("writing to a Vec never fails");
    data_item(ident::TRACK_NUMBER, BINARY_TYPE, &payload)
}

fn disk_item(disc: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.write_u16::<BigEndian>(0).expect("writing to a Vec never fails");
    payload.write_u16::<BigEndian>(disc).expect("writing to a Vec never fails");
    payload.write_u32::<BigEndian>(0).expect("writing to a Vec never fails");
    data_item(ident::DISC_NUMBER, BINARY_TYPE, &payload)
}

fn covr_item(cover: &[u8]) -> Vec<u8> {
    data_item(ident::ARTWORK, COVER_TYPE, cover)
}

fn data_item(ident: Ident, type_code: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + payload.len());
    body.write_u32::<BigEndian>(type_code).expect("writing to a Vec never fails");
    body.write_u32::<BigEndian>(0).expect("writing to a Vec never fails"); // locale
    body.extend_from_slice(payload);
    let data_atom = wrap_atom(ident::DATA, &body);
    wrap_atom(ident, &data_atom)
}

fn wrap_atom(ident: Ident, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.write_u32::<BigEndian>(8 + payload.len() as u32)
        .expect("writing to a Vec never fails");
    out.extend_from_slice(&ident.0);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_item_roundtrips_shape() {
        let item = text_item(ident::ARTIST, "X");
        // ilst-item(8) + data-atom(8) + type(4) + locale(4) + "X"(1)
        assert_eq!(item.len(), 8 + 8 + 4 + 4 + 1);
        assert_eq!(&item[4..8], b"\xa9ART");
        assert_eq!(&item[8 + 4..8 + 8], b"data");
    }

    #[test]
    fn trkn_encodes_track_number_big_endian() {
        let item = trkn_item(300);
        let data_payload = &item[16..];
        assert_eq!(data_payload[2], (300u16 >> 8) as u8);
        assert_eq!(data_payload[3], 300u16 as u8);
    }

    #[test]
    fn covr_uses_fixed_class_byte_regardless_of_format() {
        let jpeg = covr_item(&[0xFF, 0xD8, 0x00]);
        assert_eq!(u32::from_be_bytes(jpeg[16..20].try_into().unwrap()), COVER_TYPE);

        let png = covr_item(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(u32::from_be_bytes(png[16..20].try_into().unwrap()), COVER_TYPE);
    }

    #[test]
    fn build_ilst_omits_zero_fields() {
        let fields = Mp4Metadata {
            artist: "A".into(),
            album: "B".into(),
            title: "C".into(),
            ..Default::default()
        };
        let ilst = build_ilst(&fields);
        assert!(!contains(&ilst, b"trkn"));
        assert!(!contains(&ilst, b"disk"));
        assert!(!contains(&ilst, b"covr"));
    }

    fn contains(bytes: &[u8], needle: &[u8; 4]) -> bool {
        bytes.windows(4).any(|w| w == needle)
    }
}
