//! Four-byte MP4/ISO-BMFF atom identifiers (§4.6, C6).
//!
//! Grounded on `examples/other_examples/...Saecki-mp4ameta__src-core-atom.rs`,
//! which defines the same constants as a newtype over `[u8; 4]`.

use std::fmt;

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Ident(pub [u8; 4]);

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|&b| b as char).collect::<String>())
    }
}

pub const FTYP: Ident = Ident(*b"ftyp");
pub const MDAT: Ident = Ident(*b"mdat");
pub const MOOV: Ident = Ident(*b"moov");
pub const TRAK: Ident = Ident(*b"trak");
pub const MDIA: Ident = Ident(*b"mdia");
pub const MINF: Ident = Ident(*b"minf");
pub const STBL: Ident = Ident(*b"stbl");
pub const STCO: Ident = Ident(*b"stco");
pub const CO64: Ident = Ident(*b"co64");
pub const UDTA: Ident = Ident(*b"udta");
pub const META: Ident = Ident(*b"meta");
pub const HDLR: Ident = Ident(*b"hdlr");
pub const ILST: Ident = Ident(*b"ilst");
pub const DATA: Ident = Ident(*b"data");

// §4.6 "Parsing" classification table — every other name recognized while
// descending through `moov`, besides the ones above. Container-only/
// payload-only/mixed all get copied through untouched by this editor; the
// only thing that matters here is that they are *known*, so anything not
// in this list (plus the idents above) is a fatal parse error.
pub const DINF: Ident = Ident(*b"dinf");
pub const DREF: Ident = Ident(*b"dref");
pub const ESDS: Ident = Ident(*b"esds");
pub const IODS: Ident = Ident(*b"iods");
pub const MDHD: Ident = Ident(*b"mdhd");
pub const MVHD: Ident = Ident(*b"mvhd");
pub const SMHD: Ident = Ident(*b"smhd");
pub const STSC: Ident = Ident(*b"stsc");
pub const STSZ: Ident = Ident(*b"stsz");
pub const STTS: Ident = Ident(*b"stts");
pub const TKHD: Ident = Ident(*b"tkhd");
pub const STSD: Ident = Ident(*b"stsd");
pub const MP4A: Ident = Ident(*b"mp4a");

// iTunes-style metadata item atoms (§4.6 field table).
pub const ARTIST: Ident = Ident(*b"\xa9ART");
pub const ALBUM: Ident = Ident(*b"\xa9alb");
pub const TITLE: Ident = Ident(*b"\xa9nam");
pub const YEAR: Ident = Ident(*b"\xa9day");
pub const TRACK_NUMBER: Ident = Ident(*b"trkn");
pub const DISC_NUMBER: Ident = Ident(*b"disk");
pub const ARTWORK: Ident = Ident(*b"covr");
