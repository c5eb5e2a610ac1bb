//! MP4/ISO-BMFF atom-tree editor (§4.6, C6): locates the `udta/meta/ilst`
//! chain, rewrites it via a temp file, and patches `stco` chunk offsets when
//! the size change shifts the sample data that follows `moov`.
//!
//! The byte-range "bounds" scan below is deliberately flat rather than a
//! fully materialized parent/child atom tree — it only ever tracks the
//! handful of atoms whose size changes (`moov`, `udta`, `meta`) or whose
//! payload needs patching (`stco`), the same scope the write-path in
//! `examples/other_examples/...Saecki-mp4ameta__src-atom-mod.rs` covers,
//! translated from its per-atom struct hierarchy into position/length pairs.
//! Everything else is copied through untouched. Big-endian fields are read
//! and written with `byteorder`, matching that reference's idiom.

mod ident;
mod metadata;

pub use metadata::Mp4Metadata;

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use ident::Ident;

use crate::error::TagError;

const COPY_BLOCK: usize = 100 * 1024;

/// Position and on-disk length (header included) of an atom we may need to
/// resize or overwrite.
#[derive(Clone, Copy, Debug)]
struct AtomBounds {
    pos: u64,
    len: u64,
}

impl AtomBounds {
    fn end(&self) -> u64 {
        self.pos + self.len
    }
}

#[derive(Default)]
struct MoovLayout {
    bounds: Option<AtomBounds>,
    udta: Option<AtomBounds>,
    meta: Option<AtomBounds>,
    hdlr: Option<AtomBounds>,
    ilst: Option<AtomBounds>,
    stco_positions: Vec<u64>,
    co64_found: bool,
}

/// Whether an atom name encountered while descending through `moov` is one
/// this editor knows about (§4.6 "Parsing" classification). Every known name
/// is copied through untouched unless this editor has a specific reason to
/// look inside it (`trak`, `udta`, `meta`, `stbl`); an unknown name is a
/// fatal parse error rather than silently skipped.
fn is_known_moov_descendant(id: Ident) -> bool {
    matches!(
        id,
        ident::DINF
            | ident::MDIA
            | ident::MINF
            | ident::STBL
            | ident::TRAK
            | ident::UDTA
            | ident::META
            | ident::HDLR
            | ident::ILST
            | ident::DREF
            | ident::ESDS
            | ident::IODS
            | ident::MDHD
            | ident::MVHD
            | ident::SMHD
            | ident::STCO
            | ident::CO64
            | ident::STSC
            | ident::STSZ
            | ident::STTS
            | ident::TKHD
            | ident::STSD
            | ident::MP4A
    )
}

fn fatal_unknown_atom(id: Ident) -> TagError {
    TagError::MalformedContainer(format!("unrecognized atom `{id:?}` encountered inside moov"))
}

/// Rewrites the `moov/udta/meta/ilst` metadata chain of the MP4 container at
/// `path` to carry `fields`, preserving every other byte. Builds the new
/// file in a temp file in the same directory and renames it over `path` only
/// on success (§4.6 "Render"); any error leaves `path` byte-identical to its
/// pre-call state. Fails with `TagError::UnsupportedChunkOffsetTable` if any
/// track uses 64-bit (`co64`) chunk offsets (§9 open question: such files
/// are rejected rather than silently mis-patched).
pub fn write_tag(path: &Path, fields: &Mp4Metadata) -> Result<(), TagError> {
    let temp_path = temp_path_for(path);
    let result = render_to_temp(path, &temp_path, fields);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn render_to_temp(path: &Path, temp_path: &Path, fields: &Mp4Metadata) -> Result<(), TagError> {
    let mut file = File::open(path)?;

    let file_len = file.seek(SeekFrom::End(0))?;
    assert_ftyp_then_moov(&mut file, file_len)?;

    let mut moov = MoovLayout::default();
    let mut mdat_pos = 0u64;

    for_each_child(&mut file, 0, file_len, |reader, ident, bounds, content_start, content_end| {
        match ident {
            ident::MOOV => {
                moov.bounds = Some(bounds);
                scan_moov(reader, content_start, content_end, &mut moov)?;
            }
            ident::MDAT => {
                mdat_pos = bounds.pos;
            }
            _ => {}
        }
        Ok(())
    })?;

    if moov.co64_found {
        return Err(TagError::UnsupportedChunkOffsetTable);
    }
    let moov_bounds = moov
        .bounds
        .ok_or_else(|| TagError::MalformedContainer("no moov atom found".into()))?;

    let new_ilst = metadata::build_ilst(fields);
    let new_hdlr = if moov.hdlr.is_none() {
        Some(metadata::build_hdlr())
    } else {
        None
    };

    let mut new_atoms_start = moov_bounds.end();
    let mut moved_data_start = moov_bounds.end();
    let mut len_diff: i64 = 0;
    let mut update_positions = Vec::new();

    let mut new_meta = None;
    let mut new_udta = None;
    let mut hdlr_for_fallback = new_hdlr.clone();

    if let Some(ilst) = moov.ilst {
        new_atoms_start = ilst.pos;
        moved_data_start = ilst.end();
        len_diff -= ilst.len as i64;
    }

    match moov.meta {
        Some(meta) => {
            update_positions.push(meta);
            if moov.ilst.is_none() {
                new_atoms_start = meta.end();
                moved_data_start = meta.end();
            }
        }
        None => {
            new_meta = Some(metadata::build_meta(new_hdlr, &new_ilst));
            hdlr_for_fallback = None;
        }
    }

    match moov.udta {
        Some(udta) => {
            update_positions.push(udta);
            if moov.meta.is_none() {
                new_atoms_start = udta.end();
                moved_data_start = udta.end();
            }
        }
        None => {
            let meta_bytes = new_meta
                .take()
                .unwrap_or_else(|| metadata::build_meta(hdlr_for_fallback.take(), &new_ilst));
            new_udta = Some(metadata::build_udta(&meta_bytes));
            new_atoms_start = moov_bounds.end();
            moved_data_start = moov_bounds.end();
        }
    }
    update_positions.push(moov_bounds);

    let new_atoms_bytes: Vec<u8> = if let Some(a) = new_udta {
        a
    } else if let Some(a) = new_meta {
        a
    } else {
        let mut bytes = Vec::new();
        if let Some(h) = hdlr_for_fallback {
            bytes.extend_from_slice(&h);
        }
        bytes.extend_from_slice(&new_ilst);
        bytes
    };
    len_diff += new_atoms_bytes.len() as i64;

    let patch_stco = mdat_pos > moov_bounds.pos && len_diff != 0;

    // `new_atoms_start` is always inside the already-scanned `moov` subtree
    // (it's the end of `ilst`, `meta`, `udta`, or `moov` itself), so every
    // size field and `stco` table we need to patch lives in this span; it
    // holds only metadata, never audio data, so buffering it is cheap.
    file.seek(SeekFrom::Start(0))?;
    let mut header_span = vec![0u8; new_atoms_start as usize];
    file.read_exact(&mut header_span)?;

    for bounds in &update_positions {
        let new_len = (bounds.len as i64 + len_diff) as u32;
        let at = bounds.pos as usize;
        BigEndian::write_u32(&mut header_span[at..at + 4], new_len);
    }

    if patch_stco {
        for &stco_pos in &moov.stco_positions {
            patch_stco_in_span(&mut header_span, stco_pos, len_diff)?;
        }
    }

    let mut temp = File::create(temp_path)?;
    temp.write_all(&header_span)?;
    temp.write_all(&new_atoms_bytes)?;

    file.seek(SeekFrom::Start(moved_data_start))?;
    let mut buf = vec![0u8; COPY_BLOCK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        temp.write_all(&buf[..n])?;
    }
    temp.sync_all()?;
    drop(temp);

    fs::rename(temp_path, path)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tagtmp", std::process::id()));
    path.with_file_name(name)
}

/// Refuses any file whose first two top-level boxes are not exactly `ftyp`
/// then `moov` (§4.6, §1 Non-goals). Rejected up front so a file this editor
/// cannot reason about is never partially scanned or written to.
fn assert_ftyp_then_moov(file: &mut File, file_len: u64) -> Result<(), TagError> {
    let mut top = Vec::with_capacity(2);
    for_each_child(file, 0, file_len, |_reader, ident, _bounds, _cs, _ce| {
        if top.len() < 2 {
            top.push(ident);
        }
        Ok(())
    })?;

    match top.as_slice() {
        [first, second] if *first == ident::FTYP && *second == ident::MOOV => Ok(()),
        [first] if *first == ident::FTYP => Err(TagError::MalformedContainer(
            "file has no moov atom after ftyp".into(),
        )),
        _ => Err(TagError::MalformedContainer(
            "first two top-level atoms must be ftyp then moov".into(),
        )),
    }
}

/// Patches every 32-bit `stco` entry in `span` (an in-memory prefix of the
/// source file containing `stco_pos`) by adding `len_diff`.
fn patch_stco_in_span(span: &mut [u8], stco_pos: u64, len_diff: i64) -> Result<(), TagError> {
    let count_at = stco_pos as usize + 12;
    let entry_count = BigEndian::read_u32(&span[count_at..count_at + 4]) as usize;

    let table_pos = stco_pos as usize + 16;
    for i in 0..entry_count {
        let at = table_pos + i * 4;
        let offset = BigEndian::read_u32(&span[at..at + 4]);
        let patched = (offset as i64 + len_diff) as u32;
        BigEndian::write_u32(&mut span[at..at + 4], patched);
    }
    Ok(())
}

fn scan_moov<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |reader, ident, bounds, content_start, content_end| {
        match ident {
            ident::TRAK => scan_trak(reader, content_start, content_end, moov)?,
            ident::UDTA => {
                moov.udta = Some(bounds);
                scan_udta(reader, content_start, content_end, moov)?;
            }
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_udta<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |reader, ident, bounds, content_start, content_end| {
        match ident {
            ident::META => {
                moov.meta = Some(bounds);
                // `meta`'s content starts with a 4-byte version/flags field.
                scan_meta(reader, content_start + 4, content_end, moov)?;
            }
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_meta<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |_reader, ident, bounds, _content_start, _content_end| {
        match ident {
            ident::HDLR => moov.hdlr = Some(bounds),
            ident::ILST => moov.ilst = Some(bounds),
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_trak<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |reader, ident, _bounds, content_start, content_end| {
        match ident {
            ident::MDIA => scan_mdia(reader, content_start, content_end, moov)?,
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_mdia<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |reader, ident, _bounds, content_start, content_end| {
        match ident {
            ident::MINF => scan_minf(reader, content_start, content_end, moov)?,
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_minf<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |reader, ident, _bounds, content_start, content_end| {
        match ident {
            ident::STBL => scan_stbl(reader, content_start, content_end, moov)?,
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

fn scan_stbl<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    moov: &mut MoovLayout,
) -> Result<(), TagError> {
    for_each_child(reader, start, end, |_reader, ident, bounds, _content_start, _content_end| {
        match ident {
            ident::STCO => moov.stco_positions.push(bounds.pos),
            ident::CO64 => moov.co64_found = true,
            other if is_known_moov_descendant(other) => {}
            other => return Err(fatal_unknown_atom(other)),
        }
        Ok(())
    })
}

/// Walks the sibling atoms between `start` and `end`, invoking `visit` once
/// per child with the reader (re-lent so `visit` can recurse into it), its
/// identifier, on-disk bounds, and content range. Does not recurse itself;
/// callers recurse explicitly into the containers they care about.
fn for_each_child<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    mut visit: impl FnMut(&mut R, Ident, AtomBounds, u64, u64) -> Result<(), TagError>,
) -> Result<(), TagError> {
    let mut pos = start;
    while pos < end {
        reader.seek(SeekFrom::Start(pos))?;
        let (size, ident, header_len) = read_atom_header(reader)?;
        if size == 0 {
            return Err(TagError::MalformedContainer(format!(
                "zero-length atom at offset {pos}"
            )));
        }
        let bounds = AtomBounds { pos, len: size };
        let content_start = pos + header_len as u64;
        let content_end = pos + size;
        visit(reader, ident, bounds, content_start, content_end)?;
        pos += size;
    }
    Ok(())
}

fn read_atom_header<R: Read + Seek>(reader: &mut R) -> Result<(u64, Ident, u8), TagError> {
    let start = reader.stream_position()?;
    let size32 = reader.read_u32::<BigEndian>()?;

    let mut ident_buf = [0u8; 4];
    reader.read_exact(&mut ident_buf)?;
    let ident = Ident(ident_buf);

    if size32 == 1 {
        let size64 = reader.read_u64::<BigEndian>()?;
        Ok((size64, ident, 16))
    } else if size32 == 0 {
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start + 8))?;
        Ok((end - start, ident, 8))
    } else {
        Ok((size32 as u64, ident, 8))
    }
}
