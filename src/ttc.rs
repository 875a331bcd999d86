//! Serialization of single fonts and TrueType collections.
//!
//! The collection writer shares bit-equal tables between faces by
//! offset; Noto CJK packs several faces over one set of outlines, and
//! without sharing the output would bloat several times over.

use std::collections::HashMap;

use write_fonts::types::Tag;

use crate::error::Error;

const HEAD: Tag = Tag::new(b"head");
const TABLE_RECORD_LEN: usize = 16;
const SFNT_HEADER_LEN: usize = 12;
const TTC_TAG: u32 = u32::from_be_bytes(*b"ttcf");
const TTC_VERSION_1: u32 = 0x0001_0000;
const CHECKSUM_MAGIC: u32 = 0xB1B0_AFBA;
// Offset of checkSumAdjustment within the head table.
const HEAD_ADJUSTMENT_OFFSET: usize = 8;

/// The tables of one face, ready to serialize.
#[derive(Clone, Debug)]
pub struct FaceTables {
    pub sfnt_version: u32,
    /// (tag, table bytes); need not be sorted.
    pub tables: Vec<(Tag, Vec<u8>)>,
}

/// Serialize a single font. The head table's checkSumAdjustment is
/// recomputed over the assembled file.
pub fn build_font(face: FaceTables) -> Result<Vec<u8>, Error> {
    let FaceTables {
        sfnt_version,
        mut tables,
    } = face;
    tables.sort_by_key(|(tag, _)| *tag);
    if let Some((_, head)) = tables.iter_mut().find(|(tag, _)| *tag == HEAD) {
        zero_head_adjustment(head);
    }

    let header_len = SFNT_HEADER_LEN + tables.len() * TABLE_RECORD_LEN;
    let mut out = Vec::new();
    out.extend_from_slice(&sfnt_version.to_be_bytes());
    push_binary_search_assists(&mut out, tables.len())?;

    let mut position = header_len as u32;
    let mut head_offset = None;
    for (tag, data) in &tables {
        if *tag == HEAD {
            head_offset = Some(position as usize);
        }
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&checksum(data).to_be_bytes());
        out.extend_from_slice(&position.to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        position += padded_len(data.len()) as u32;
    }
    for (_, data) in &tables {
        out.extend_from_slice(data);
        out.resize(padded_len(out.len()), 0);
    }

    if let Some(head_offset) = head_offset {
        let adjustment = CHECKSUM_MAGIC.wrapping_sub(checksum(&out));
        let at = head_offset + HEAD_ADJUSTMENT_OFFSET;
        out[at..at + 4].copy_from_slice(&adjustment.to_be_bytes());
    }
    Ok(out)
}

/// Serialize a TrueType collection, deduplicating bit-equal tables.
///
/// Head checkSumAdjustment values are carried over from the input
/// unchanged so that untouched faces stay byte-identical.
pub fn build_collection(faces: Vec<FaceTables>) -> Result<Vec<u8>, Error> {
    let header_len = SFNT_HEADER_LEN + 4 * faces.len();
    let mut directory_offsets = Vec::with_capacity(faces.len());
    let mut position = header_len;
    let faces: Vec<FaceTables> = faces
        .into_iter()
        .map(|mut face| {
            face.tables.sort_by_key(|(tag, _)| *tag);
            face
        })
        .collect();

    for face in &faces {
        directory_offsets.push(position as u32);
        position += SFNT_HEADER_LEN + face.tables.len() * TABLE_RECORD_LEN;
    }

    // Assign each unique table body an offset, in the order faces
    // reference them, so the layout is deterministic.
    let mut unique: Vec<&[u8]> = Vec::new();
    let mut offset_of: HashMap<&[u8], u32> = HashMap::new();
    for face in &faces {
        for (_, data) in &face.tables {
            if !offset_of.contains_key(data.as_slice()) {
                offset_of.insert(data.as_slice(), position as u32);
                unique.push(data.as_slice());
                position += padded_len(data.len());
            }
        }
    }

    let mut out = Vec::with_capacity(position);
    out.extend_from_slice(&TTC_TAG.to_be_bytes());
    out.extend_from_slice(&TTC_VERSION_1.to_be_bytes());
    out.extend_from_slice(&(faces.len() as u32).to_be_bytes());
    for offset in &directory_offsets {
        out.extend_from_slice(&offset.to_be_bytes());
    }
    for face in &faces {
        out.extend_from_slice(&face.sfnt_version.to_be_bytes());
        push_binary_search_assists(&mut out, face.tables.len())?;
        for (tag, data) in &face.tables {
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&checksum(data).to_be_bytes());
            out.extend_from_slice(&offset_of[data.as_slice()].to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        }
    }
    for data in unique {
        out.extend_from_slice(data);
        out.resize(padded_len(out.len()), 0);
    }
    Ok(out)
}

fn push_binary_search_assists(out: &mut Vec<u8>, num_tables: usize) -> Result<(), Error> {
    let num_tables: u16 = num_tables
        .try_into()
        .map_err(|_| Error::BuildFont("too many tables".into()))?;
    let entry_selector = (num_tables as f64).log2().floor() as u16;
    let search_range = (2.0_f64.powi(entry_selector as i32) * 16.0) as u16;
    let range_shift = (num_tables as usize * 16).saturating_sub(search_range as usize) as u16;
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());
    Ok(())
}

fn zero_head_adjustment(head: &mut [u8]) {
    if head.len() >= HEAD_ADJUSTMENT_OFFSET + 4 {
        head[HEAD_ADJUSTMENT_OFFSET..HEAD_ADJUSTMENT_OFFSET + 4].copy_from_slice(&[0; 4]);
    }
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

fn checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut iter = data.chunks_exact(4);
    for quad in &mut iter {
        let array: [u8; 4] = quad.try_into().unwrap_or_default();
        sum = sum.wrapping_add(u32::from_be_bytes(array));
    }
    let rem = match *iter.remainder() {
        [a] => u32::from_be_bytes([a, 0, 0, 0]),
        [a, b] => u32::from_be_bytes([a, b, 0, 0]),
        [a, b, c] => u32::from_be_bytes([a, b, c, 0]),
        _ => 0,
    };
    sum.wrapping_add(rem)
}
