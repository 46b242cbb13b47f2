//! Leaf atom payload layouts.
//!
//! Each known leaf type decodes into a variant of [`AtomData`]; everything
//! else is either a container (recursed into) or kept opaque. Layouts follow
//! the QuickTime atom registry: versioned atoms start with a version byte
//! and 3 flag bytes, table atoms declare an entry count followed by
//! fixed-size records.

use anyhow::{Result, bail};

use crate::errors::AtomError;
use crate::reader::SliceReader;
use crate::render::{Record, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Ftyp {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pnot {
    pub modification_date: u32,
    pub version_number: u16,
    pub atom_type: [u8; 4],
    pub atom_index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mvhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u32,
    pub modification_time: u32,
    pub time_scale: u32,
    pub duration: u32,
    pub preferred_rate: f32,
    pub preferred_volume: f32,
    pub matrix: [u32; 9],
    pub preview_time: u32,
    pub preview_duration: u32,
    pub poster_time: u32,
    pub selection_time: u32,
    pub selection_duration: u32,
    pub current_time: u32,
    pub next_track_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Color {
    pub index: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ctab {
    pub seed: u32,
    pub flags: u16,
    pub colors: Vec<Color>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tkhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u32,
    pub modification_time: u32,
    pub track_id: u32,
    pub duration: u32,
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: f32,
    pub matrix: [u32; 9],
    pub track_width: f32,
    pub track_height: f32,
}

/// clef, prof and enof share one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Aperture {
    pub version: u8,
    pub flags: u32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElstEntry {
    pub track_duration: u32,
    pub media_time: i32,
    pub media_rate: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Elst {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<ElstEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub preload_start_time: u32,
    pub preload_duration: u32,
    pub preload_flags: u32,
    pub default_hints: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mdhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u32,
    pub modification_time: u32,
    pub time_scale: u32,
    pub duration: u32,
    pub language: u16,
    pub quality: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Elng {
    pub version: u8,
    pub flags: u32,
    pub language_tag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hdlr {
    pub version: u8,
    pub flags: u32,
    pub component_type: [u8; 4],
    pub component_subtype: [u8; 4],
    pub component_manufacturer: u32,
    pub component_flags: u32,
    pub component_flags_mask: u32,
    pub component_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vmhd {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Smhd {
    pub version: u8,
    pub flags: u32,
    pub balance: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gmin {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
    pub balance: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleDescription {
    pub size: u32,
    pub data_format: [u8; 4],
    pub data_reference_index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stsd {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<SampleDescription>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stts {
    pub version: u8,
    pub flags: u32,
    /// (sample count, sample duration) pairs.
    pub entries: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ctts {
    pub version: u8,
    pub flags: u32,
    /// (sample count, composition offset) pairs.
    pub entries: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cslg {
    pub version: u8,
    pub flags: u32,
    pub composition_offset_to_display_offset_shift: u32,
    pub least_display_offset: u32,
    pub greatest_display_offset: u32,
    pub display_start_time: u32,
    pub display_end_time: u32,
}

/// stss and stps share one layout: a table of sample numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleNumbers {
    pub version: u8,
    pub flags: u32,
    pub sample_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stsc {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<StscEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stsz {
    pub version: u8,
    pub flags: u32,
    /// Uniform sample size; 0 means sizes vary and the table is present.
    pub sample_size: u32,
    pub sample_count: u32,
    pub sizes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stco {
    pub version: u8,
    pub flags: u32,
    pub chunk_offsets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dref {
    pub version: u8,
    pub flags: u32,
    pub entry_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sdtp {
    pub version: u8,
    pub flags: u32,
    pub sample_dependency_flags: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AtomData {
    /// A node whose payload is a sequence of child atoms.
    Container,
    /// A known leaf whose payload failed to decode, or an unrecognized atom
    /// that cannot be recursed into safely.
    Opaque,
    Ftyp(Ftyp),
    Free { free_space: u64 },
    Skip { free_space: u64 },
    Wide,
    /// Media data, referenced as a range into the file buffer.
    Mdat { offset: usize, len: u64 },
    Pnot(Pnot),
    Mvhd(Mvhd),
    Ctab(Ctab),
    Tkhd(Tkhd),
    Txas,
    Clef(Aperture),
    Prof(Aperture),
    Enof(Aperture),
    Elst(Elst),
    Load(Load),
    Mdhd(Mdhd),
    Elng(Elng),
    Hdlr(Hdlr),
    Vmhd(Vmhd),
    Smhd(Smhd),
    Gmin(Gmin),
    Dref(Dref),
    Stsd(Stsd),
    Stts(Stts),
    Ctts(Ctts),
    Cslg(Cslg),
    Stss(SampleNumbers),
    Stps(SampleNumbers),
    Stsc(Stsc),
    Stsz(Stsz),
    Stco(Stco),
    Sdtp(Sdtp),
}

pub(crate) fn is_leaf(kind: &[u8; 4]) -> bool {
    matches!(
        kind,
        b"ftyp"
            | b"free"
            | b"skip"
            | b"wide"
            | b"mdat"
            | b"pnot"
            | b"mvhd"
            | b"ctab"
            | b"tkhd"
            | b"txas"
            | b"clef"
            | b"prof"
            | b"enof"
            | b"elst"
            | b"load"
            | b"mdhd"
            | b"elng"
            | b"hdlr"
            | b"vmhd"
            | b"smhd"
            | b"gmin"
            | b"dref"
            | b"stsd"
            | b"stts"
            | b"ctts"
            | b"cslg"
            | b"stss"
            | b"stps"
            | b"stsc"
            | b"stsz"
            | b"stco"
            | b"sdtp"
    )
}

fn version_flags(r: &mut SliceReader) -> Result<(u8, u32)> {
    Ok((r.read_u8()?, r.read_u24_be()?))
}

fn matrix(r: &mut SliceReader) -> Result<[u32; 9]> {
    let mut out = [0u32; 9];
    for slot in &mut out {
        *slot = r.read_u32_be()?;
    }
    Ok(out)
}

/// Decodes a leaf payload over `[start, end)` of the file buffer.
pub(crate) fn decode_leaf(
    kind: &[u8; 4],
    data: &[u8],
    start: usize,
    end: usize,
) -> Result<AtomData> {
    let payload_len = (end - start) as u64;
    let mut r = SliceReader::with_window(data, start, end);

    let decoded = match kind {
        b"ftyp" => {
            let major_brand = r.read_tag()?;
            let minor_version = r.read_u32_be()?;
            let mut compatible_brands = Vec::new();
            while r.remaining() >= 4 {
                compatible_brands.push(r.read_tag()?);
            }
            AtomData::Ftyp(Ftyp {
                major_brand,
                minor_version,
                compatible_brands,
            })
        }
        b"free" => AtomData::Free {
            free_space: payload_len,
        },
        b"skip" => AtomData::Skip {
            free_space: payload_len,
        },
        b"wide" => AtomData::Wide,
        b"mdat" => AtomData::Mdat {
            offset: start,
            len: payload_len,
        },
        b"pnot" => AtomData::Pnot(Pnot {
            modification_date: r.read_u32_be()?,
            version_number: r.read_u16_be()?,
            atom_type: r.read_tag()?,
            atom_index: r.read_u16_be()?,
        }),
        b"mvhd" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Mvhd(Mvhd {
                version,
                flags,
                creation_time: r.read_u32_be()?,
                modification_time: r.read_u32_be()?,
                time_scale: r.read_u32_be()?,
                duration: r.read_u32_be()?,
                preferred_rate: r.read_fixed_16_16_be()?,
                preferred_volume: r.read_fixed_8_8_be()?,
                matrix: matrix(&mut r)?,
                preview_time: r.read_u32_be()?,
                preview_duration: r.read_u32_be()?,
                poster_time: r.read_u32_be()?,
                selection_time: r.read_u32_be()?,
                selection_duration: r.read_u32_be()?,
                current_time: r.read_u32_be()?,
                next_track_id: r.read_u32_be()?,
            })
        }
        b"ctab" => {
            let seed = r.read_u32_be()?;
            let flags = r.read_u16_be()?;
            let count = r.read_u16_be()?;
            let mut colors = Vec::new();
            for _ in 0..count {
                colors.push(Color {
                    index: r.read_u16_be()?,
                    red: r.read_u16_be()?,
                    green: r.read_u16_be()?,
                    blue: r.read_u16_be()?,
                });
            }
            AtomData::Ctab(Ctab {
                seed,
                flags,
                colors,
            })
        }
        b"tkhd" => {
            let (version, flags) = version_flags(&mut r)?;
            let creation_time = r.read_u32_be()?;
            let modification_time = r.read_u32_be()?;
            let track_id = r.read_u32_be()?;
            r.skip(4)?;
            let duration = r.read_u32_be()?;
            r.skip(8)?;
            let layer = r.read_u16_be()?;
            let alternate_group = r.read_u16_be()?;
            let volume = r.read_fixed_8_8_be()?;
            r.skip(2)?;
            AtomData::Tkhd(Tkhd {
                version,
                flags,
                creation_time,
                modification_time,
                track_id,
                duration,
                layer,
                alternate_group,
                volume,
                matrix: matrix(&mut r)?,
                track_width: r.read_fixed_16_16_be()?,
                track_height: r.read_fixed_16_16_be()?,
            })
        }
        b"txas" => AtomData::Txas,
        b"clef" | b"prof" | b"enof" => {
            let (version, flags) = version_flags(&mut r)?;
            let aperture = Aperture {
                version,
                flags,
                width: r.read_fixed_16_16_be()?,
                height: r.read_fixed_16_16_be()?,
            };
            match kind {
                b"clef" => AtomData::Clef(aperture),
                b"prof" => AtomData::Prof(aperture),
                _ => AtomData::Enof(aperture),
            }
        }
        b"elst" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(ElstEntry {
                    track_duration: r.read_u32_be()?,
                    media_time: r.read_u32_be()? as i32,
                    media_rate: r.read_fixed_16_16_be()?,
                });
            }
            AtomData::Elst(Elst {
                version,
                flags,
                entries,
            })
        }
        b"load" => AtomData::Load(Load {
            preload_start_time: r.read_u32_be()?,
            preload_duration: r.read_u32_be()?,
            preload_flags: r.read_u32_be()?,
            default_hints: r.read_u32_be()?,
        }),
        b"mdhd" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Mdhd(Mdhd {
                version,
                flags,
                creation_time: r.read_u32_be()?,
                modification_time: r.read_u32_be()?,
                time_scale: r.read_u32_be()?,
                duration: r.read_u32_be()?,
                language: r.read_u16_be()?,
                quality: r.read_u16_be()?,
            })
        }
        b"elng" => {
            let (version, flags) = version_flags(&mut r)?;
            let mut tag = Vec::new();
            loop {
                if r.is_empty() {
                    bail!(AtomError::UnterminatedLanguageTag);
                }
                match r.read_u8()? {
                    0 => break,
                    c => tag.push(c),
                }
            }
            AtomData::Elng(Elng {
                version,
                flags,
                language_tag: String::from_utf8_lossy(&tag).into_owned(),
            })
        }
        b"hdlr" => {
            let (version, flags) = version_flags(&mut r)?;
            let component_type = r.read_tag()?;
            let component_subtype = r.read_tag()?;
            let component_manufacturer = r.read_u32_be()?;
            let component_flags = r.read_u32_be()?;
            let component_flags_mask = r.read_u32_be()?;
            // Trailing bytes up to the declared end, no terminator.
            let name = r.read_bytes(r.remaining())?;
            AtomData::Hdlr(Hdlr {
                version,
                flags,
                component_type,
                component_subtype,
                component_manufacturer,
                component_flags,
                component_flags_mask,
                component_name: String::from_utf8_lossy(name).into_owned(),
            })
        }
        b"vmhd" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Vmhd(Vmhd {
                version,
                flags,
                graphics_mode: r.read_u16_be()?,
                opcolor: [r.read_u16_be()?, r.read_u16_be()?, r.read_u16_be()?],
            })
        }
        b"smhd" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Smhd(Smhd {
                version,
                flags,
                balance: r.read_u16_be()?,
            })
        }
        b"gmin" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Gmin(Gmin {
                version,
                flags,
                graphics_mode: r.read_u16_be()?,
                opcolor: [r.read_u16_be()?, r.read_u16_be()?, r.read_u16_be()?],
                balance: r.read_u16_be()?,
            })
        }
        b"dref" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Dref(Dref {
                version,
                flags,
                entry_count: r.read_u32_be()?,
            })
        }
        b"stsd" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                let entry_start = r.position();
                let size = r.read_u32_be()?;
                let data_format = r.read_tag()?;
                r.skip(6)?;
                let data_reference_index = r.read_u16_be()?;
                entries.push(SampleDescription {
                    size,
                    data_format,
                    data_reference_index,
                });
                // Codec-specific bytes past the common fields are skipped.
                r.seek_to(entry_start + size as usize);
            }
            AtomData::Stsd(Stsd {
                version,
                flags,
                entries,
            })
        }
        b"stts" | b"ctts" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push((r.read_u32_be()?, r.read_u32_be()?));
            }
            if kind == b"stts" {
                AtomData::Stts(Stts {
                    version,
                    flags,
                    entries,
                })
            } else {
                AtomData::Ctts(Ctts {
                    version,
                    flags,
                    entries,
                })
            }
        }
        b"cslg" => {
            let (version, flags) = version_flags(&mut r)?;
            AtomData::Cslg(Cslg {
                version,
                flags,
                composition_offset_to_display_offset_shift: r.read_u32_be()?,
                least_display_offset: r.read_u32_be()?,
                greatest_display_offset: r.read_u32_be()?,
                display_start_time: r.read_u32_be()?,
                display_end_time: r.read_u32_be()?,
            })
        }
        b"stss" | b"stps" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut sample_numbers = Vec::new();
            for _ in 0..count {
                sample_numbers.push(r.read_u32_be()?);
            }
            let table = SampleNumbers {
                version,
                flags,
                sample_numbers,
            };
            if kind == b"stss" {
                AtomData::Stss(table)
            } else {
                AtomData::Stps(table)
            }
        }
        b"stsc" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(StscEntry {
                    first_chunk: r.read_u32_be()?,
                    samples_per_chunk: r.read_u32_be()?,
                    sample_description_id: r.read_u32_be()?,
                });
            }
            AtomData::Stsc(Stsc {
                version,
                flags,
                entries,
            })
        }
        b"stsz" => {
            let (version, flags) = version_flags(&mut r)?;
            let sample_size = r.read_u32_be()?;
            let sample_count = r.read_u32_be()?;
            let mut sizes = Vec::new();
            // The per-sample table only exists when sizes vary.
            if sample_size == 0 {
                for _ in 0..sample_count {
                    sizes.push(r.read_u32_be()?);
                }
            }
            AtomData::Stsz(Stsz {
                version,
                flags,
                sample_size,
                sample_count,
                sizes,
            })
        }
        b"stco" => {
            let (version, flags) = version_flags(&mut r)?;
            let count = r.read_u32_be()?;
            let mut chunk_offsets = Vec::new();
            for _ in 0..count {
                chunk_offsets.push(r.read_u32_be()?);
            }
            AtomData::Stco(Stco {
                version,
                flags,
                chunk_offsets,
            })
        }
        b"sdtp" => {
            let (version, flags) = version_flags(&mut r)?;
            let flags_table = r.read_bytes(r.remaining())?;
            AtomData::Sdtp(Sdtp {
                version,
                flags,
                sample_dependency_flags: flags_table.to_vec(),
            })
        }
        _ => AtomData::Opaque,
    };

    Ok(decoded)
}

impl AtomData {
    /// Adds this payload's fields to the atom's dump record.
    pub(crate) fn describe(&self, rec: &mut Record) {
        match self {
            AtomData::Container | AtomData::Opaque | AtomData::Wide | AtomData::Txas => {}
            AtomData::Ftyp(a) => {
                rec.field("majorBrand", Value::FourCc(a.major_brand))
                    .field("minorVersion", Value::U64(a.minor_version.into()));
                for brand in &a.compatible_brands {
                    rec.field("compatibleBrand", Value::FourCc(*brand));
                }
            }
            AtomData::Free { free_space } | AtomData::Skip { free_space } => {
                rec.field("freeSpace", Value::U64(*free_space));
            }
            AtomData::Mdat { len, .. } => {
                rec.field("data", Value::Bytes(*len as usize));
            }
            AtomData::Pnot(a) => {
                rec.field("modificationDate", Value::U64(a.modification_date.into()))
                    .field("versionNumber", Value::U64(a.version_number.into()))
                    .field("atomType", Value::FourCc(a.atom_type))
                    .field("atomIndex", Value::U64(a.atom_index.into()));
            }
            AtomData::Mvhd(a) => {
                rec.field("version", Value::U64(a.version.into()))
                    .field("creationTime", Value::U64(a.creation_time.into()))
                    .field("modificationTime", Value::U64(a.modification_time.into()))
                    .field("timeScale", Value::U64(a.time_scale.into()))
                    .field("duration", Value::U64(a.duration.into()))
                    .field("preferredRate", Value::F64(a.preferred_rate.into()))
                    .field("preferredVolume", Value::F64(a.preferred_volume.into()))
                    .field("nextTrackId", Value::U64(a.next_track_id.into()));
            }
            AtomData::Ctab(a) => {
                rec.field("seed", Value::U64(a.seed.into()))
                    .field("flags", Value::Bits { bits: a.flags.into(), width: 16 })
                    .field("colorCount", Value::U64(a.colors.len() as u64));
            }
            AtomData::Tkhd(a) => {
                rec.field("version", Value::U64(a.version.into()))
                    .field("trackId", Value::U64(a.track_id.into()))
                    .field("duration", Value::U64(a.duration.into()))
                    .field("layer", Value::U64(a.layer.into()))
                    .field("alternateGroup", Value::U64(a.alternate_group.into()))
                    .field("volume", Value::F64(a.volume.into()))
                    .field("trackWidth", Value::F64(a.track_width.into()))
                    .field("trackHeight", Value::F64(a.track_height.into()));
            }
            AtomData::Clef(a) | AtomData::Prof(a) | AtomData::Enof(a) => {
                rec.field("width", Value::F64(a.width.into()))
                    .field("height", Value::F64(a.height.into()));
            }
            AtomData::Elst(a) => {
                rec.field("entryCount", Value::U64(a.entries.len() as u64));
                for entry in &a.entries {
                    let mut child = Record::new("edit");
                    child
                        .field("trackDuration", Value::U64(entry.track_duration.into()))
                        .field("mediaTime", Value::I64(entry.media_time.into()))
                        .field("mediaRate", Value::F64(entry.media_rate.into()));
                    rec.child(child);
                }
            }
            AtomData::Load(a) => {
                rec.field("preloadStartTime", Value::U64(a.preload_start_time.into()))
                    .field("preloadDuration", Value::U64(a.preload_duration.into()))
                    .field("preloadFlags", Value::Bits { bits: a.preload_flags, width: 32 })
                    .field("defaultHints", Value::Bits { bits: a.default_hints, width: 32 });
            }
            AtomData::Mdhd(a) => {
                rec.field("version", Value::U64(a.version.into()))
                    .field("creationTime", Value::U64(a.creation_time.into()))
                    .field("modificationTime", Value::U64(a.modification_time.into()))
                    .field("timeScale", Value::U64(a.time_scale.into()))
                    .field("duration", Value::U64(a.duration.into()))
                    .field("language", Value::U64(a.language.into()))
                    .field("quality", Value::U64(a.quality.into()));
            }
            AtomData::Elng(a) => {
                rec.field("languageTag", Value::Str(a.language_tag.clone()));
            }
            AtomData::Hdlr(a) => {
                rec.field("componentType", Value::FourCc(a.component_type))
                    .field("componentSubtype", Value::FourCc(a.component_subtype))
                    .field("componentName", Value::Str(a.component_name.clone()));
            }
            AtomData::Vmhd(a) => {
                rec.field("graphicsMode", Value::U64(a.graphics_mode.into()));
            }
            AtomData::Smhd(a) => {
                rec.field("balance", Value::U64(a.balance.into()));
            }
            AtomData::Gmin(a) => {
                rec.field("graphicsMode", Value::U64(a.graphics_mode.into()))
                    .field("balance", Value::U64(a.balance.into()));
            }
            AtomData::Dref(a) => {
                rec.field("entryCount", Value::U64(a.entry_count.into()));
            }
            AtomData::Stsd(a) => {
                rec.field("entryCount", Value::U64(a.entries.len() as u64));
                for entry in &a.entries {
                    let mut child = Record::new("sample description");
                    child
                        .field("size", Value::U64(entry.size.into()))
                        .field("dataFormat", Value::FourCc(entry.data_format))
                        .field(
                            "dataReferenceIndex",
                            Value::U64(entry.data_reference_index.into()),
                        );
                    rec.child(child);
                }
            }
            AtomData::Stts(a) => {
                rec.field("entryCount", Value::U64(a.entries.len() as u64));
            }
            AtomData::Ctts(a) => {
                rec.field("entryCount", Value::U64(a.entries.len() as u64));
            }
            AtomData::Cslg(a) => {
                rec.field(
                    "displayStartTime",
                    Value::U64(a.display_start_time.into()),
                )
                .field("displayEndTime", Value::U64(a.display_end_time.into()));
            }
            AtomData::Stss(a) | AtomData::Stps(a) => {
                rec.field("entryCount", Value::U64(a.sample_numbers.len() as u64));
            }
            AtomData::Stsc(a) => {
                rec.field("entryCount", Value::U64(a.entries.len() as u64));
            }
            AtomData::Stsz(a) => {
                rec.field("sampleSize", Value::U64(a.sample_size.into()))
                    .field("sampleCount", Value::U64(a.sample_count.into()));
            }
            AtomData::Stco(a) => {
                rec.field("entryCount", Value::U64(a.chunk_offsets.len() as u64));
            }
            AtomData::Sdtp(a) => {
                rec.field(
                    "sampleCount",
                    Value::U64(a.sample_dependency_flags.len() as u64),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![version];
        out.extend_from_slice(&flags.to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn ftyp_brands() {
        let mut payload = b"M4A ".to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(b"M4A mp42isom");

        let data = decode_leaf(b"ftyp", &payload, 0, payload.len()).unwrap();
        let AtomData::Ftyp(ftyp) = data else {
            panic!("wrong variant");
        };
        assert_eq!(&ftyp.major_brand, b"M4A ");
        assert_eq!(
            ftyp.compatible_brands,
            vec![*b"M4A ", *b"mp42", *b"isom"]
        );
    }

    #[test]
    fn elst_entries_are_twelve_bytes() {
        let mut body = 2u32.to_be_bytes().to_vec();
        for (duration, time) in [(600u32, 0u32), (1200, 0xFFFF_FFFF)] {
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&time.to_be_bytes());
            body.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
        }
        let payload = full(0, 0, &body);

        let AtomData::Elst(elst) = decode_leaf(b"elst", &payload, 0, payload.len()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(elst.entries.len(), 2);
        assert_eq!(elst.entries[0].track_duration, 600);
        assert_eq!(elst.entries[1].media_time, -1);
        assert_eq!(elst.entries[1].media_rate, 1.0);
    }

    #[test]
    fn elng_requires_nul_terminator() {
        let ok = full(0, 0, b"en-US\0");
        let AtomData::Elng(elng) = decode_leaf(b"elng", &ok, 0, ok.len()).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(elng.language_tag, "en-US");

        let bad = full(0, 0, b"en-US");
        let err = decode_leaf(b"elng", &bad, 0, bad.len()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AtomError>(),
            Some(AtomError::UnterminatedLanguageTag)
        ));
    }

    #[test]
    fn stsz_table_only_when_sizes_vary() {
        let mut body = 0u32.to_be_bytes().to_vec();
        body.extend_from_slice(&3u32.to_be_bytes());
        for size in [10u32, 20, 30] {
            body.extend_from_slice(&size.to_be_bytes());
        }
        let varying = full(0, 0, &body);
        let AtomData::Stsz(stsz) = decode_leaf(b"stsz", &varying, 0, varying.len()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(stsz.sizes, vec![10, 20, 30]);

        let mut body = 1024u32.to_be_bytes().to_vec();
        body.extend_from_slice(&3u32.to_be_bytes());
        let uniform = full(0, 0, &body);
        let AtomData::Stsz(stsz) = decode_leaf(b"stsz", &uniform, 0, uniform.len()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(stsz.sample_size, 1024);
        assert_eq!(stsz.sample_count, 3);
        assert!(stsz.sizes.is_empty());
    }

    #[test]
    fn truncated_table_fails_decode() {
        let mut body = 10u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0, 0, 1]); // one offset, nine missing
        let payload = full(0, 0, &body);
        assert!(decode_leaf(b"stco", &payload, 0, payload.len()).is_err());
    }

    #[test]
    fn hdlr_component_name_runs_to_end() {
        let mut body = Vec::new();
        body.extend_from_slice(b"mhlr");
        body.extend_from_slice(b"soun");
        body.extend_from_slice(&[0; 12]);
        body.extend_from_slice(b"Sound Handler");
        let payload = full(0, 0, &body);

        let AtomData::Hdlr(hdlr) = decode_leaf(b"hdlr", &payload, 0, payload.len()).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(&hdlr.component_subtype, b"soun");
        assert_eq!(hdlr.component_name, "Sound Handler");
    }
}
