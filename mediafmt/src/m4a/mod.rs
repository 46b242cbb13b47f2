//! M4A/QuickTime atom parser.
//!
//! Recursive descent over the size-prefixed, type-tagged atom tree. Known
//! leaf types decode into [`atoms::AtomData`] variants; everything else is
//! recursed into as a container when its payload plausibly holds child
//! atoms. A child that fails structurally stops its sibling walk but keeps
//! the atoms already collected; a leaf whose payload fails to decode is
//! kept opaque and skipped over by its declared size.

pub mod atoms;

use anyhow::{Result, bail};
use log::warn;

use crate::byteorder;
use crate::errors::AtomError;
use crate::parser::{ExtractedStream, FormatParser};
use crate::reader::SliceReader;
use crate::render::{Record, Value};

use atoms::{AtomData, decode_leaf, is_leaf};

/// One node of the atom tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub size: u32,
    /// Present when `size == 1` escaped to a 64-bit size.
    pub extended_size: Option<u64>,
    pub kind: [u8; 4],
    pub data: AtomData,
    pub children: Vec<Atom>,
}

/// Container types recursed into unconditionally.
fn is_container(kind: &[u8; 4]) -> bool {
    matches!(
        kind,
        b"moov"
            | b"trak"
            | b"mdia"
            | b"minf"
            | b"stbl"
            | b"edts"
            | b"udta"
            | b"dinf"
            | b"tapt"
            | b"gmhd"
            | b"clip"
            | b"matt"
            | b"tref"
            | b"imap"
            | b"cmov"
            | b"rmra"
            | b"rmda"
    )
}

/// Whether a payload plausibly starts with a child atom header. Gates
/// recursion into unrecognized types so garbage is kept opaque instead of
/// desynchronizing the walk.
fn looks_size_prefixed(payload: &[u8]) -> bool {
    if payload.len() < 8 {
        return false;
    }
    let size = byteorder::u32_be(&payload[..4]) as usize;
    let plausible_size = size == 1 || (8..=payload.len()).contains(&size);
    let printable_kind = payload[4..8].iter().all(|&b| b >= 0x20);
    plausible_size && printable_kind
}

pub struct M4aParser {
    data: Vec<u8>,
    atoms: Vec<Atom>,
}

impl M4aParser {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            atoms: Vec::new(),
        }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Parses one atom starting at the reader's position; the reader ends up
    /// at the atom's declared end. `bound` is the enclosing atom's end (or
    /// the buffer length at top level).
    fn parse_atom(&self, r: &mut SliceReader, bound: usize) -> Result<Atom> {
        let start = r.position();
        let size = r.read_u32_be()?;
        let kind = r.read_tag()?;

        let mut extended_size = None;
        let declared = if size == 1 {
            let extended = r.read_u64_be()?;
            extended_size = Some(extended);
            extended
        } else {
            size as u64
        };

        let header_len = if extended_size.is_some() { 16 } else { 8 };
        if declared < header_len {
            bail!(AtomError::NoProgress {
                kind,
                offset: start,
            });
        }
        let end = start as u64 + declared;
        if end > bound as u64 {
            bail!(AtomError::Overrun {
                kind,
                end,
                bound: bound as u64,
            });
        }
        let end = end as usize;
        let payload_start = r.position();

        let (data, children) = if is_leaf(&kind) {
            match decode_leaf(&kind, &self.data, payload_start, end) {
                Ok(data) => (data, Vec::new()),
                Err(err) => {
                    warn!(
                        "atom {} at offset {start:#x} failed to decode, skipping: {err:#}",
                        Value::FourCc(kind)
                    );
                    (AtomData::Opaque, Vec::new())
                }
            }
        } else if is_container(&kind) || looks_size_prefixed(&self.data[payload_start..end]) {
            let mut children = Vec::new();
            let mut cr = SliceReader::with_window(&self.data, payload_start, end);
            while cr.position() < end {
                match self.parse_atom(&mut cr, end) {
                    Ok(child) => children.push(child),
                    Err(err) => {
                        warn!(
                            "stopping child walk of {} at offset {:#x}: {err:#}",
                            Value::FourCc(kind),
                            cr.position()
                        );
                        break;
                    }
                }
            }
            (AtomData::Container, children)
        } else {
            warn!(
                "unrecognized atom {} at offset {start:#x} kept opaque",
                Value::FourCc(kind)
            );
            (AtomData::Opaque, Vec::new())
        };

        r.seek_to(end);
        Ok(Atom {
            size,
            extended_size,
            kind,
            data,
            children,
        })
    }

    fn atom_record(atom: &Atom) -> Record {
        let mut rec = Record::new(Value::FourCc(atom.kind).to_string());
        rec.field("size", Value::U64(atom.size.into()));
        if let Some(extended) = atom.extended_size {
            rec.field("extendedSize", Value::U64(extended));
        }
        atom.data.describe(&mut rec);
        for child in &atom.children {
            rec.child(Self::atom_record(child));
        }
        rec
    }
}

impl FormatParser for M4aParser {
    fn parse(&mut self) -> Result<()> {
        if self.data.is_empty() {
            bail!(AtomError::EmptyFile);
        }

        let mut atoms = Vec::new();
        let mut r = SliceReader::new(&self.data);
        while !r.is_empty() {
            match self.parse_atom(&mut r, self.data.len()) {
                Ok(atom) => atoms.push(atom),
                Err(err) => {
                    // Nothing parsed at all means the file is not an atom
                    // stream; otherwise keep the partial tree.
                    if atoms.is_empty() {
                        return Err(err);
                    }
                    warn!("stopping top-level walk at offset {:#x}: {err:#}", r.position());
                    break;
                }
            }
        }
        self.atoms = atoms;
        Ok(())
    }

    fn records(&self) -> Vec<Record> {
        self.atoms.iter().map(Self::atom_record).collect()
    }

    fn extract_streams(&self) -> Result<Vec<ExtractedStream>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn extended_atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = 1u32.to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(&((payload.len() + 16) as u64).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn ftyp() -> Vec<u8> {
        let mut payload = b"M4A ".to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(b"isom");
        atom(b"ftyp", &payload)
    }

    fn mvhd() -> Vec<u8> {
        let mut payload = vec![0, 0, 0, 0]; // version + flags
        payload.extend_from_slice(&[0; 8]); // creation + modification
        payload.extend_from_slice(&600u32.to_be_bytes());
        payload.extend_from_slice(&7200u32.to_be_bytes());
        payload.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
        payload.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
        payload.extend_from_slice(&[0; 36]); // matrix
        payload.extend_from_slice(&[0; 24]); // preview through current time
        payload.extend_from_slice(&2u32.to_be_bytes());
        atom(b"mvhd", &payload)
    }

    #[test]
    fn nested_tree_parses() {
        let moov = atom(b"moov", &mvhd());
        let mut file = ftyp();
        file.extend_from_slice(&moov);
        file.extend_from_slice(&atom(b"mdat", &[1, 2, 3, 4]));

        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();

        let atoms = parser.atoms();
        assert_eq!(atoms.len(), 3);
        assert_eq!(&atoms[0].kind, b"ftyp");
        assert_eq!(&atoms[1].kind, b"moov");
        assert_eq!(atoms[1].children.len(), 1);
        let mvhd = &atoms[1].children[0];
        let AtomData::Mvhd(mvhd) = &mvhd.data else {
            panic!("wrong variant");
        };
        assert_eq!(mvhd.time_scale, 600);
        assert_eq!(mvhd.duration, 7200);
        assert_eq!(mvhd.preferred_rate, 1.0);
        assert!(matches!(
            atoms[2].data,
            AtomData::Mdat { offset: _, len: 4 }
        ));
    }

    #[test]
    fn children_stay_within_parent_bound() {
        let mut parser = M4aParser::new(Vec::new());
        parser.data = {
            let moov = atom(b"moov", &mvhd());
            let mut file = ftyp();
            file.extend_from_slice(&moov);
            file
        };
        parser.parse().unwrap();

        fn check(atom: &Atom, parent_payload: u64) {
            let own: u64 = atom
                .children
                .iter()
                .map(|c| c.extended_size.unwrap_or(c.size as u64))
                .sum();
            assert!(own <= parent_payload);
            for child in &atom.children {
                check(child, child.extended_size.unwrap_or(child.size as u64) - 8);
            }
        }
        for a in parser.atoms() {
            check(a, a.extended_size.unwrap_or(a.size as u64) - 8);
        }
    }

    #[test]
    fn parse_is_restartable() {
        let mut file = ftyp();
        file.extend_from_slice(&atom(b"moov", &mvhd()));

        let mut first = M4aParser::new(file.clone());
        first.parse().unwrap();
        let mut second = M4aParser::new(file);
        second.parse().unwrap();
        assert_eq!(first.atoms(), second.atoms());
    }

    #[test]
    fn extended_size_is_honored() {
        let file = extended_atom(b"mdat", &[0xAB; 32]);
        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();

        let atoms = parser.atoms();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].size, 1);
        assert_eq!(atoms[0].extended_size, Some(48));
        assert!(matches!(atoms[0].data, AtomData::Mdat { offset: 16, len: 32 }));
    }

    #[test]
    fn child_overrun_keeps_partial_tree() {
        let mut inner = mvhd();
        // A child claiming more than the parent payload holds.
        inner.extend_from_slice(&500u32.to_be_bytes());
        inner.extend_from_slice(b"tkhd");
        inner.extend_from_slice(&[0; 8]);
        let mut file = ftyp();
        file.extend_from_slice(&atom(b"moov", &inner));

        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();
        let moov = &parser.atoms()[1];
        assert_eq!(moov.children.len(), 1);
        assert_eq!(&moov.children[0].kind, b"mvhd");
    }

    #[test]
    fn garbage_is_fatal_only_when_nothing_parsed() {
        let mut parser = M4aParser::new(vec![0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0]);
        assert!(parser.parse().is_err());

        let mut file = ftyp();
        file.extend_from_slice(&[0xFF; 5]);
        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();
        assert_eq!(parser.atoms().len(), 1);
    }

    #[test]
    fn unknown_atom_with_atomlike_payload_is_recursed() {
        let inner = atom(b"free", &[0; 4]);
        let file = atom(b"junk", &inner);
        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();

        let outer = &parser.atoms()[0];
        assert_eq!(outer.data, AtomData::Container);
        assert_eq!(outer.children.len(), 1);
        assert_eq!(&outer.children[0].kind, b"free");
    }

    #[test]
    fn unknown_atom_with_opaque_payload_is_not_recursed() {
        let file = atom(b"junk", &[0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04]);
        let mut parser = M4aParser::new(file);
        parser.parse().unwrap();
        assert_eq!(parser.atoms()[0].data, AtomData::Opaque);
        assert!(parser.atoms()[0].children.is_empty());
    }
}
