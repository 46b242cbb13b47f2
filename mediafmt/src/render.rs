//! Structural dump tree.
//!
//! Parsers report what they found as a tree of [`Record`] values instead of
//! formatting text themselves. A record carries a name, an ordered field
//! list and optional child records; [`render`] turns the tree into the
//! indented text dump. New structures only contribute a field list.

use std::fmt::Write;

/// A single parsed structure: one chunk, tag, frame run or atom.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub fields: Vec<(String, Value)>,
    pub children: Vec<Record>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn field(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn child(&mut self, record: Record) -> &mut Self {
        self.children.push(record);
        self
    }
}

/// A single field value in the dump.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    /// Rendered with three decimal places.
    F64(f64),
    Bool(bool),
    Str(String),
    /// Four-byte tag rendered as ASCII where printable, escaped otherwise.
    FourCc([u8; 4]),
    /// Opaque payload reported by length only.
    Bytes(usize),
    /// Raw bitfield rendered as zero-padded hex of the given bit width.
    Bits { bits: u32, width: u8 },
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::U64(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v:.3}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::FourCc(tag) => {
                for &b in tag {
                    if (0x20..0x7F).contains(&b) {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "\\x{b:02x}")?;
                    }
                }
                Ok(())
            }
            Value::Bytes(len) => write!(f, "<{len} bytes>"),
            Value::Bits { bits, width } => {
                let hex_digits = (*width as usize).div_ceil(4);
                write!(f, "{bits:#0prefixed$x}", prefixed = hex_digits + 2)
            }
        }
    }
}

/// Renders a record tree as indented text, two spaces per nesting level.
pub fn render(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        render_into(record, 0, &mut out);
    }
    out
}

fn render_into(record: &Record, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}{}", record.name);
    for (name, value) in &record.fields {
        let _ = writeln!(out, "{pad}  {name}: {value}");
    }
    for child in &record.children {
        render_into(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_and_children_indent() {
        let mut root = Record::new("moov");
        root.field("size", Value::U64(108));
        let mut child = Record::new("mvhd");
        child.field("time_scale", Value::U64(600));
        root.child(child);

        let text = render(&[root]);
        assert_eq!(text, "moov\n  size: 108\n  mvhd\n    time_scale: 600\n");
    }

    #[test]
    fn float_renders_three_decimals() {
        assert_eq!(Value::F64(12.5).to_string(), "12.500");
        assert_eq!(Value::F64(0.0).to_string(), "0.000");
    }

    #[test]
    fn fourcc_escapes_unprintable() {
        assert_eq!(Value::FourCc(*b"ftyp").to_string(), "ftyp");
        assert_eq!(Value::FourCc([0xA9, b'n', b'a', b'm']).to_string(), "\\xa9nam");
    }

    #[test]
    fn bits_render_fixed_width_hex() {
        let v = Value::Bits { bits: 0xFFFB, width: 32 };
        assert_eq!(v.to_string(), "0x0000fffb");
        let v = Value::Bits { bits: 0xAF, width: 8 };
        assert_eq!(v.to_string(), "0xaf");
    }
}
