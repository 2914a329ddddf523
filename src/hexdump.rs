//! Hex + ASCII rendering used by the `kuhex` built-in.

use std::io::{self, Read, Write};
use thiserror::Error;

const BYTES_PER_LINE: usize = 16;

#[derive(Debug, Error)]
pub enum HexdumpError {
    #[error("invalid group size, supported sizes: 1,2,4,8,16.")]
    InvalidGroupSize(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Number of bytes printed together without a separating space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSize(usize);

impl GroupSize {
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for GroupSize {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<usize> for GroupSize {
    type Error = HexdumpError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 | 2 | 4 | 8 | 16 => Ok(Self(size)),
            other => Err(HexdumpError::InvalidGroupSize(other)),
        }
    }
}

/// Render one line of at most 16 bytes starting at `offset`.
fn write_line(out: &mut dyn Write, offset: usize, chunk: &[u8], group: GroupSize) -> io::Result<()> {
    let group = group.get();
    write!(out, "{offset:08x}: ")?;
    for start in (0..BYTES_PER_LINE).step_by(group) {
        if start < chunk.len() {
            for i in start..start + group {
                match chunk.get(i) {
                    Some(byte) => write!(out, "{byte:02x}")?,
                    None => write!(out, "  ")?,
                }
            }
            write!(out, " ")?;
        } else {
            write!(out, "{:width$}", "", width = group * 2 + 1)?;
        }
    }
    write!(out, " ")?;
    let ascii: String = chunk
        .iter()
        .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
        .collect();
    writeln!(out, "{ascii}")
}

/// Fill `buf` as far as the reader allows; short only at end of input.
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Dump everything `reader` yields to `out`.
pub fn dump(reader: &mut dyn Read, group: GroupSize, out: &mut dyn Write) -> Result<(), HexdumpError> {
    let mut buf = [0u8; BYTES_PER_LINE];
    let mut offset = 0;
    loop {
        let n = read_chunk(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        write_line(out, offset, &buf[..n], group)?;
        offset += n;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn render(data: &[u8], group: usize) -> String {
        let mut out = Vec::new();
        let group = GroupSize::try_from(group).unwrap();
        dump(&mut Cursor::new(data.to_vec()), group, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn full_line_single_byte_groups() {
        let s = render(b"0123456789abcdef", 1);
        assert_eq!(
            s,
            "00000000: 30 31 32 33 34 35 36 37 38 39 61 62 63 64 65 66  0123456789abcdef\n"
        );
    }

    #[test]
    fn partial_line_pads_missing_groups() {
        let s = render(b"AB\n", 1);
        let expected = format!("00000000: 41 42 0a {} AB.\n", " ".repeat(13 * 3));
        assert_eq!(s, expected);
    }

    #[test]
    fn partial_group_pads_two_spaces_per_missing_byte() {
        let s = render(b"hello", 4);
        let expected = format!(
            "00000000: 68656c6c 6f{}{} hello\n",
            " ".repeat(6 + 1),
            " ".repeat(9 * 2)
        );
        assert_eq!(s, expected);
    }

    #[test]
    fn offsets_advance_by_sixteen() {
        let data: Vec<u8> = (0u8..40).collect();
        let s = render(&data, 16);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("00000000: 000102030405060708090a0b0c0d0e0f "));
        assert!(lines[1].starts_with("00000010: "));
        assert!(lines[2].starts_with("00000020: 2021222324252627"));
        assert!(lines[2].ends_with(" !\"#$%&'"));
    }

    #[test]
    fn every_line_has_the_same_width_before_ascii() {
        for group in [1, 2, 4, 8, 16] {
            let s = render(b"0123456789abcdefXYZ", group);
            let lines: Vec<&str> = s.lines().collect();
            let hex_width = 10 + (16 / group) * (group * 2 + 1) + 1;
            assert_eq!(&lines[0][hex_width..], "0123456789abcdef");
            assert_eq!(&lines[1][hex_width..], "XYZ");
        }
    }

    #[test]
    fn empty_input_prints_nothing() {
        assert_eq!(render(b"", 2), "");
    }

    #[test]
    fn unsupported_group_sizes_are_rejected() {
        for size in [0, 3, 5, 32] {
            assert!(matches!(
                GroupSize::try_from(size),
                Err(HexdumpError::InvalidGroupSize(s)) if s == size
            ));
        }
        assert_eq!(
            HexdumpError::InvalidGroupSize(3).to_string(),
            "invalid group size, supported sizes: 1,2,4,8,16."
        );
    }
}
