use std::fmt;

const BYTES_PER_LINE: usize = 16;

/// Classic hex dump: address, hex bytes, printable ASCII.
pub struct HexDump<'a> {
    address: usize,
    data: &'a [u8],
}

impl<'a> HexDump<'a> {
    pub fn new(address: usize, data: &'a [u8]) -> Self {
        Self { address, data }
    }
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.data.chunks(BYTES_PER_LINE).enumerate() {
            write!(f, "{:016x} ", self.address + i * BYTES_PER_LINE)?;
            for column in 0..BYTES_PER_LINE {
                match line.get(column) {
                    Some(byte) => write!(f, " {byte:02x}")?,
                    None => f.write_str("   ")?,
                }
            }

            f.write_str("  |")?;
            for &byte in line {
                let shown = if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    '.'
                };
                write!(f, "{shown}")?;
            }
            f.write_str("|\n")?;
        }

        Ok(())
    }
}

pub fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
