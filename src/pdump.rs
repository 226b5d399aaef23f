//! Hex-dump diagnostic.
//!
//! Renders binary data in the classic 16-bytes-per-line shape:
//!
//! ```text
//! 000000  61 64 75 6d 70 2d 70 6f  6f 6c 2d 76 31 2e 31 0a |adump-pool-v1.1.|
//! ```

use std::fmt::Write;

/// Render `data` as a hex dump.
pub fn dump_string(data: &[u8]) -> String {
    let mut out = String::new();
    let ending = (data.len() + 15) & !15;

    let mut hex = String::new();
    let mut ascii = String::new();
    for pos in 0..ending {
        if pos < data.len() {
            let byte = data[pos];
            let _ = write!(hex, " {byte:02x}");
            ascii.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        } else {
            hex.push_str("   ");
            ascii.push(' ');
        }

        if pos % 16 == 7 {
            hex.push(' ');
        }
        if pos % 16 == 15 {
            let _ = writeln!(out, "{:06x} {hex} |{ascii}|", pos & !15);
            hex.clear();
            ascii.clear();
        }
    }
    out
}

/// Print a hex dump to stdout.
pub fn dump(data: &[u8]) {
    print!("{}", dump_string(data));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape() {
        let out = dump_string(b"adump-pool-v1.1\nextra");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("000000  61 64 75 6d 70 2d 70 6f  6f 6c 2d 76 31 2e 31 0a"));
        assert!(lines[0].ends_with("|adump-pool-v1.1.|"));
        assert!(lines[1].starts_with("000010  65 78 74 72 61"));
        assert!(lines[1].ends_with("|extra           |"));
    }

    #[test]
    fn empty_input() {
        assert_eq!(dump_string(b""), "");
    }
}
