//! Domain name wire format with RFC 1035 label compression.

use hap_core::error::MdnsError;

/// Longest label allowed on the wire.
pub const MAX_LABEL_LEN: usize = 63;

/// Longest encoded name, length bytes and terminator included.
pub const MAX_NAME_LEN: usize = 255;

/// Pointers carry a 14-bit offset.
const MAX_POINTER_OFFSET: usize = 0x3FFF;

const POINTER_MASK: u8 = 0xC0;

/// Split a dotted name into labels. The root name `.` has none.
pub fn labels(name: &str) -> Vec<&str> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|label| !label.is_empty())
        .collect()
}

/// Case-insensitive comparison that ignores a trailing dot.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// Uncompressed wire form of `labels`, terminator included.
fn encode_labels(labels: &[&str]) -> Result<Vec<u8>, MdnsError> {
    let mut out = Vec::with_capacity(labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
    for label in labels {
        if label.len() > MAX_LABEL_LEN {
            return Err(MdnsError::LabelTooLong(label.len()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    if out.len() > MAX_NAME_LEN {
        return Err(MdnsError::NameTooLong(out.len()));
    }
    Ok(out)
}

/// Append `name` to `buf` without compression.
pub fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<(), MdnsError> {
    buf.extend_from_slice(&encode_labels(&labels(name))?);
    Ok(())
}

/// Append `name` to `buf`, replacing the longest suffix already present in
/// `buf` with a pointer to it.
pub fn write_name_compressed(buf: &mut Vec<u8>, name: &str) -> Result<(), MdnsError> {
    let end = buf.len();
    write_name_compressed_before(buf, name, end)
}

/// Like [`write_name_compressed`], but only bytes before `search_end` are
/// pointer candidates. Bytes after it may still be rewritten.
pub fn write_name_compressed_before(
    buf: &mut Vec<u8>,
    name: &str,
    search_end: usize,
) -> Result<(), MdnsError> {
    let labels = labels(name);
    let full = encode_labels(&labels)?;

    for start in 0..labels.len() {
        let suffix = encode_labels(&labels[start..])?;
        if suffix.len() < 3 {
            break;
        }
        let Some(offset) = find(&buf[..search_end], &suffix) else {
            continue;
        };
        if offset >= MAX_POINTER_OFFSET {
            continue;
        }

        let literal_len = full.len() - suffix.len();
        buf.extend_from_slice(&full[..literal_len]);
        buf.push(POINTER_MASK | (offset >> 8) as u8);
        buf.push(offset as u8);
        return Ok(());
    }

    buf.extend_from_slice(&full);
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read a name starting at `*offset`, following compression pointers.
///
/// On return `*offset` points just past the name as it appears at the
/// original position. Every pointer must reference a position strictly
/// before the pointer itself.
pub fn read_name(packet: &[u8], offset: &mut usize) -> Result<String, MdnsError> {
    let mut parts: Vec<String> = Vec::new();
    let mut pos = *offset;
    let mut resume: Option<usize> = None;
    let mut total = 1;

    loop {
        let len = *packet.get(pos).ok_or(MdnsError::Truncated(pos))?;
        match len & POINTER_MASK {
            0x00 => {
                if len == 0 {
                    pos += 1;
                    break;
                }
                let len = len as usize;
                let label = packet
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(MdnsError::Truncated(pos + 1))?;
                total += len + 1;
                if total > MAX_NAME_LEN {
                    return Err(MdnsError::NameTooLong(total));
                }
                let label = std::str::from_utf8(label).map_err(|_| MdnsError::InvalidLabel)?;
                parts.push(label.to_string());
                pos += 1 + len;
            }
            POINTER_MASK => {
                let low = *packet.get(pos + 1).ok_or(MdnsError::Truncated(pos + 1))?;
                let target = (((len & !POINTER_MASK) as usize) << 8) | low as usize;
                if target >= pos {
                    return Err(MdnsError::InvalidReference {
                        offset: target,
                        position: pos,
                    });
                }
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                pos = target;
            }
            other => return Err(MdnsError::UnsupportedCompression(other)),
        }
    }

    *offset = resume.unwrap_or(pos);
    if parts.is_empty() {
        return Ok(".".to_string());
    }
    let mut name = parts.join(".");
    name.push('.');
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod labels {
        use super::*;

        #[test]
        fn splits_dotted_names() {
            assert_eq!(labels("_hap._tcp.local."), vec!["_hap", "_tcp", "local"]);
            assert_eq!(labels("local"), vec!["local"]);
            assert!(labels(".").is_empty());
        }

        #[test]
        fn comparison_ignores_case_and_trailing_dot() {
            assert!(names_equal("Lamp._HAP._tcp.local.", "lamp._hap._tcp.local"));
            assert!(!names_equal("lamp.local.", "lamp2.local."));
        }
    }

    mod write {
        use super::*;

        #[test]
        fn uncompressed_wire_form() {
            let mut buf = Vec::new();
            write_name(&mut buf, "_hap._tcp.local.").unwrap();
            assert_eq!(buf, b"\x04_hap\x04_tcp\x05local\x00");
        }

        #[test]
        fn root_is_a_single_zero() {
            let mut buf = Vec::new();
            write_name(&mut buf, ".").unwrap();
            assert_eq!(buf, [0]);
        }

        #[test]
        fn rejects_long_label() {
            let name = format!("{}.local.", "a".repeat(64));
            assert_eq!(
                write_name(&mut Vec::new(), &name),
                Err(MdnsError::LabelTooLong(64))
            );
        }

        #[test]
        fn rejects_long_name() {
            let label = "a".repeat(63);
            let name = format!("{label}.{label}.{label}.{label}.local.");
            assert!(matches!(
                write_name(&mut Vec::new(), &name),
                Err(MdnsError::NameTooLong(_))
            ));
        }

        #[test]
        fn compresses_shared_suffix() {
            let mut buf = vec![0u8; 12];
            write_name_compressed(&mut buf, "_hap._tcp.local.").unwrap();
            write_name_compressed(&mut buf, "Lamp._hap._tcp.local.").unwrap();

            // "Lamp" literal followed by a pointer to offset 12.
            assert_eq!(&buf[29..], b"\x04Lamp\xC0\x0C");
        }

        #[test]
        fn compresses_whole_name() {
            let mut buf = vec![0u8; 12];
            write_name_compressed(&mut buf, "host.local.").unwrap();
            write_name_compressed(&mut buf, "host.local.").unwrap();
            assert_eq!(&buf[24..], [0xC0, 0x0C]);
        }

        #[test]
        fn falls_back_to_literal_without_match() {
            let mut buf = Vec::new();
            write_name_compressed(&mut buf, "a.example.").unwrap();
            write_name_compressed(&mut buf, "b.test.").unwrap();
            assert_eq!(&buf[11..], b"\x01b\x04test\x00");
        }
    }

    mod read {
        use super::*;

        #[test]
        fn reads_plain_name() {
            let packet = b"\x04_hap\x04_tcp\x05local\x00";
            let mut offset = 0;
            assert_eq!(read_name(packet, &mut offset).unwrap(), "_hap._tcp.local.");
            assert_eq!(offset, packet.len());
        }

        #[test]
        fn root_reads_as_dot() {
            let mut offset = 0;
            assert_eq!(read_name(&[0], &mut offset).unwrap(), ".");
            assert_eq!(offset, 1);
        }

        #[test]
        fn follows_backward_pointer() {
            let mut packet = b"\x05local\x00".to_vec();
            packet.extend_from_slice(b"\x04Lamp\xC0\x00");
            let mut offset = 7;
            assert_eq!(read_name(&packet, &mut offset).unwrap(), "Lamp.local.");
            assert_eq!(offset, packet.len());
        }

        #[test]
        fn follows_chained_pointers() {
            let mut packet = b"\x05local\x00".to_vec();
            packet.extend_from_slice(b"\x04_tcp\xC0\x00");
            packet.extend_from_slice(b"\x04_hap\xC0\x07");
            let mut offset = 14;
            assert_eq!(read_name(&packet, &mut offset).unwrap(), "_hap._tcp.local.");
        }

        #[test]
        fn rejects_forward_pointer() {
            let packet = b"\xC0\x02\x05local\x00";
            let mut offset = 0;
            assert_eq!(
                read_name(packet, &mut offset),
                Err(MdnsError::InvalidReference {
                    offset: 2,
                    position: 0
                })
            );
        }

        #[test]
        fn rejects_self_pointer() {
            let packet = b"\x05local\xC0\x06";
            let mut offset = 0;
            assert!(matches!(
                read_name(packet, &mut offset),
                Err(MdnsError::InvalidReference { offset: 6, .. })
            ));
        }

        #[test]
        fn rejects_reserved_prefixes() {
            let mut offset = 0;
            assert_eq!(
                read_name(&[0x40, 0x00], &mut offset),
                Err(MdnsError::UnsupportedCompression(0x40))
            );
            offset = 0;
            assert_eq!(
                read_name(&[0x80, 0x00], &mut offset),
                Err(MdnsError::UnsupportedCompression(0x80))
            );
        }

        #[test]
        fn reports_truncation() {
            let mut offset = 0;
            assert!(matches!(
                read_name(b"\x05loc", &mut offset),
                Err(MdnsError::Truncated(_))
            ));
            offset = 0;
            assert!(matches!(
                read_name(b"\x05local", &mut offset),
                Err(MdnsError::Truncated(6))
            ));
        }

        #[test]
        fn compressed_write_reads_back() {
            let mut buf = vec![0u8; 12];
            write_name_compressed(&mut buf, "Lamp._hap._tcp.local.").unwrap();
            let second = buf.len();
            write_name_compressed(&mut buf, "_hap._tcp.local.").unwrap();
            let third = buf.len();
            write_name_compressed(&mut buf, "Fan._hap._tcp.local.").unwrap();

            let mut offset = second;
            assert_eq!(read_name(&buf, &mut offset).unwrap(), "_hap._tcp.local.");
            let mut offset = third;
            assert_eq!(read_name(&buf, &mut offset).unwrap(), "Fan._hap._tcp.local.");
        }
    }
}
