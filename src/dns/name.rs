//! Domain name encoding and compression-aware decoding.

use crate::{Error, Result};

const LABEL_MAX_LENGTH: usize = 63;
const NAME_MAX_LENGTH: usize = 255;
const MAX_POINTERS: usize = 32;

/// Appends `name` in wire form. Compression is never emitted.
pub(crate) fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.len() > NAME_MAX_LENGTH {
        return Err(Error::BadRequest("domain name too long"));
    }

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > LABEL_MAX_LENGTH {
                return Err(Error::BadRequest("invalid domain name label"));
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
    Ok(())
}

fn truncated() -> Error {
    Error::BadRequest("truncated DNS message")
}

/// Reads a possibly-compressed name starting at `*pos`, leaving `*pos`
/// just past the name in the original byte stream.
pub(crate) fn read_name(msg: &[u8], pos: &mut usize) -> Result<String> {
    let mut name = String::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut pointers = 0;

    loop {
        let len = *msg.get(cursor).ok_or_else(truncated)? as usize;

        if len & 0xc0 == 0xc0 {
            let low = *msg.get(cursor + 1).ok_or_else(truncated)? as usize;
            if !jumped {
                *pos = cursor + 2;
                jumped = true;
            }
            pointers += 1;
            if pointers > MAX_POINTERS {
                return Err(Error::BadRequest("too many DNS name pointers"));
            }
            cursor = (len & 0x3f) << 8 | low;
            continue;
        }
        if len & 0xc0 != 0 {
            return Err(Error::BadRequest("bad DNS label type"));
        }

        cursor += 1;
        if len == 0 {
            break;
        }

        let label = msg.get(cursor..cursor + len).ok_or_else(truncated)?;
        let label = std::str::from_utf8(label)
            .map_err(|_| Error::BadRequest("non-ascii DNS label"))?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(label);
        if name.len() > NAME_MAX_LENGTH {
            return Err(Error::BadRequest("domain name too long"));
        }
        cursor += len;
    }

    if !jumped {
        *pos = cursor;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut buf = Vec::new();
        write_name(&mut buf, "host.example.com").unwrap();
        assert_eq!(buf.len(), 18);

        let mut pos = 0;
        let name = read_name(&buf, &mut pos).unwrap();
        assert_eq!(name, "host.example.com");
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn trailing_dot_is_equivalent() {
        let mut plain = Vec::new();
        let mut dotted = Vec::new();
        write_name(&mut plain, "example.com").unwrap();
        write_name(&mut dotted, "example.com.").unwrap();
        assert_eq!(plain, dotted);
    }

    #[test]
    fn root_name() {
        let mut buf = Vec::new();
        write_name(&mut buf, ".").unwrap();
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn compression_pointer() {
        // "example.com" at offset 0, then "www" + pointer to offset 0.
        let mut msg = Vec::new();
        write_name(&mut msg, "example.com").unwrap();
        let suffix = msg.len();
        msg.push(3);
        msg.extend_from_slice(b"www");
        msg.extend_from_slice(&[0xc0, 0x00]);

        let mut pos = suffix;
        let name = read_name(&msg, &mut pos).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(pos, msg.len());
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let msg = [0xc0u8, 0x00];
        let mut pos = 0;
        assert!(read_name(&msg, &mut pos).is_err());
    }

    #[test]
    fn oversized_label_is_rejected() {
        let mut buf = Vec::new();
        let label = "a".repeat(64);
        assert!(write_name(&mut buf, &label).is_err());
    }
}
