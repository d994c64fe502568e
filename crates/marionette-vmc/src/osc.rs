//! Minimal OSC decoder for the VMC protocol subset
//!
//! Supports `#bundle` framing (recursively unpacked) and messages with a
//! `,`-prefixed type-tag string restricted to float and string arguments.
//! Anything malformed aborts that message only; the surrounding packet keeps
//! decoding.

use glam::{Quat, Vec3};

/// Decoded OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Float(f32),
    Str(String),
}

impl OscArg {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Float(_) => None,
        }
    }
}

/// Decoded OSC message
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

/// The bone pose update carried by `/VMC/Ext/Bone/Pos`
#[derive(Debug, Clone, PartialEq)]
pub struct BonePose {
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
}

pub const BONE_POS_ADDRESS: &str = "/VMC/Ext/Bone/Pos";
pub const VMC_PREFIX: &str = "/VMC/Ext/";

const BUNDLE_TAG: &[u8] = b"#bundle\0";
/// Bundle header: 8-byte tag plus 8-byte timetag
const BUNDLE_HEADER: usize = 16;

/// Decode one datagram into its messages, flattening bundles.
pub fn decode_packet(data: &[u8]) -> Vec<OscMessage> {
    let mut out = Vec::new();
    if data.len() < 8 {
        return out;
    }
    decode_element(data, &mut out);
    out
}

fn decode_element(data: &[u8], out: &mut Vec<OscMessage>) {
    if data.starts_with(BUNDLE_TAG) {
        decode_bundle(data, out);
    } else if let Some(msg) = decode_message(data) {
        out.push(msg);
    }
}

fn decode_bundle(data: &[u8], out: &mut Vec<OscMessage>) {
    let mut pos = BUNDLE_HEADER;
    while pos + 4 <= data.len() {
        let size = read_i32(data, pos);
        pos += 4;
        if size <= 0 {
            break;
        }
        let size = size as usize;
        if pos + size > data.len() {
            break;
        }
        decode_element(&data[pos..pos + size], out);
        pos += size;
    }
}

fn decode_message(data: &[u8]) -> Option<OscMessage> {
    let mut pos = 0;
    let address = read_padded_str(data, &mut pos)?;
    let types = read_padded_str(data, &mut pos)?;
    if !types.starts_with(',') {
        return None;
    }

    let mut args = Vec::with_capacity(types.len() - 1);
    for tag in types[1..].chars() {
        match tag {
            'f' => {
                if pos + 4 > data.len() {
                    return None;
                }
                args.push(OscArg::Float(f32::from_bits(read_i32(data, pos) as u32)));
                pos += 4;
            }
            's' => {
                let s = read_padded_str(data, &mut pos)?;
                args.push(OscArg::Str(s));
            }
            // Unsupported type tag: abort this message only
            _ => return None,
        }
    }

    Some(OscMessage { address, args })
}

/// Parse a bone pose update out of a decoded message. `None` for any other
/// address or a malformed argument list.
pub fn parse_bone_pose(msg: &OscMessage) -> Option<BonePose> {
    if msg.address != BONE_POS_ADDRESS || msg.args.len() < 8 {
        return None;
    }
    let name = msg.args[0].as_str()?.to_string();
    let mut f = [0f32; 7];
    for (i, slot) in f.iter_mut().enumerate() {
        *slot = msg.args[i + 1].as_float()?;
    }
    Some(BonePose {
        name,
        position: Vec3::new(f[0], f[1], f[2]),
        rotation: Quat::from_xyzw(f[3], f[4], f[5], f[6]),
    })
}

fn read_i32(data: &[u8], pos: usize) -> i32 {
    i32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

/// Read a NUL-terminated ASCII string and advance past its 4-byte padding.
fn read_padded_str(data: &[u8], pos: &mut usize) -> Option<String> {
    let start = *pos;
    let mut end = start;
    while end < data.len() && data[end] != 0 {
        end += 1;
    }
    // A string whose terminator falls outside the element is truncated
    if end >= data.len() {
        return None;
    }
    let s = std::str::from_utf8(&data[start..end]).ok()?.to_string();
    let len = end - start + 1;
    *pos = start + len + ((4 - (len % 4)) & 3);
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_padded_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn bone_pos_message(name: &str, values: [f32; 7]) -> Vec<u8> {
        let mut buf = Vec::new();
        put_padded_str(&mut buf, BONE_POS_ADDRESS);
        put_padded_str(&mut buf, ",sfffffff");
        put_padded_str(&mut buf, name);
        for v in values {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf
    }

    fn bundle_of(elements: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"#bundle\0");
        buf.extend_from_slice(&[0u8; 8]); // timetag
        for el in elements {
            buf.extend_from_slice(&(el.len() as i32).to_be_bytes());
            buf.extend_from_slice(el);
        }
        buf
    }

    #[test]
    fn test_decode_single_message() {
        let packet = bone_pos_message("Head", [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0]);
        let messages = decode_packet(&packet);
        assert_eq!(messages.len(), 1);

        let pose = parse_bone_pose(&messages[0]).unwrap();
        assert_eq!(pose.name, "Head");
        assert_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(pose.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_decode_nested_bundle() {
        let a = bone_pos_message("Head", [0.0; 7]);
        let b = bone_pos_message("Neck", [0.0; 7]);
        let inner = bundle_of(&[b.clone()]);
        let packet = bundle_of(&[a, inner]);

        let messages = decode_packet(&packet);
        assert_eq!(messages.len(), 2);
        assert_eq!(parse_bone_pose(&messages[0]).unwrap().name, "Head");
        assert_eq!(parse_bone_pose(&messages[1]).unwrap().name, "Neck");
    }

    #[test]
    fn test_unsupported_type_tag_skips_message_only() {
        let mut bad = Vec::new();
        put_padded_str(&mut bad, "/VMC/Ext/T");
        put_padded_str(&mut bad, ",i");
        bad.extend_from_slice(&1i32.to_be_bytes());

        let good = bone_pos_message("Hips", [0.0; 7]);
        let packet = bundle_of(&[bad, good]);

        let messages = decode_packet(&packet);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, BONE_POS_ADDRESS);
    }

    #[test]
    fn test_truncated_data_is_skipped() {
        let mut packet = bone_pos_message("Head", [0.0; 7]);
        packet.truncate(packet.len() - 3);
        assert!(decode_packet(&packet).is_empty());

        // Unterminated address string
        let no_nul = b"/VMC/Ext/Bone/Pos".to_vec();
        assert!(decode_packet(&no_nul).is_empty());

        // Bundle whose element size overruns the packet
        let msg = bone_pos_message("Head", [0.0; 7]);
        let mut bundle = bundle_of(&[msg]);
        let len = bundle.len();
        bundle[BUNDLE_HEADER..BUNDLE_HEADER + 4]
            .copy_from_slice(&((len * 2) as i32).to_be_bytes());
        assert!(decode_packet(&bundle).is_empty());
    }

    #[test]
    fn test_other_addresses_pass_decoding() {
        let mut buf = Vec::new();
        put_padded_str(&mut buf, "/VMC/Ext/OK");
        put_padded_str(&mut buf, ",f");
        buf.extend_from_slice(&1.0f32.to_be_bytes());

        let messages = decode_packet(&buf);
        assert_eq!(messages.len(), 1);
        assert!(parse_bone_pose(&messages[0]).is_none());
    }

    #[test]
    fn test_bone_pose_requires_full_argument_list() {
        let mut buf = Vec::new();
        put_padded_str(&mut buf, BONE_POS_ADDRESS);
        put_padded_str(&mut buf, ",sfff");
        put_padded_str(&mut buf, "Head");
        for v in [1.0f32, 2.0, 3.0] {
            buf.extend_from_slice(&v.to_be_bytes());
        }

        let messages = decode_packet(&buf);
        assert_eq!(messages.len(), 1);
        assert!(parse_bone_pose(&messages[0]).is_none());
    }
}
