//! Minimal OSC 1.0 codec — just the subset the console families speak:
//! int32, float32, and string arguments, 4-byte aligned throughout.

use crate::error::{DriverError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            args: Vec::new(),
        }
    }

    pub fn int(mut self, v: i32) -> Self {
        self.args.push(OscArg::Int(v));
        self
    }

    pub fn float(mut self, v: f32) -> Self {
        self.args.push(OscArg::Float(v));
        self
    }

    pub fn first_int(&self) -> Option<i32> {
        self.args.iter().find_map(|a| match a {
            OscArg::Int(v) => Some(*v),
            _ => None,
        })
    }

    pub fn first_float(&self) -> Option<f32> {
        self.args.iter().find_map(|a| match a {
            OscArg::Float(v) => Some(*v),
            _ => None,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        put_padded_str(&mut out, &self.addr);

        let mut tags = String::from(",");
        for arg in &self.args {
            tags.push(match arg {
                OscArg::Int(_) => 'i',
                OscArg::Float(_) => 'f',
                OscArg::Str(_) => 's',
            });
        }
        put_padded_str(&mut out, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => put_padded_str(&mut out, s),
            }
        }
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (addr, rest) = take_padded_str(buf)?;
        if !addr.starts_with('/') {
            return Err(DriverError::Protocol(format!("bad OSC address: {addr}")));
        }
        let (tags, mut rest) = take_padded_str(rest)?;
        let mut args = Vec::new();
        for tag in tags.chars().skip(1) {
            match tag {
                'i' => {
                    let (bytes, r) = take_n(rest, 4)?;
                    args.push(OscArg::Int(i32::from_be_bytes([
                        bytes[0], bytes[1], bytes[2], bytes[3],
                    ])));
                    rest = r;
                }
                'f' => {
                    let (bytes, r) = take_n(rest, 4)?;
                    args.push(OscArg::Float(f32::from_be_bytes([
                        bytes[0], bytes[1], bytes[2], bytes[3],
                    ])));
                    rest = r;
                }
                's' => {
                    let (s, r) = take_padded_str(rest)?;
                    args.push(OscArg::Str(s));
                    rest = r;
                }
                other => {
                    return Err(DriverError::Protocol(format!("unsupported OSC tag: {other}")))
                }
            }
        }
        Ok(Self { addr, args })
    }
}

fn put_padded_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn take_padded_str(buf: &[u8]) -> Result<(String, &[u8])> {
    let nul = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| DriverError::Protocol("unterminated OSC string".into()))?;
    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|_| DriverError::Protocol("non-UTF8 OSC string".into()))?
        .to_string();
    // Skip the terminator and its padding.
    let consumed = (nul + 1).div_ceil(4) * 4;
    let consumed = consumed.min(buf.len());
    Ok((s, &buf[consumed..]))
}

fn take_n(buf: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if buf.len() < n {
        return Err(DriverError::Protocol("truncated OSC payload".into()));
    }
    Ok(buf.split_at(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_four_byte_aligned() {
        let msg = OscMessage::new("/ch/01/mix/on").int(1);
        let bytes = msg.encode();
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn int_round_trip() {
        let msg = OscMessage::new("/main/st/mix/on").int(0);
        let back = OscMessage::parse(&msg.encode()).unwrap();
        assert_eq!(back.addr, "/main/st/mix/on");
        assert_eq!(back.first_int(), Some(0));
    }

    #[test]
    fn float_round_trip() {
        let msg = OscMessage::new("/ch/05/mix/fader").float(0.75);
        let back = OscMessage::parse(&msg.encode()).unwrap();
        assert_eq!(back.first_float(), Some(0.75));
    }

    #[test]
    fn string_arg_round_trip() {
        let mut msg = OscMessage::new("/node");
        msg.args.push(OscArg::Str("ch/01/config".into()));
        let back = OscMessage::parse(&msg.encode()).unwrap();
        assert_eq!(back.args, vec![OscArg::Str("ch/01/config".into())]);
    }

    #[test]
    fn no_args_round_trip() {
        let msg = OscMessage::new("/xremote");
        let back = OscMessage::parse(&msg.encode()).unwrap();
        assert_eq!(back.addr, "/xremote");
        assert!(back.args.is_empty());
    }

    #[test]
    fn rejects_addresses_without_slash() {
        let mut bytes = OscMessage::new("/ok").encode();
        bytes[0] = b'x';
        assert!(OscMessage::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_int() {
        let msg = OscMessage::new("/ch/01/mix/on").int(1);
        let bytes = msg.encode();
        assert!(OscMessage::parse(&bytes[..bytes.len() - 2]).is_err());
    }
}
