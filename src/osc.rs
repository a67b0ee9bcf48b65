//! Minimal OSC 1.0 decoder
//!
//! Understands messages and (nested) bundles with the argument types
//! `i f s S b h d t c T F N I`. Anything else is rejected with an [`OscError`].

use std::fmt;

const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Nested bundles deeper than this are rejected
const MAX_BUNDLE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    TimeTag(u64),
    Char(char),
    True,
    False,
    Nil,
    Impulse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: u64,
    pub content: Vec<OscPacket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscError {
    /// The datagram ended in the middle of a field
    Truncated,
    /// Messages must start with '/'
    BadAddress,
    /// A string was not valid UTF-8 or not NUL-terminated
    BadString,
    /// The type tag string did not start with ','
    BadTypeTags,
    UnsupportedType(char),
    /// A bundle element size was negative, unaligned or too large
    BadElementSize(i32),
    TooDeep,
}

impl fmt::Display for OscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscError::Truncated => write!(f, "datagram is truncated"),
            OscError::BadAddress => write!(f, "address pattern must start with '/'"),
            OscError::BadString => write!(f, "malformed OSC string"),
            OscError::BadTypeTags => write!(f, "type tag string must start with ','"),
            OscError::UnsupportedType(tag) => write!(f, "unsupported argument type '{}'", tag),
            OscError::BadElementSize(size) => write!(f, "invalid bundle element size {}", size),
            OscError::TooDeep => write!(f, "bundles nested deeper than {}", MAX_BUNDLE_DEPTH),
        }
    }
}

impl std::error::Error for OscError {}

pub type OscResult<T> = Result<T, OscError>;

/// Decode one UDP datagram
pub fn decode(datagram: &[u8]) -> OscResult<OscPacket> {
    decode_packet(datagram, 0)
}

fn decode_packet(bytes: &[u8], depth: usize) -> OscResult<OscPacket> {
    if bytes.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::TooDeep);
        }
        decode_bundle(bytes, depth).map(OscPacket::Bundle)
    } else {
        decode_message(bytes).map(OscPacket::Message)
    }
}

fn decode_bundle(bytes: &[u8], depth: usize) -> OscResult<OscBundle> {
    let mut reader = Reader::new(bytes);
    reader.take(BUNDLE_TAG.len())?;
    let timetag = reader.u64()?;

    let mut content = Vec::new();
    while !reader.is_empty() {
        let size = reader.i32()?;
        if size < 0 || size % 4 != 0 {
            return Err(OscError::BadElementSize(size));
        }
        let element = reader
            .take(size as usize)
            .map_err(|_| OscError::BadElementSize(size))?;
        content.push(decode_packet(element, depth + 1)?);
    }

    Ok(OscBundle { timetag, content })
}

fn decode_message(bytes: &[u8]) -> OscResult<OscMessage> {
    let mut reader = Reader::new(bytes);
    let address = reader.string()?;
    if !address.starts_with('/') {
        return Err(OscError::BadAddress);
    }

    // very old senders omit the type tag string entirely
    if reader.is_empty() {
        return Ok(OscMessage {
            address,
            args: Vec::new(),
        });
    }

    let tags = reader.string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::BadTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(reader.i32()?),
            'f' => OscArg::Float(f32::from_bits(reader.u32()?)),
            's' | 'S' => OscArg::String(reader.string()?),
            'b' => OscArg::Blob(reader.blob()?),
            'h' => OscArg::Long(reader.u64()? as i64),
            'd' => OscArg::Double(f64::from_bits(reader.u64()?)),
            't' => OscArg::TimeTag(reader.u64()?),
            'c' => OscArg::Char(char::from_u32(reader.u32()?).ok_or(OscError::BadString)?),
            'T' => OscArg::True,
            'F' => OscArg::False,
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnsupportedType(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage { address, args })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> OscResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(OscError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(OscError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> OscResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> OscResult<u32> {
        self.array().map(u32::from_be_bytes)
    }

    fn i32(&mut self) -> OscResult<i32> {
        self.array().map(i32::from_be_bytes)
    }

    fn u64(&mut self) -> OscResult<u64> {
        self.array().map(u64::from_be_bytes)
    }

    fn string(&mut self) -> OscResult<String> {
        let rest = self.bytes.get(self.pos..).ok_or(OscError::Truncated)?;
        let nul = rest.iter().position(|&b| b == 0).ok_or(OscError::BadString)?;
        let text = std::str::from_utf8(&rest[..nul]).map_err(|_| OscError::BadString)?;
        self.take(padded(nul + 1))?;
        Ok(text.to_string())
    }

    fn blob(&mut self) -> OscResult<Vec<u8>> {
        let len = self.i32()?;
        let len = usize::try_from(len).map_err(|_| OscError::Truncated)?;
        let data = self.take(len)?.to_vec();
        self.take(padded(len) - len)?;
        Ok(data)
    }
}

fn padded(len: usize) -> usize {
    len.div_ceil(4) * 4
}

impl OscPacket {
    /// Every message in the packet, bundles flattened in order
    pub fn into_messages(self) -> Vec<OscMessage> {
        match self {
            OscPacket::Message(message) => vec![message],
            OscPacket::Bundle(bundle) => bundle
                .content
                .into_iter()
                .flat_map(OscPacket::into_messages)
                .collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            OscPacket::Message(message) => message.encode(),
            OscPacket::Bundle(bundle) => {
                let mut out = BUNDLE_TAG.to_vec();
                out.extend_from_slice(&bundle.timetag.to_be_bytes());
                for element in &bundle.content {
                    let bytes = element.encode();
                    out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                out
            }
        }
    }
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_string(&mut out, &self.address);

        let mut tags = String::from(",");
        let mut payload = Vec::new();
        for arg in &self.args {
            match arg {
                OscArg::Int(v) => {
                    tags.push('i');
                    payload.extend_from_slice(&v.to_be_bytes());
                }
                OscArg::Float(v) => {
                    tags.push('f');
                    payload.extend_from_slice(&v.to_be_bytes());
                }
                OscArg::String(v) => {
                    tags.push('s');
                    push_string(&mut payload, v);
                }
                OscArg::Blob(v) => {
                    tags.push('b');
                    payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    payload.extend_from_slice(v);
                    payload.resize(payload.len() + padded(v.len()) - v.len(), 0);
                }
                OscArg::Long(v) => {
                    tags.push('h');
                    payload.extend_from_slice(&v.to_be_bytes());
                }
                OscArg::Double(v) => {
                    tags.push('d');
                    payload.extend_from_slice(&v.to_be_bytes());
                }
                OscArg::TimeTag(v) => {
                    tags.push('t');
                    payload.extend_from_slice(&v.to_be_bytes());
                }
                OscArg::Char(v) => {
                    tags.push('c');
                    payload.extend_from_slice(&(*v as u32).to_be_bytes());
                }
                OscArg::True => tags.push('T'),
                OscArg::False => tags.push('F'),
                OscArg::Nil => tags.push('N'),
                OscArg::Impulse => tags.push('I'),
            }
        }

        push_string(&mut out, &tags);
        out.extend_from_slice(&payload);
        out
    }
}

fn push_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    let len = value.len() + 1;
    out.resize(out.len() + padded(len) - value.len(), 0);
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{v}"),
            OscArg::Float(v) => write!(f, "{v}"),
            OscArg::String(v) => write!(f, "{v:?}"),
            OscArg::Blob(v) => write!(f, "<{} bytes>", v.len()),
            OscArg::Long(v) => write!(f, "{v}"),
            OscArg::Double(v) => write!(f, "{v}"),
            OscArg::TimeTag(v) => write!(f, "t{v}"),
            OscArg::Char(v) => write!(f, "{v:?}"),
            OscArg::True => f.write_str("true"),
            OscArg::False => f.write_str("false"),
            OscArg::Nil => f.write_str("nil"),
            OscArg::Impulse => f.write_str("impulse"),
        }
    }
}
