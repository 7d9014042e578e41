//! Binary Pack/Unpack Codec
//!
//! Every message on the wire is a flat sequence of fields:
//!
//! | Kind | Format char | Encoding |
//! |------|-------------|----------|
//! | int32 | `i` | 4 bytes, big-endian |
//! | int64 | `l` | 8 bytes, big-endian |
//! | uint64 | `g` | 8 bytes, big-endian |
//! | double | `d` | 8 bytes, portable sign/exponent/mantissa packing |
//! | string | `s` | int32 length (including terminator) + bytes + NUL |
//! | blob | `b` | int32 length + raw bytes |
//!
//! Protocol code uses the cursor types [`WireWriter`] and [`WireReader`]
//! directly. The format-string functions [`pack`] and [`unpack`] sit on top
//! of them for callers that describe a layout as data.
//!
//! Decoding never reads past the end of the input: every read checks the
//! remaining length first and fails with [`WireError::TruncatedMessage`].

use bytes::{BufMut, Bytes, BytesMut};

pub const I32_LEN: usize = 4;
pub const I64_LEN: usize = 8;
pub const F64_LEN: usize = 8;

/// Upper bound on a decoded string unless the reader is configured otherwise.
pub const DEFAULT_MAX_STRING: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the field could be read
    TruncatedMessage { needed: usize, available: usize },
    /// Encoded length exceeds what the destination accepts
    FieldTooLong { len: usize, max: usize },
    /// Negative or otherwise impossible length prefix
    InvalidLength(i32),
    /// String field without its trailing NUL
    MissingTerminator,
    /// String field that is not UTF-8
    InvalidUtf8,
    /// Bad format string, or values that do not match it
    InvalidFormat(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::TruncatedMessage { needed, available } => write!(
                f,
                "truncated message: needed {} bytes, {} available",
                needed, available
            ),
            WireError::FieldTooLong { len, max } => {
                write!(f, "field length {} exceeds capacity {}", len, max)
            }
            WireError::InvalidLength(len) => write!(f, "invalid length prefix {}", len),
            WireError::MissingTerminator => write!(f, "string field missing terminator"),
            WireError::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            WireError::InvalidFormat(msg) => write!(f, "invalid wire format: {}", msg),
        }
    }
}

impl std::error::Error for WireError {}

/// Format-string misuse is a programming error: abort in debug builds,
/// surface as an error in release builds.
fn invalid_format(msg: String) -> WireError {
    debug_assert!(false, "invalid wire format: {}", msg);
    WireError::InvalidFormat(msg)
}

// ============================================================================
// Portable double packing
// ============================================================================

const F64_EXP_BITS: u32 = 11;
const F64_SIG_BITS: u32 = 52;
const F64_EXP_BIAS: i32 = 1023;
const F64_EXP_MASK: u64 = (1 << F64_EXP_BITS) - 1;
const F64_SIG_MASK: u64 = (1 << F64_SIG_BITS) - 1;
const F64_SIGN_BIT: u64 = 1 << 63;
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// Pack a double into 64 bits by extracting sign, exponent and mantissa
/// arithmetically instead of copying its memory representation.
pub fn pack754(value: f64) -> u64 {
    if value.is_nan() {
        return CANONICAL_NAN;
    }
    let sign = if value.is_sign_negative() { F64_SIGN_BIT } else { 0 };
    if value == 0.0 {
        return sign;
    }
    if value.is_infinite() {
        return sign | (F64_EXP_MASK << F64_SIG_BITS);
    }

    let magnitude = value.abs();
    let mut norm = magnitude;
    let mut shift: i32 = 0;
    while norm >= 2.0 {
        norm /= 2.0;
        shift += 1;
    }
    while norm < 1.0 {
        norm *= 2.0;
        shift -= 1;
    }

    if shift < 1 - F64_EXP_BIAS {
        // Subnormal: biased exponent 0, mantissa holds magnitude / 2^-1074.
        let scaled = magnitude * 2f64.powi(F64_EXP_BIAS - 1) * 2f64.powi(F64_SIG_BITS as i32);
        return sign | (scaled as u64 & F64_SIG_MASK);
    }

    let significand = ((norm - 1.0) * 2f64.powi(F64_SIG_BITS as i32)) as u64;
    let exponent = (shift + F64_EXP_BIAS) as u64;
    sign | (exponent << F64_SIG_BITS) | (significand & F64_SIG_MASK)
}

/// Inverse of [`pack754`].
pub fn unpack754(bits: u64) -> f64 {
    let negative = bits & F64_SIGN_BIT != 0;
    let exponent = ((bits >> F64_SIG_BITS) & F64_EXP_MASK) as i32;
    let significand = bits & F64_SIG_MASK;

    let magnitude = if exponent == F64_EXP_MASK as i32 {
        if significand == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exponent == 0 {
        // Zero and subnormals.
        (significand as f64 / 2f64.powi(F64_SIG_BITS as i32)) * 2f64.powi(1 - F64_EXP_BIAS)
    } else {
        let fraction = significand as f64 / 2f64.powi(F64_SIG_BITS as i32) + 1.0;
        fraction * 2f64.powi(exponent - F64_EXP_BIAS)
    };

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

// ============================================================================
// WireWriter
// ============================================================================

/// Growable encode buffer
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        WireWriter {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_u64(pack754(v));
    }

    /// Length prefix counts the trailing NUL.
    pub fn put_str(&mut self, s: &str) -> Result<(), WireError> {
        let len = length_prefix(s.len() + 1)?;
        self.buf.put_i32(len);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    pub fn put_blob(&mut self, data: &[u8]) -> Result<(), WireError> {
        let len = length_prefix(data.len())?;
        self.buf.put_i32(len);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Overwrite an int32 already written at `offset`.
    pub fn patch_i32(&mut self, offset: usize, v: i32) -> Result<(), WireError> {
        let end = offset + I32_LEN;
        if end > self.buf.len() {
            return Err(WireError::TruncatedMessage {
                needed: end,
                available: self.buf.len(),
            });
        }
        self.buf[offset..end].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

fn length_prefix(len: usize) -> Result<i32, WireError> {
    i32::try_from(len).map_err(|_| WireError::FieldTooLong {
        len,
        max: i32::MAX as usize,
    })
}

// ============================================================================
// WireReader
// ============================================================================

/// Bounds-checked decode cursor
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    max_string: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader {
            buf,
            pos: 0,
            max_string: DEFAULT_MAX_STRING,
        }
    }

    /// Start reading at `offset` bytes into `buf`.
    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        WireReader {
            buf,
            pos: offset.min(buf.len()),
            max_string: DEFAULT_MAX_STRING,
        }
    }

    pub fn with_max_string(mut self, max: usize) -> Self {
        self.max_string = max;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.remaining() < n {
            return Err(WireError::TruncatedMessage {
                needed: n,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        Ok(unpack754(self.get_u64()?))
    }

    fn get_len(&mut self) -> Result<usize, WireError> {
        let len = self.get_i32()?;
        usize::try_from(len).map_err(|_| WireError::InvalidLength(len))
    }

    /// Read a string, rejecting encoded lengths above the reader's limit.
    pub fn get_str(&mut self) -> Result<String, WireError> {
        let max = self.max_string;
        self.get_str_bounded(max)
    }

    /// Read a string into a destination that holds at most `max` bytes
    /// (terminator included).
    pub fn get_str_bounded(&mut self, max: usize) -> Result<String, WireError> {
        let len = self.get_len()?;
        if len == 0 {
            return Err(WireError::MissingTerminator);
        }
        if len > max {
            return Err(WireError::FieldTooLong { len, max });
        }
        let raw = self.take(len)?;
        let (body, terminator) = raw.split_at(len - 1);
        if terminator != [0] {
            return Err(WireError::MissingTerminator);
        }
        String::from_utf8(body.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn get_blob(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.get_len()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }
}

// ============================================================================
// Format-string interface
// ============================================================================

/// One field kind in a format string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I32,
    I64,
    U64,
    F64,
    Str,
    Bytes,
}

impl FieldKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(FieldKind::I32),
            'l' => Some(FieldKind::I64),
            'g' => Some(FieldKind::U64),
            'd' => Some(FieldKind::F64),
            's' => Some(FieldKind::Str),
            'b' => Some(FieldKind::Bytes),
            _ => None,
        }
    }
}

/// A decoded or to-be-encoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    I32(i32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::I32(_) => FieldKind::I32,
            Field::I64(_) => FieldKind::I64,
            Field::U64(_) => FieldKind::U64,
            Field::F64(_) => FieldKind::F64,
            Field::Str(_) => FieldKind::Str,
            Field::Bytes(_) => FieldKind::Bytes,
        }
    }
}

/// Parse a format string; whitespace is ignored.
pub fn parse_format(format: &str) -> Result<Vec<FieldKind>, WireError> {
    format
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            FieldKind::from_char(c)
                .ok_or_else(|| invalid_format(format!("unknown field kind '{}' in \"{}\"", c, format)))
        })
        .collect()
}

/// Encode `values` per `format` into `buf` starting at `offset`, growing the
/// buffer as needed. Returns the offset just past the last written byte.
pub fn pack(
    buf: &mut BytesMut,
    offset: usize,
    format: &str,
    values: &[Field],
) -> Result<usize, WireError> {
    let kinds = parse_format(format)?;
    if kinds.len() != values.len() {
        return Err(invalid_format(format!(
            "format \"{}\" names {} fields, {} values supplied",
            format,
            kinds.len(),
            values.len()
        )));
    }

    let mut w = WireWriter::new();
    for (i, (kind, value)) in kinds.iter().zip(values).enumerate() {
        if *kind != value.kind() {
            return Err(invalid_format(format!(
                "field {} of \"{}\" expects {:?}, got {:?}",
                i,
                format,
                kind,
                value.kind()
            )));
        }
        match value {
            Field::I32(v) => w.put_i32(*v),
            Field::I64(v) => w.put_i64(*v),
            Field::U64(v) => w.put_u64(*v),
            Field::F64(v) => w.put_f64(*v),
            Field::Str(s) => w.put_str(s)?,
            Field::Bytes(b) => w.put_blob(b)?,
        }
    }

    let end = offset + w.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(w.as_slice());
    Ok(end)
}

/// Decode fields per `format` starting at `offset`. Returns the values and
/// the offset just past the last consumed byte.
pub fn unpack(buf: &[u8], offset: usize, format: &str) -> Result<(Vec<Field>, usize), WireError> {
    unpack_bounded(buf, offset, format, DEFAULT_MAX_STRING)
}

/// As [`unpack`], with string fields limited to `max_string` bytes.
pub fn unpack_bounded(
    buf: &[u8],
    offset: usize,
    format: &str,
    max_string: usize,
) -> Result<(Vec<Field>, usize), WireError> {
    let kinds = parse_format(format)?;
    if offset > buf.len() {
        return Err(WireError::TruncatedMessage {
            needed: offset,
            available: buf.len(),
        });
    }
    let mut r = WireReader::at(buf, offset).with_max_string(max_string);
    let mut out = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let field = match kind {
            FieldKind::I32 => Field::I32(r.get_i32()?),
            FieldKind::I64 => Field::I64(r.get_i64()?),
            FieldKind::U64 => Field::U64(r.get_u64()?),
            FieldKind::F64 => Field::F64(r.get_f64()?),
            FieldKind::Str => Field::Str(r.get_str()?),
            FieldKind::Bytes => Field::Bytes(r.get_blob()?),
        };
        out.push(field);
    }
    Ok((out, r.position()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack754_matches_ieee_layout() {
        let samples = [
            1.0,
            -1.0,
            0.1,
            std::f64::consts::PI,
            1e300,
            -2.5e-300,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::MIN_POSITIVE / 4.0,
            5e-324,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for v in samples {
            assert_eq!(pack754(v), v.to_bits(), "bits differ for {}", v);
            assert_eq!(unpack754(pack754(v)).to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_signed_zero_survives() {
        assert_eq!(unpack754(pack754(0.0)).to_bits(), 0.0f64.to_bits());
        assert_eq!(unpack754(pack754(-0.0)).to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn test_nan_stays_nan() {
        assert!(unpack754(pack754(f64::NAN)).is_nan());
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut w = WireWriter::new();
        w.put_i32(0x0102_0304);
        w.put_u64(0x0A0B_0C0D_0E0F_1011);
        assert_eq!(
            w.as_slice(),
            &[1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11]
        );
    }

    #[test]
    fn test_string_length_includes_terminator() {
        let mut w = WireWriter::new();
        w.put_str("abc").unwrap();
        assert_eq!(w.as_slice(), &[0, 0, 0, 4, b'a', b'b', b'c', 0]);

        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.get_str().unwrap(), "abc");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_empty_string() {
        let mut w = WireWriter::new();
        w.put_str("").unwrap();
        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.get_str().unwrap(), "");
    }

    #[test]
    fn test_truncated_int_is_rejected() {
        let mut r = WireReader::new(&[0, 0, 1]);
        assert_eq!(
            r.get_i32(),
            Err(WireError::TruncatedMessage {
                needed: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_truncated_string_body_is_rejected() {
        let mut w = WireWriter::new();
        w.put_str("hello").unwrap();
        let bytes = w.as_slice();
        let mut r = WireReader::new(&bytes[..bytes.len() - 2]);
        assert!(matches!(
            r.get_str(),
            Err(WireError::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn test_string_over_capacity_is_rejected() {
        let mut w = WireWriter::new();
        w.put_str("0123456789").unwrap();
        let mut r = WireReader::new(w.as_slice());
        assert_eq!(
            r.get_str_bounded(8),
            Err(WireError::FieldTooLong { len: 11, max: 8 })
        );
    }

    #[test]
    fn test_string_without_terminator_is_rejected() {
        let bytes = [0, 0, 0, 2, b'h', b'i'];
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_str(), Err(WireError::MissingTerminator));
    }

    #[test]
    fn test_negative_length_is_rejected() {
        let bytes = (-5i32).to_be_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_blob(), Err(WireError::InvalidLength(-5)));
    }

    #[test]
    fn test_patch_i32() {
        let mut w = WireWriter::new();
        w.put_i32(0);
        w.put_i32(7);
        w.patch_i32(0, 8).unwrap();
        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.get_i32().unwrap(), 8);
        assert!(w.patch_i32(6, 1).is_err());
    }

    #[test]
    fn test_format_pack_unpack() {
        let mut buf = BytesMut::new();
        let values = vec![
            Field::I32(-7),
            Field::I64(-1 << 40),
            Field::U64(u64::MAX),
            Field::F64(2.75),
            Field::Str("node-01".to_string()),
            Field::Bytes(vec![9, 8, 7]),
        ];
        let end = pack(&mut buf, 0, "ilgdsb", &values).unwrap();
        assert_eq!(end, buf.len());

        let (decoded, consumed) = unpack(&buf, 0, "ilgdsb").unwrap();
        assert_eq!(consumed, end);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_pack_at_offset_appends() {
        let mut buf = BytesMut::new();
        let first = pack(&mut buf, 0, "i", &[Field::I32(1)]).unwrap();
        let second = pack(&mut buf, first, "g", &[Field::U64(2)]).unwrap();
        assert_eq!(second, 12);

        let (fields, _) = unpack(&buf, first, "g").unwrap();
        assert_eq!(fields, vec![Field::U64(2)]);
    }

    #[test]
    fn test_unpack_underrun() {
        let mut buf = BytesMut::new();
        pack(&mut buf, 0, "i", &[Field::I32(1)]).unwrap();
        assert!(matches!(
            unpack(&buf, 0, "ii"),
            Err(WireError::TruncatedMessage { .. })
        ));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid wire format"))]
    fn test_unknown_format_char_fails_loudly() {
        let mut buf = BytesMut::new();
        let result = pack(&mut buf, 0, "iz", &[Field::I32(1), Field::I32(2)]);
        assert!(matches!(result, Err(WireError::InvalidFormat(_))));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid wire format"))]
    fn test_mismatched_value_fails_loudly() {
        let mut buf = BytesMut::new();
        let result = pack(&mut buf, 0, "i", &[Field::Str("x".into())]);
        assert!(matches!(result, Err(WireError::InvalidFormat(_))));
    }
}
