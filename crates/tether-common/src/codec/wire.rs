//! Primitive wire encodings: LEB128 varints, zigzag, fixed-width numbers and
//! length-prefixed strings.
//!
//! Reads are bounds-checked and return [`CodecError`] instead of panicking.

use bytes::{BufMut, BytesMut};

use crate::protocol::error::CodecError;

pub(crate) struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub(crate) fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub(crate) fn put_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.put_u8((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    pub(crate) fn put_zigzag(&mut self, v: i64) {
        self.put_varint(((v << 1) ^ (v >> 63)) as u64);
    }

    pub(crate) fn put_len(&mut self, len: usize) {
        self.put_varint(len as u64);
    }

    pub(crate) fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub(crate) fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub(crate) fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub(crate) fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.buf.put_slice(bytes);
    }

    pub(crate) fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// `0` for `None`, otherwise byte length + 1 followed by the bytes.
    pub(crate) fn put_opt_str(&mut self, s: Option<&str>) {
        match s {
            None => self.put_varint(0),
            Some(s) => {
                self.put_varint(s.len() as u64 + 1);
                self.buf.put_slice(s.as_bytes());
            }
        }
    }
}

pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.get_u8()?;
            // The tenth byte may only carry the top bit.
            if shift == 63 && byte > 1 {
                return Err(CodecError::MalformedVarint);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::MalformedVarint)
    }

    pub(crate) fn get_varint_u32(&mut self) -> Result<u32, CodecError> {
        u32::try_from(self.get_varint()?).map_err(|_| CodecError::MalformedVarint)
    }

    pub(crate) fn get_zigzag(&mut self) -> Result<i64, CodecError> {
        let raw = self.get_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub(crate) fn get_zigzag_i32(&mut self) -> Result<i32, CodecError> {
        i32::try_from(self.get_zigzag()?).map_err(|_| CodecError::MalformedVarint)
    }

    /// Reads a declared element count and rejects counts that could not
    /// possibly fit in the remaining input, at `min_element_size` bytes each.
    pub(crate) fn get_len(&mut self, min_element_size: usize) -> Result<usize, CodecError> {
        let size = usize::try_from(self.get_varint()?).map_err(|_| CodecError::MalformedVarint)?;
        let remaining = self.remaining();
        if size.saturating_mul(min_element_size.max(1)) > remaining && size > 0 {
            return Err(CodecError::SizeOutOfBounds { size, remaining });
        }
        Ok(size)
    }

    pub(crate) fn get_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub(crate) fn get_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub(crate) fn get_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub(crate) fn get_raw<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.take_array()
    }

    pub(crate) fn get_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.get_len(1)?;
        self.take(len)
    }

    pub(crate) fn get_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub(crate) fn get_opt_string(&mut self) -> Result<Option<String>, CodecError> {
        let tag = usize::try_from(self.get_varint()?).map_err(|_| CodecError::MalformedVarint)?;
        if tag == 0 {
            return Ok(None);
        }
        let bytes = self.take(tag - 1)?;
        std::str::from_utf8(bytes)
            .map(|s| Some(s.to_owned()))
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut WireWriter)) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(16);
        f(&mut writer);
        writer.into_inner().to_vec()
    }

    #[test]
    fn test_varint_layout() {
        assert_eq!(written(|w| w.put_varint(0)), vec![0x00]);
        assert_eq!(written(|w| w.put_varint(127)), vec![0x7f]);
        assert_eq!(written(|w| w.put_varint(128)), vec![0x80, 0x01]);
        assert_eq!(written(|w| w.put_varint(300)), vec![0xac, 0x02]);
    }

    #[test]
    fn test_zigzag_extremes() {
        for v in [0i64, -1, 1, i64::MIN, i64::MAX] {
            let bytes = written(|w| w.put_zigzag(v));
            assert_eq!(WireReader::new(&bytes).get_zigzag().unwrap(), v);
        }
        assert_eq!(written(|w| w.put_zigzag(-1)), vec![0x01]);
    }

    #[test]
    fn test_overlong_varint_is_rejected() {
        let bytes = [0xffu8; 11];
        assert_eq!(
            WireReader::new(&bytes).get_varint(),
            Err(CodecError::MalformedVarint)
        );
    }

    #[test]
    fn test_truncated_reads_report_eof() {
        let mut reader = WireReader::new(&[0x80]);
        assert_eq!(
            reader.get_varint(),
            Err(CodecError::UnexpectedEof { needed: 1 })
        );

        let mut reader = WireReader::new(&[0x05, b'a', b'b']);
        assert!(matches!(
            reader.get_string(),
            Err(CodecError::SizeOutOfBounds { size: 5, remaining: 2 })
        ));
    }

    #[test]
    fn test_optional_string() {
        let bytes = written(|w| {
            w.put_opt_str(None);
            w.put_opt_str(Some(""));
            w.put_opt_str(Some("boom"));
        });
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.get_opt_string().unwrap(), None);
        assert_eq!(reader.get_opt_string().unwrap(), Some(String::new()));
        assert_eq!(reader.get_opt_string().unwrap(), Some("boom".to_string()));
        assert_eq!(reader.remaining(), 0);
    }
}
