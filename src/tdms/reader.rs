//! Byte-level reading helpers for TDMS segments.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::TdmsError;

/// Byte order of a segment, taken from the ToC big-endian flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Little,
    Big,
}

/// Bounds-checked reader over one region of a TDMS file.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

macro_rules! impl_read {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name(&mut self) -> Result<$ty, TdmsError> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.take(N)?;
            let mut buf = [0u8; N];
            buf.copy_from_slice(bytes);
            Ok(match self.order {
                ByteOrder::Little => <$ty>::from_le_bytes(buf),
                ByteOrder::Big => <$ty>::from_be_bytes(buf),
            })
        }
    };
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], TdmsError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(TdmsError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    impl_read!(read_u8, u8);
    impl_read!(read_u16, u16);
    impl_read!(read_u32, u32);
    impl_read!(read_u64, u64);
    impl_read!(read_i8, i8);
    impl_read!(read_i16, i16);
    impl_read!(read_i32, i32);
    impl_read!(read_i64, i64);
    impl_read!(read_f32, f32);
    impl_read!(read_f64, f64);

    pub(crate) fn read_bool(&mut self) -> Result<bool, TdmsError> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed UTF-8 string (u32 length followed by the bytes).
    pub(crate) fn read_string(&mut self) -> Result<String, TdmsError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// TDMS timestamp: 2^-64 second fractions and seconds since 1904-01-01.
    /// Little-endian files store the fractions first, big-endian the seconds.
    pub(crate) fn read_timestamp(&mut self) -> Result<DateTime<Utc>, TdmsError> {
        let (fractions, seconds) = match self.order {
            ByteOrder::Little => {
                let fractions = self.read_u64()?;
                let seconds = self.read_i64()?;
                (fractions, seconds)
            }
            ByteOrder::Big => {
                let seconds = self.read_i64()?;
                let fractions = self.read_u64()?;
                (fractions, seconds)
            }
        };
        let nanos = (fractions as f64 * (1e9 / 2f64.powi(64))) as i64;
        tdms_epoch()
            .checked_add_signed(Duration::seconds(seconds))
            .and_then(|t| t.checked_add_signed(Duration::nanoseconds(nanos)))
            .ok_or_else(|| TdmsError::InvalidMetadata("timestamp out of range".to_string()))
    }
}

fn tdms_epoch() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1904, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_both_byte_orders() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut le = Reader::new(&data, ByteOrder::Little);
        assert_eq!(le.read_u32().unwrap(), 0x0403_0201);
        let mut be = Reader::new(&data, ByteOrder::Big);
        assert_eq!(be.read_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn eof_is_reported() {
        let mut r = Reader::new(&[0x01], ByteOrder::Little);
        assert!(matches!(r.read_u32(), Err(TdmsError::UnexpectedEof)));
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut data = 5u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"hello");
        let mut r = Reader::new(&data, ByteOrder::Little);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn timestamp_epoch_is_1904() {
        // Zero fractions, zero seconds
        let data = [0u8; 16];
        let mut r = Reader::new(&data, ByteOrder::Little);
        let ts = r.read_timestamp().unwrap();
        assert_eq!(ts.to_rfc3339(), "1904-01-01T00:00:00+00:00");
    }
}
