//! Replication-log read positions.

use std::fmt;
use std::str::FromStr;

use crate::error::CdcError;

/// A position in the replication log: a segment name and a position within
/// it. Written as `"<segment>/<position>"`.
///
/// Ordering compares the segment name first, so segment names must sort in
/// log order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    /// Log segment (file) identifier.
    pub segment: String,
    /// Position within the segment.
    pub position: u64,
}

impl Offset {
    /// Creates an offset.
    #[must_use]
    pub fn new(segment: impl Into<String>, position: u64) -> Self {
        Self {
            segment: segment.into(),
            position,
        }
    }

    /// Converts a PostgreSQL LSN (`"16/B374D848"`) into an offset.
    ///
    /// The high word becomes a zero-padded hex segment so that segments sort
    /// in log order; the low word becomes the position.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::InvalidOffset` if `lsn` is not `hex/hex`.
    pub fn from_pg_lsn(lsn: &str) -> Result<Self, CdcError> {
        let invalid = || CdcError::InvalidOffset(lsn.to_owned());
        let (hi, lo) = lsn.trim().split_once('/').ok_or_else(invalid)?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| invalid())?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| invalid())?;
        Ok(Self::new(format!("{hi:08X}"), u64::from(lo)))
    }

    /// Converts the offset back into PostgreSQL LSN text.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::InvalidOffset` if the offset was not produced by
    /// [`Offset::from_pg_lsn`].
    pub fn to_pg_lsn(&self) -> Result<String, CdcError> {
        let invalid = || CdcError::InvalidOffset(self.to_string());
        let hi = u32::from_str_radix(&self.segment, 16).map_err(|_| invalid())?;
        let lo = u32::try_from(self.position).map_err(|_| invalid())?;
        Ok(format!("{hi:X}/{lo:X}"))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment, self.position)
    }
}

impl FromStr for Offset {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CdcError::InvalidOffset(s.to_owned());
        let (segment, position) = s.trim().rsplit_once('/').ok_or_else(invalid)?;
        if segment.is_empty() {
            return Err(invalid());
        }
        let position = position.parse().map_err(|_| invalid())?;
        Ok(Self::new(segment, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let offset: Offset = "bin.001/454".parse().unwrap();

        assert_eq!(offset, Offset::new("bin.001", 454));
        assert_eq!(offset.to_string(), "bin.001/454");
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        for text in ["", "bin.001", "/454", "bin.001/", "bin.001/-1", "bin.001/x"] {
            assert!(
                matches!(text.parse::<Offset>(), Err(CdcError::InvalidOffset(_))),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let offset: Offset = "bin.002/7\n".parse().unwrap();

        assert_eq!(offset, Offset::new("bin.002", 7));
    }

    #[test]
    fn test_ordering_follows_segment_then_position() {
        let a = Offset::new("bin.001", 900);
        let b = Offset::new("bin.002", 4);
        let c = Offset::new("bin.002", 10);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_pg_lsn_conversion() {
        let offset = Offset::from_pg_lsn("16/B374D848").unwrap();

        assert_eq!(offset.segment, "00000016");
        assert_eq!(offset.position, 0xB374_D848);
        assert_eq!(offset.to_pg_lsn().unwrap(), "16/B374D848");
    }

    #[test]
    fn test_pg_lsn_offsets_sort_in_log_order() {
        let earlier = Offset::from_pg_lsn("F/FFFFFFFF").unwrap();
        let later = Offset::from_pg_lsn("10/0").unwrap();

        assert!(earlier < later);
    }

    #[test]
    fn test_non_pg_offset_has_no_lsn() {
        assert!(Offset::new("bin.001", 4).to_pg_lsn().is_err());
    }
}
