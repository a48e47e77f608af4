use chrono::NaiveDateTime;

use crate::ledger::UnitKind;

/// Cashier-typed code alphabet. Leaves out 0/O and 1/I/L, which are easy to confuse on receipts.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;
pub const QR_PREFIX: &str = "QR-";

pub fn generate(kind: UnitKind, now: NaiveDateTime) -> String {
    match kind {
        UnitKind::Code => generate_code(),
        UnitKind::QrTransaction => generate_qr_id(now),
    }
}

fn generate_code() -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[fastrand::usize(..CODE_ALPHABET.len())] as char)
        .collect()
}

fn generate_qr_id(now: NaiveDateTime) -> String {
    format!("{QR_PREFIX}{}-{:016x}", now.and_utc().timestamp_millis(), fastrand::u64(..))
}

/// Canonical storage form of a user-supplied identifier. Codes are matched
/// case-insensitively, QR ids are opaque and kept as scanned.
pub fn normalize(identifier: &str) -> String {
    let trimmed = identifier.trim();
    if trimmed.starts_with(QR_PREFIX) {
        trimmed.to_string()
    } else {
        trimmed.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..1000 {
            let code = generate(UnitKind::Code, now());
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)), "code: {code}");
            assert_eq!(normalize(&code), code);
        }
    }

    #[test]
    fn test_qr_shape() {
        let id = generate(UnitKind::QrTransaction, now());
        assert!(id.starts_with("QR-1709294400000-"), "id: {id}");
        assert_eq!(id.len(), QR_PREFIX.len() + 13 + 1 + 16);
        assert_ne!(id, generate(UnitKind::QrTransaction, now()));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" ab3k9z "), "AB3K9Z");
        assert_eq!(normalize("QR-1-00ff"), "QR-1-00ff");
    }
}
