use thiserror::Error;

/// Class names in model output order.
pub const CLASS_NAMES: [&str; 7] = [
    "Assault",
    "Balaclava",
    "Intrusion",
    "Suspect",
    "Weapons",
    "Bags Theft",
    "Undefined",
];

/// The detector emitted a class id outside [`CLASS_NAMES`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("detector emitted class id {0}, outside the {len}-entry label table", len = CLASS_NAMES.len())]
pub struct UnknownClassId(pub i64);

pub fn class_name(class_id: i64) -> Result<&'static str, UnknownClassId> {
    usize::try_from(class_id)
        .ok()
        .and_then(|idx| CLASS_NAMES.get(idx).copied())
        .ok_or(UnknownClassId(class_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_table_entry() {
        for (idx, name) in CLASS_NAMES.iter().enumerate() {
            assert_eq!(class_name(idx as i64), Ok(*name));
        }
    }

    #[test]
    fn rejects_out_of_range_ids() {
        assert_eq!(class_name(7), Err(UnknownClassId(7)));
        assert_eq!(class_name(-1), Err(UnknownClassId(-1)));
        assert!(UnknownClassId(9).to_string().contains("7-entry"));
    }
}
