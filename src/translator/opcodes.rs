//! Mapping from the source instruction set to the emitted one.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use strum::IntoEnumIterator;

use crate::runtime::emit::OpCode;

fn table() -> &'static FxHashMap<u16, OpCode> {
    static TABLE: OnceLock<FxHashMap<u16, OpCode>> = OnceLock::new();
    TABLE.get_or_init(|| OpCode::iter().map(|opcode| (opcode.value(), opcode)).collect())
}

/// Returns the emitted opcode for a source opcode value, `None` if the runtime has no
/// equivalent
#[must_use]
pub fn convert(value: u16) -> Option<OpCode> {
    table().get(&value).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::opcodes::{self, CALL, CALLI, CPBLK, LDARG, LOCALLOC, UNBOX_ANY};

    #[test]
    fn test_convert() {
        assert_eq!(convert(CALL), Some(OpCode::Call));
        assert_eq!(convert(LDARG), Some(OpCode::Ldarg));
        assert_eq!(convert(UNBOX_ANY), Some(OpCode::UnboxAny));
        assert_eq!(convert(CALLI), None);
        assert_eq!(convert(LOCALLOC), None);
        assert_eq!(convert(CPBLK), None);
        assert_eq!(convert(0xFEFF), None);
    }

    #[test]
    fn test_every_mapped_opcode_keeps_its_mnemonic() {
        let mapped = opcodes::OPCODES
            .iter()
            .filter_map(|info| convert(info.value).map(|opcode| (info, opcode)))
            .inspect(|(info, opcode)| assert_eq!(info.mnemonic, opcode.mnemonic()))
            .count();
        assert_eq!(mapped, OpCode::iter().count());
    }
}
