use std::borrow::Cow;

use alloy_primitives::B256;

use crate::event::{LifecycleEvent, SERVICE_NAME};

/// Format a 32-byte hash as lowercase hex with `0x` prefix
pub fn format_hash_hex(hash: &B256) -> String {
    format!("{hash:#x}")
}

/// Format one CSV line:
/// `service,trace_hash,code,event,time_ms,block_height,block_hash,sequence`
pub(crate) fn format_csv_line(
    trace: &B256,
    event: LifecycleEvent,
    current_time: u128,
    block: Option<(u64, B256)>,
    sequence: Option<u64>,
) -> String {
    fn escape_csv(s: &str) -> Cow<'_, str> {
        if s.contains(',') || s.contains('"') || s.contains('\n') {
            Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
        } else {
            Cow::Borrowed(s)
        }
    }

    let block_height = block.map(|(n, _)| n.to_string()).unwrap_or_default();
    let block_hash = block.map(|(_, h)| format_hash_hex(&h)).unwrap_or_default();
    let sequence = sequence.map(|s| s.to_string()).unwrap_or_default();

    format!(
        "{},{},{},{},{},{},{},{}",
        escape_csv(SERVICE_NAME),
        format_hash_hex(trace),
        event.as_u64(),
        event.as_str(),
        current_time,
        block_height,
        block_hash,
        sequence,
    )
}

/// Get current timestamp in milliseconds since UNIX epoch
pub(crate) fn current_timestamp_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_block_line() {
        let hash = B256::repeat_byte(0xab);
        let line = format_csv_line(&hash, LifecycleEvent::BlockStored, 17, Some((5, hash)), None);
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], "purchase-node");
        assert_eq!(fields[1], format_hash_hex(&hash));
        assert_eq!(fields[2], "3024");
        assert_eq!(fields[3], "block_stored");
        assert_eq!(fields[4], "17");
        assert_eq!(fields[5], "5");
        assert_eq!(fields[6], fields[1]);
        assert_eq!(fields[7], "");
    }

    #[test]
    fn test_format_tx_line() {
        let line =
            format_csv_line(&B256::ZERO, LifecycleEvent::TxAdmitted, 1, None, Some(42));
        assert!(line.ends_with(",1,,,42"));
        assert!(line.starts_with(&format!("purchase-node,0x{}", "00".repeat(32))));
    }
}
