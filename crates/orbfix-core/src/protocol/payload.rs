//! Payload formatting for logs

/// Space-separated uppercase hex, as printed in logs
pub fn hexdump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
