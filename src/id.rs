use rand::Rng;

/// Opaque entity identifiers: a short type prefix plus 16 lowercase hex
/// characters. Generated server-side; clients must treat them as opaque.
fn prefixed(prefix: &str) -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    format!("{}_{}", prefix, hex::encode(bytes))
}

pub fn payment_id() -> String {
    prefixed("pay")
}

pub fn refund_id() -> String {
    prefixed("rfnd")
}

pub fn webhook_log_id() -> String {
    prefixed("wh")
}
