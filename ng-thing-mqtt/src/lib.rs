//! MQTT transport for `ng-thing-sdk`, built on rumqttc.

mod config;
mod transport;

pub use config::MqttConfig;
pub use transport::MqttTransport;

/// Longest client id every MQTT 3.1.1 broker must accept.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Map a device-derived id (`product:thing`, `/sys/p/d`, ...) onto a client id brokers
/// accept: ASCII alphanumerics, `_` and single `-` separators.
///
/// Over-long ids keep their tail, where the thing identifier sits.
pub fn normalize_client_id(raw: &str) -> String {
    let mut id = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            id.push(c);
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    let id = id.trim_end_matches('-');
    let start = id.len().saturating_sub(MAX_CLIENT_ID_LEN);
    id[start..].trim_start_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_client_id() {
        assert_eq!(normalize_client_id("p1:d1@plant"), "p1-d1-plant");
        assert_eq!(normalize_client_id("/sys/p1//d1/"), "sys-p1-d1");
        assert_eq!(normalize_client_id("ng_thing-01"), "ng_thing-01");

        let long = normalize_client_id("smart-meter-product:thing-000000042");
        assert_eq!(long, "product-thing-000000042");
        assert!(long.len() <= MAX_CLIENT_ID_LEN);
        assert_eq!(normalize_client_id("::"), "");
    }
}
