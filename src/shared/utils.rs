use crate::shared::error::WatcherError;
use crate::shared::types::Pubkey;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;

pub mod hex {
    use super::*;

    pub fn encode(data: &[u8]) -> String {
        format!("0x{}", ::hex::encode(data))
    }

    pub fn decode(s: &str) -> Result<Vec<u8>> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        ::hex::decode(s).map_err(|e| anyhow::anyhow!("Invalid hex string: {}", e))
    }

    pub fn decode_to_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
        let bytes = decode(s)?;
        if bytes.len() != N {
            return Err(anyhow::anyhow!("Expected {} bytes, got {}", N, bytes.len()));
        }

        let mut result = [0u8; N];
        result.copy_from_slice(&bytes);
        Ok(result)
    }
}

/// SSZ bitfield helpers for attestation aggregation and committee bits.
pub mod bits {
    use super::*;

    /// Decodes an SSZ bitlist. Bit `i` of byte `j` is position `8 * j + i`;
    /// the highest set bit only marks the length and is dropped.
    pub fn decode_bitlist(s: &str) -> std::result::Result<Vec<bool>, WatcherError> {
        let bytes = hex::decode(s).map_err(|e| WatcherError::InvalidBitfield(e.to_string()))?;
        let last = bytes
            .iter()
            .rposition(|b| *b != 0)
            .ok_or_else(|| WatcherError::InvalidBitfield("bitlist without delimiter".to_string()))?;
        let delimiter = last * 8 + (7 - bytes[last].leading_zeros() as usize);

        Ok((0..delimiter)
            .map(|i| bytes[i / 8] >> (i % 8) & 1 == 1)
            .collect())
    }

    /// Indices set in an SSZ bitvector (no delimiter bit).
    pub fn set_positions(s: &str) -> std::result::Result<Vec<usize>, WatcherError> {
        let bytes = hex::decode(s).map_err(|e| WatcherError::InvalidBitfield(e.to_string()))?;
        Ok((0..bytes.len() * 8)
            .filter(|i| bytes[i / 8] >> (i % 8) & 1 == 1)
            .collect())
    }
}

/// Serde helpers for the beacon API, which quotes every integer.
pub mod quoted {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u64),
    }

    pub fn u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::Number(n) => Ok(n),
            StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn vec_u64<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<StringOrNumber>::deserialize(deserializer)?
            .into_iter()
            .map(|item| match item {
                StringOrNumber::Number(n) => Ok(n),
                StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
            })
            .collect()
    }
}

pub mod time {
    use super::*;

    pub fn format_duration(seconds: u64) -> String {
        let days = seconds / 86_400;
        let hours = (seconds % 86_400) / 3600;
        let minutes = (seconds % 3600) / 60;
        let secs = seconds % 60;

        if days > 0 {
            format!("{}d {}h {}m", days, hours, minutes)
        } else if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, secs)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Bounds a collaborator call; an elapsed deadline becomes a transient error.
    pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(WatcherError::Timeout(format!("{} after {}ms", what, limit.as_millis())).into()),
        }
    }

    /// Calls `attempt` until it succeeds, doubling the pause between tries up
    /// to `max_delay`. Returns `None` once `stop` completes.
    pub async fn retry_with_backoff<T, F, Fut, S>(
        what: &str,
        initial_delay: Duration,
        max_delay: Duration,
        stop: S,
        mut attempt: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut delay = initial_delay;

        loop {
            tokio::select! {
                result = attempt() => match result {
                    Ok(value) => return Some(value),
                    Err(e) => tracing::warn!("{} failed, retrying in {}ms: {}", what, delay.as_millis(), e),
                },
                _ = &mut stop => return None,
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop => return None,
            }
            delay = (delay * 2).min(max_delay);
        }
    }
}

pub mod format {
    use super::*;
    use crate::shared::constants::watcher::MAX_LISTED_KEYS;

    /// "0xaaaaaaaa, 0xbbbbbbbb and 3 more"
    pub fn short_keys<'a>(keys: impl IntoIterator<Item = &'a Pubkey>) -> String {
        let keys: Vec<&Pubkey> = keys.into_iter().collect();
        let listed: Vec<&str> = keys.iter().take(MAX_LISTED_KEYS).map(|k| k.short()).collect();
        let rest = keys.len().saturating_sub(listed.len());
        if rest == 0 {
            listed.join(", ")
        } else {
            format!("{} and {} more", listed.join(", "), rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encoding() {
        let data = b"Hello, World!";
        let encoded = hex::encode(data);
        assert_eq!(encoded, "0x48656c6c6f2c20576f726c6421");

        let decoded = hex::decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_bitlist() {
        // 0b0000_1101: positions 0 and 2 set, delimiter at 3
        let bits = bits::decode_bitlist("0x0d").unwrap();
        assert_eq!(bits, vec![true, false, true]);

        // Delimiter in the second byte: 9 positions, only position 8 set
        let bits = bits::decode_bitlist("0x0003").unwrap();
        assert_eq!(bits.len(), 9);
        assert!(bits[8]);
        assert!(bits[..8].iter().all(|b| !b));

        assert!(bits::decode_bitlist("0x00").is_err());
        assert!(bits::decode_bitlist("0xzz").is_err());
    }

    #[test]
    fn test_set_positions() {
        assert_eq!(bits::set_positions("0x0500").unwrap(), vec![0, 2]);
        assert_eq!(bits::set_positions("0x0001").unwrap(), vec![8]);
    }

    #[test]
    fn test_quoted_u64() {
        #[derive(serde::Deserialize)]
        struct Item {
            #[serde(deserialize_with = "quoted::u64")]
            slot: u64,
            #[serde(deserialize_with = "quoted::vec_u64")]
            validators: Vec<u64>,
        }

        let item: Item = serde_json::from_str(r#"{"slot":"42","validators":["1",2]}"#).unwrap();
        assert_eq!(item.slot, 42);
        assert_eq!(item.validators, vec![1, 2]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(time::format_duration(42), "42s");
        assert_eq!(time::format_duration(3_725), "1h 2m 5s");
        assert_eq!(time::format_duration(90_000), "1d 1h 0m");
    }

    #[test]
    fn test_short_keys() {
        let keys: Vec<Pubkey> = (0..7u8)
            .map(|i| format!("0x{}", format!("{:02x}", i).repeat(48)).parse().unwrap())
            .collect();
        let line = format::short_keys(keys.iter());
        assert!(line.starts_with("0x00000000, 0x01010101"));
        assert!(line.ends_with("and 2 more"));
        assert_eq!(format::short_keys(keys.iter().take(1)), "0x00000000");
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = time::with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("slow call"));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let attempts = &counter;
        let result = time::retry_with_backoff(
            "connect",
            Duration::from_millis(5),
            Duration::from_millis(20),
            std::future::pending(),
            || async move {
                if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 3 {
                    Err(anyhow::anyhow!("connection refused"))
                } else {
                    Ok(42)
                }
            },
        );
        let value = tokio::time::timeout(Duration::from_secs(2), result).await.unwrap();
        assert_eq!(value, Some(42));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_stops_on_request() {
        let result: Option<()> = tokio::time::timeout(
            Duration::from_secs(2),
            time::retry_with_backoff(
                "connect",
                Duration::from_millis(5),
                Duration::from_millis(20),
                tokio::time::sleep(Duration::from_millis(50)),
                || async { Err(anyhow::anyhow!("connection refused")) },
            ),
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }
}
