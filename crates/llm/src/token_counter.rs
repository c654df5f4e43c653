use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// Requests above this count take the long-context route.
pub const LONG_CONTEXT_THRESHOLD: usize = 60_000;

fn bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(error) => {
            log::error!("Failed to initialize BPE vocabulary, token counting disabled: {error}");
            None
        }
    })
    .as_ref()
}

/// Approximate BPE token count of a serialized request body.
///
/// Deterministic for a given input. Returns 0 when the body is not valid
/// UTF-8 or the vocabulary failed to load, so the long-context route is
/// bypassed rather than misfired.
pub fn count(body: &[u8]) -> usize {
    let Ok(text) = std::str::from_utf8(body) else {
        return 0;
    };

    match bpe() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic() {
        let body = br#"{"model":"claude-3-5-sonnet","messages":[{"role":"user","content":"Hello there"}]}"#;

        let first = count(body);
        let second = count(body);

        assert!(first > 0);
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_utf8_counts_as_zero() {
        assert_eq!(count(&[0xff, 0xfe, 0x80]), 0);
    }

    #[test]
    fn longer_bodies_count_more_tokens() {
        let short = count(b"hello");
        let long = count("hello ".repeat(100).as_bytes());

        assert!(long > short);
    }
}
