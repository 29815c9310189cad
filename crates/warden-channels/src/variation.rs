//! Outbound message variation.
//!
//! Identical texts sent in bulk get flagged by WhatsApp, so every message is
//! wrapped with a random greeting and emoji and carries a random typing delay.

use rand::Rng;
use rand::seq::SliceRandom;
use warden_core::config::MessagingConfig;

const GREETINGS: &[&str] = &["Hi", "Hello", "Hey", "Hi there"];
const EMOJIS: &[&str] = &["😊", "✅", "👋", "🙌", "😄", "👍", "🎉"];

#[derive(Debug, Clone, PartialEq)]
pub struct MessageVariation {
    enabled: bool,
    min_delay_secs: u64,
    max_delay_secs: u64,
}

impl MessageVariation {
    pub fn from_config(cfg: &MessagingConfig) -> Self {
        Self {
            enabled: cfg.randomize,
            min_delay_secs: cfg.min_delay_secs.min(cfg.max_delay_secs),
            max_delay_secs: cfg.max_delay_secs.max(cfg.min_delay_secs),
        }
    }

    /// Send texts verbatim with no delay hint.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `"<greeting>, <text>\n<emoji>"`, or `text` unchanged when disabled.
    pub fn apply<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let greeting = GREETINGS.choose(rng).copied().unwrap_or("Hi");
        let emoji = EMOJIS.choose(rng).copied().unwrap_or("👋");
        format!("{greeting}, {text}\n{emoji}")
    }

    /// Typing delay hint in milliseconds, uniform in `[min, max]` seconds.
    pub fn delay_ms<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if !self.enabled {
            return 0;
        }
        rng.gen_range(self.min_delay_secs * 1000..=self.max_delay_secs * 1000)
    }
}

impl Default for MessageVariation {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_apply_wraps_text() {
        let v = MessageVariation::default();
        let mut rng = StdRng::seed_from_u64(7);
        let out = v.apply("welcome!", &mut rng);

        let (first, emoji) = out.split_once('\n').unwrap();
        assert!(first.ends_with(", welcome!"));
        assert!(GREETINGS.iter().any(|g| first.starts_with(g)));
        assert!(EMOJIS.contains(&emoji));
    }

    #[test]
    fn test_disabled_is_verbatim() {
        let v = MessageVariation::disabled();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(v.apply("hello", &mut rng), "hello");
        assert_eq!(v.delay_ms(&mut rng), 0);
    }

    #[test]
    fn test_delay_within_bounds() {
        let v = MessageVariation::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = v.delay_ms(&mut rng);
            assert!((1000..=3000).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_inverted_bounds_are_normalized() {
        let cfg = MessagingConfig {
            randomize: true,
            min_delay_secs: 5,
            max_delay_secs: 2,
        };
        let v = MessageVariation::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(1);
        let d = v.delay_ms(&mut rng);
        assert!((2000..=5000).contains(&d));
    }
}
