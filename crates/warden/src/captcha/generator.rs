//! CAPTCHA digit generation and image rendering.
//!
//! Challenges are random digit strings rendered as SVG images with noise
//! lines and jittered glyphs.

use std::sync::Weak;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use portcullis_common::{ChallengeIssued, PortcullisError};
use rand::Rng;

use super::store::ChallengeStore;
use crate::session::SessionAccess;

/// How many colliding challenge ids to re-mint before giving up
const MAX_ID_ATTEMPTS: usize = 4;

/// CAPTCHA generator service
pub struct CaptchaGenerator {
    digits_len: usize,
    img_width: u32,
    img_height: u32,
    /// Challenge TTL in seconds, echoed into the issued challenge's expiry
    ttl_secs: u64,
}

impl CaptchaGenerator {
    pub fn new(digits_len: usize, img_width: u32, img_height: u32, ttl_secs: u64) -> Self {
        Self {
            digits_len,
            img_width,
            img_height,
            ttl_secs,
        }
    }

    /// Issue a new challenge bound to `owner`'s session: mint an id,
    /// register the binding, and stash fresh digits behind it.
    pub async fn issue(
        &self,
        store: &ChallengeStore,
        owner: Weak<dyn SessionAccess>,
    ) -> Result<ChallengeIssued, PortcullisError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_challenge_id();
            match store.register(owner.clone(), &id).await {
                Ok(()) => {
                    let digits = self.generate_digits();
                    store.set_digits(&id, &digits).await;

                    tracing::debug!(challenge_id = %id, "issued CAPTCHA challenge");
                    return Ok(ChallengeIssued::new(id, self.ttl_secs));
                }
                Err(e) if e.is_retryable() => continue,
                Err(e) => return Err(e),
            }
        }

        Err(PortcullisError::Captcha(
            "could not mint a unique challenge id".to_string(),
        ))
    }

    /// Replace the digits behind a still-live challenge. A swept or unknown
    /// id is a silent no-op.
    pub async fn reload(&self, store: &ChallengeStore, id: &str) {
        let digits = self.generate_digits();
        store.set_digits(id, &digits).await;
        tracing::debug!(challenge_id = %id, "reloaded CAPTCHA digits");
    }

    /// Generate a random digit answer
    pub fn generate_digits(&self) -> Vec<u8> {
        let mut rng = rand::rng();
        (0..self.digits_len)
            .map(|_| rng.random_range(0..=9u8))
            .collect()
    }

    /// Render digits as an SVG CAPTCHA image
    pub fn render_svg(&self, digits: &[u8]) -> String {
        let mut rng = rand::rng();

        let width = self.img_width;
        let height = self.img_height;

        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}">"#,
            width, height
        );

        // Background
        svg.push_str(r##"<rect width="100%" height="100%" fill="#1a1a2e"/>"##);

        // Noise lines
        for _ in 0..12 {
            let x1 = rng.random_range(0..width);
            let y1 = rng.random_range(0..height);
            let x2 = rng.random_range(0..width);
            let y2 = rng.random_range(0..height);
            let opacity = rng.random_range(20..50);
            svg.push_str(&format!(
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="rgba(255,255,255,0.{})" stroke-width="1"/>"#,
                x1, y1, x2, y2, opacity
            ));
        }

        // Digit glyphs with slight randomization
        let char_width = width as f32 / (digits.len() as f32 + 1.0);
        for (i, digit) in digits.iter().enumerate() {
            let x = char_width * (i as f32 + 0.8);
            let y = (height as i32 * 5 / 8) + rng.random_range(-10..10);
            let rotation = rng.random_range(-15..15);
            let color = format!(
                "rgb({},{},{})",
                rng.random_range(150..255),
                rng.random_range(150..255),
                rng.random_range(150..255)
            );

            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-family="monospace" font-size="32" font-weight="bold" fill="{}" transform="rotate({} {} {})">{}</text>"#,
                x, y, color, rotation, x, y, digit
            ));
        }

        svg.push_str("</svg>");
        svg
    }
}

/// Generate a cryptographically random challenge ID
pub fn generate_challenge_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::sync::Arc;
    use std::time::Duration;

    fn generator() -> CaptchaGenerator {
        CaptchaGenerator::new(6, 200, 80, 300)
    }

    #[test]
    fn digits_are_in_range() {
        let digits = generator().generate_digits();
        assert_eq!(digits.len(), 6);
        assert!(digits.iter().all(|d| *d <= 9));
    }

    #[test]
    fn challenge_ids_are_unique() {
        assert_ne!(generate_challenge_id(), generate_challenge_id());
    }

    #[test]
    fn svg_contains_every_digit() {
        let svg = generator().render_svg(&[1, 2, 3]);
        assert!(svg.starts_with("<svg"));
        for glyph in [">1<", ">2<", ">3<"] {
            assert!(svg.contains(glyph), "missing glyph in {svg}");
        }
    }

    #[tokio::test]
    async fn issue_binds_digits_to_the_owning_session() {
        let store = ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let session = Arc::new(Session::new("s1"));

        let issued = generator()
            .issue(&store, Arc::<Session>::downgrade(&session))
            .await
            .unwrap();

        assert!(store.contains(&issued.challenge_id).await);
        let digits = store.get_digits(&issued.challenge_id, false).await.unwrap();
        assert_eq!(digits.len(), 6);
        assert!(issued.image_url.ends_with(".svg"));
    }

    #[tokio::test]
    async fn reload_replaces_digits_for_live_ids_only() {
        let store = ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        let session = Arc::new(Session::new("s1"));
        let generator = generator();

        let issued = generator
            .issue(&store, Arc::<Session>::downgrade(&session))
            .await
            .unwrap();
        generator.reload(&store, &issued.challenge_id).await;
        assert!(store.get_digits(&issued.challenge_id, false).await.is_some());

        // Unknown id: nothing happens
        generator.reload(&store, "ghost").await;
        assert!(store.get_digits("ghost", false).await.is_none());
    }
}
