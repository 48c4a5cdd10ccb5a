//! Text-to-vector embedding, with a deterministic hash-n-gram fallback
//! for providers that don't expose an embeddings endpoint.

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::telemetry::{AiCallRecord, Telemetry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Dimensionality of the hash-n-gram fallback vector. Chosen to match
/// the provider embedding size this crate otherwise targets, so the
/// two can share one vector index table.
const FALLBACK_DIM: usize = 384;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct EmbeddingService {
    client: reqwest::Client,
    config: LlmConfig,
    telemetry: Option<Arc<Telemetry>>,
    /// Most providers wired up so far (DeepSeek included) don't expose
    /// an embeddings endpoint; the hash fallback is the only backend
    /// until one that does is configured.
    use_provider_embeddings: bool,
}

impl EmbeddingService {
    pub fn new(config: LlmConfig, telemetry: Option<Arc<Telemetry>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            telemetry,
            use_provider_embeddings: false,
        }
    }

    pub fn with_provider_embeddings(mut self, enabled: bool) -> Self {
        self.use_provider_embeddings = enabled;
        self
    }

    /// Embeds `text`, falling back to the deterministic hash-n-gram
    /// vector on any provider failure so callers always get a usable
    /// vector instead of having to special-case embedding outages.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if !self.use_provider_embeddings {
            let vector = simple_hash_embedding(text, FALLBACK_DIM);
            self.emit_telemetry("simple_hash", vector.len(), Instant::now(), None);
            return Ok(vector);
        }

        let started = Instant::now();
        match self.provider_embed(text).await {
            Ok(vector) => {
                self.emit_telemetry(&self.config.model, vector.len(), started, None);
                Ok(vector)
            }
            Err(err) => {
                tracing::warn!(event = "embedding_failed", error = %err);
                self.emit_telemetry(&self.config.model, 0, started, Some(err.to_string()));
                Ok(simple_hash_embedding(text, FALLBACK_DIM))
            }
        }
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    async fn provider_embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest { model: &self.config.model, input: text };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("embeddings endpoint returned {}", response.status())));
        }
        let body: EmbeddingResponse = response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Internal("embeddings response had no data".to_string()))
    }

    fn emit_telemetry(&self, model: &str, dims: usize, started: Instant, error: Option<String>) {
        let Some(telemetry) = &self.telemetry else { return };
        let mut record = AiCallRecord::new(model, "embedding");
        record.completion_tokens = dims as u32;
        record.duration_ms = started.elapsed().as_millis() as u64;
        record.error = error;
        telemetry.record(record);
    }
}

/// Deterministic prototype embedding: hash each word's 3-char substrings
/// into a fixed-size bucket vector, then L2-normalize. Ported faithfully
/// from the upstream fallback — per-word n-grams over the first 100
/// words, not whole-text n-grams, matters for parity with its output.
pub fn simple_hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f64; dim];
    let lower = text.to_lowercase();
    for word in lower.split_whitespace().take(100) {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() < 3 {
            continue;
        }
        for i in 0..chars.len() - 2 {
            let ngram: String = chars[i..i + 3].iter().collect();
            let digest = md5_digest(ngram.as_bytes());
            let idx = (digest_to_u128(&digest) % dim as u128) as usize;
            vector[idx] += 1.0;
        }
    }
    let norm: f64 = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector.into_iter().map(|v| v as f32).collect()
}

/// Minimal MD5 implementation. The fallback embedding only needs MD5 as
/// a fast, well-distributed hash into `dim` buckets, not for anything
/// security-sensitive, so a small self-contained implementation avoids
/// pulling in a dependency used nowhere else in the tree.
fn md5_digest(input: &[u8]) -> [u8; 16] {
    const S: [u32; 64] = [
        7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 5, 9, 14, 20, 5, 9, 14, 20, 5, 9, 14, 20, 5, 9,
        14, 20, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15,
        21, 6, 10, 15, 21,
    ];
    const K: [u32; 64] = [
        0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501, 0x698098d8,
        0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821, 0xf61e2562, 0xc040b340,
        0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8, 0x21e1cde6, 0xc33707d6, 0xf4d50d87,
        0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a, 0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c,
        0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70, 0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039,
        0xe6db99e5, 0x1fa27cf8, 0xc4ac5665, 0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92,
        0xffeff47d, 0x85845dd1, 0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb,
        0xeb86d391,
    ];

    let mut a0: u32 = 0x67452301;
    let mut b0: u32 = 0xefcdab89;
    let mut c0: u32 = 0x98badcfe;
    let mut d0: u32 = 0x10325476;

    let mut msg = input.to_vec();
    let bit_len = (input.len() as u64).wrapping_mul(8);
    msg.push(0x80);
    while msg.len() % 64 != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_le_bytes());

    for chunk in msg.chunks(64) {
        let mut m = [0u32; 16];
        for (i, word) in chunk.chunks(4).enumerate() {
            m[i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }

        let (mut a, mut b, mut c, mut d) = (a0, b0, c0, d0);
        for i in 0..64 {
            let (f, g) = match i {
                0..=15 => ((b & c) | (!b & d), i),
                16..=31 => ((d & b) | (!d & c), (5 * i + 1) % 16),
                32..=47 => (b ^ c ^ d, (3 * i + 5) % 16),
                _ => (c ^ (b | !d), (7 * i) % 16),
            };
            let f = f.wrapping_add(a).wrapping_add(K[i]).wrapping_add(m[g]);
            a = d;
            d = c;
            c = b;
            b = b.wrapping_add(f.rotate_left(S[i]));
        }

        a0 = a0.wrapping_add(a);
        b0 = b0.wrapping_add(b);
        c0 = c0.wrapping_add(c);
        d0 = d0.wrapping_add(d);
    }

    let mut digest = [0u8; 16];
    digest[0..4].copy_from_slice(&a0.to_le_bytes());
    digest[4..8].copy_from_slice(&b0.to_le_bytes());
    digest[8..12].copy_from_slice(&c0.to_le_bytes());
    digest[12..16].copy_from_slice(&d0.to_le_bytes());
    digest
}

fn digest_to_u128(digest: &[u8; 16]) -> u128 {
    u128::from_be_bytes(*digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        // RFC 1321 test vector: md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        let digest = md5_digest(b"abc");
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_simple_hash_embedding_is_normalized() {
        let vector = simple_hash_embedding("apple and google announce partnership", FALLBACK_DIM);
        let norm: f64 = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_simple_hash_embedding_deterministic() {
        let a = simple_hash_embedding("same text twice", FALLBACK_DIM);
        let b = simple_hash_embedding("same text twice", FALLBACK_DIM);
        assert_eq!(a, b);
    }

    #[test]
    fn test_simple_hash_embedding_empty_text() {
        let vector = simple_hash_embedding("", FALLBACK_DIM);
        assert_eq!(vector.len(), FALLBACK_DIM);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
