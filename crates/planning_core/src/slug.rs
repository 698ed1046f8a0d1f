use sha2::{Digest, Sha256};

const MAX_SLUG_LEN: usize = 80;

/// URL-safe, deterministic slug: `{reference}-{address}` lowercased with every
/// run of non-alphanumerics collapsed to a single `-`.
pub fn record_slug(reference: &str, address: &str) -> String {
    let mut slug = sanitize(&format!("{reference} {address}"));
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug = "application".to_string();
    }
    slug
}

/// Stable identity for upserts: first 8 bytes of sha256(`source_id:reference`) as hex.
pub fn record_key(source_id: &str, reference: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(reference.trim().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
