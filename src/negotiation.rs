//! Component H: Content Negotiation. Matches `Accept-Encoding` against the
//! available `.br`/`.gz`/plain variants of a logical path and decompresses
//! buffered variants that are served as identity.

use std::io::Read;

use thiserror::Error;

use crate::manifest::{FileEntry, SiteManifest};

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Brotli,
    Gzip,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptEncoding {
    pub brotli: bool,
    pub gzip: bool,
}

/// Token-match, order-insensitive parse of an `Accept-Encoding` header.
pub fn parse_accept_encoding(header: Option<&str>) -> AcceptEncoding {
    let Some(header) = header else {
        return AcceptEncoding::default();
    };
    let mut accepted = AcceptEncoding::default();
    for token in header.split(',') {
        let token = token.trim().split(';').next().unwrap_or("").trim();
        match token {
            "br" => accepted.brotli = true,
            "gzip" | "x-gzip" => accepted.gzip = true,
            _ => {}
        }
    }
    accepted
}

/// A path candidate to try, in decreasing preference order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: FileEntry,
    pub compression: Compression,
}

/// Builds the ordered candidate list for a single logical path per the
/// selection rule: brotli, then gzip, then plain, whichever the manifest
/// and the client's `Accept-Encoding` both admit.
pub fn candidates_for(manifest: &SiteManifest, logical_path: &str, accepted: AcceptEncoding) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(3);

    if accepted.brotli {
        let br_path = format!("{logical_path}.br");
        if let Some(entry) = manifest.find(&br_path) {
            out.push(Candidate {
                entry: entry.clone(),
                compression: Compression::Brotli,
            });
        }
    }
    if accepted.gzip {
        let gz_path = format!("{logical_path}.gz");
        if let Some(entry) = manifest.find(&gz_path) {
            out.push(Candidate {
                entry: entry.clone(),
                compression: Compression::Gzip,
            });
        }
    }
    if let Some(entry) = manifest.find(logical_path) {
        out.push(Candidate {
            entry: entry.clone(),
            compression: Compression::None,
        });
    }

    out
}

/// Buffered decompression. Streaming would save memory; the spec only
/// requires that a failure falls cleanly through to the next candidate.
pub fn decompress(compression: Compression, bytes: &[u8]) -> Result<Vec<u8>, DecompressError> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Brotli => {
            let mut out = Vec::new();
            brotli::BrotliDecompress(&mut std::io::Cursor::new(bytes), &mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_br_and_gzip_tokens() {
        let accepted = parse_accept_encoding(Some("gzip, br;q=1.0, deflate"));
        assert!(accepted.brotli);
        assert!(accepted.gzip);
    }

    #[test]
    fn missing_header_accepts_nothing() {
        let accepted = parse_accept_encoding(None);
        assert!(!accepted.brotli);
        assert!(!accepted.gzip);
    }

    #[test]
    fn gzip_roundtrips() {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();

        let decompressed = decompress(Compression::Gzip, &compressed).unwrap();
        assert_eq!(decompressed, b"hello world");
    }

    #[test]
    fn corrupt_gzip_fails_cleanly() {
        let result = decompress(Compression::Gzip, b"not gzip data");
        assert!(result.is_err());
    }
}
