//! Magnet URI and `.torrent` metainfo parsing.
//!
//! Only the fields the engine core needs are extracted; the engine session performs the
//! full validation when the torrent is added.

use std::collections::HashMap;

use data_encoding::BASE32;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::{TorrentError, TorrentResult};
use crate::model::{InfoHash, TrackerEntry};

const MAGNET_SCHEME: &str = "magnet";
const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed magnet URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Info-hash from the `xt` parameter.
    pub hash: InfoHash,
    /// Display name from `dn`.
    pub name: Option<String>,
    /// Announce URLs from `tr`.
    pub trackers: Vec<String>,
}

/// One file described by a metainfo payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetainfoFile {
    /// Path relative to the torrent root, `/` separated.
    pub path: String,
    /// Size in bytes.
    pub length: i64,
}

/// Parsed `.torrent` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    /// SHA-1 of the bencoded `info` dictionary.
    pub hash: InfoHash,
    /// Torrent name.
    pub name: String,
    /// Piece size in bytes.
    pub piece_length: i64,
    /// Number of pieces.
    pub piece_count: usize,
    /// Files in payload order.
    pub files: Vec<MetainfoFile>,
    /// Trackers from `announce` and `announce-list`.
    pub trackers: Vec<TrackerEntry>,
}

impl Metainfo {
    /// Sum of every file length.
    #[must_use]
    pub fn total_length(&self) -> i64 {
        self.files.iter().map(|file| file.length).sum()
    }
}

/// Parse a magnet URI.
///
/// # Errors
///
/// Returns [`TorrentError::InvalidMagnet`] when the URI is malformed or carries no usable
/// `urn:btih:` topic.
pub fn parse_magnet(uri: &str) -> TorrentResult<MagnetLink> {
    let url = Url::parse(uri.trim()).map_err(|_| TorrentError::InvalidMagnet {
        reason: "malformed uri",
    })?;
    if url.scheme() != MAGNET_SCHEME {
        return Err(TorrentError::InvalidMagnet {
            reason: "scheme is not magnet",
        });
    }

    let mut hash = None;
    let mut name = None;
    let mut trackers = Vec::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                if hash.is_none()
                    && let Some(encoded) = value.strip_prefix(BTIH_PREFIX)
                {
                    hash = Some(decode_btih(encoded)?);
                }
            }
            "dn" => name = Some(value.into_owned()),
            "tr" => trackers.push(value.into_owned()),
            _ => {}
        }
    }

    let hash = hash.ok_or(TorrentError::InvalidMagnet {
        reason: "missing btih topic",
    })?;
    Ok(MagnetLink {
        hash,
        name,
        trackers,
    })
}

fn decode_btih(encoded: &str) -> TorrentResult<InfoHash> {
    match encoded.len() {
        40 => InfoHash::from_hex(encoded).map_err(|_| TorrentError::InvalidMagnet {
            reason: "btih is not hex",
        }),
        32 => {
            let decoded = BASE32
                .decode(encoded.to_ascii_uppercase().as_bytes())
                .map_err(|_| TorrentError::InvalidMagnet {
                    reason: "btih is not base32",
                })?;
            let bytes: [u8; 20] =
                decoded
                    .try_into()
                    .map_err(|_| TorrentError::InvalidMagnet {
                        reason: "btih has wrong length",
                    })?;
            Ok(InfoHash::new(bytes))
        }
        _ => Err(TorrentError::InvalidMagnet {
            reason: "btih has wrong length",
        }),
    }
}

/// Parse a bencoded `.torrent` payload.
///
/// # Errors
///
/// Returns [`TorrentError::InvalidMetainfo`] when the payload is not a bencoded dictionary
/// with a well-formed `info` section.
pub fn parse_metainfo(bytes: &[u8]) -> TorrentResult<Metainfo> {
    let root = serde_bencode::from_bytes::<Value>(bytes).map_err(|_| {
        TorrentError::InvalidMetainfo {
            reason: "payload is not bencode",
        }
    })?;
    let Value::Dict(root) = root else {
        return Err(TorrentError::InvalidMetainfo {
            reason: "root is not a dictionary",
        });
    };
    let info_value = root
        .get(b"info".as_slice())
        .ok_or(TorrentError::InvalidMetainfo {
            reason: "missing info dictionary",
        })?;
    let Value::Dict(info) = info_value else {
        return Err(TorrentError::InvalidMetainfo {
            reason: "info is not a dictionary",
        });
    };

    let encoded_info =
        serde_bencode::to_bytes(info_value).map_err(|_| TorrentError::InvalidMetainfo {
            reason: "info dictionary cannot be encoded",
        })?;
    let mut digest = [0_u8; 20];
    digest.copy_from_slice(&Sha1::digest(&encoded_info));

    let name = text(info, b"name").ok_or(TorrentError::InvalidMetainfo {
        reason: "missing name",
    })?;
    let piece_length = integer(info, b"piece length")
        .filter(|length| *length > 0)
        .ok_or(TorrentError::InvalidMetainfo {
            reason: "missing piece length",
        })?;
    let pieces = match info.get(b"pieces".as_slice()) {
        Some(Value::Bytes(pieces)) if pieces.len().is_multiple_of(20) => pieces.len() / 20,
        _ => {
            return Err(TorrentError::InvalidMetainfo {
                reason: "invalid pieces field",
            });
        }
    };

    let files = if let Some(length) = integer(info, b"length") {
        vec![MetainfoFile {
            path: name.clone(),
            length,
        }]
    } else {
        parse_files(info)?
    };

    Ok(Metainfo {
        hash: InfoHash::new(digest),
        name,
        piece_length,
        piece_count: pieces,
        files,
        trackers: parse_trackers(&root),
    })
}

fn parse_files(info: &HashMap<Vec<u8>, Value>) -> TorrentResult<Vec<MetainfoFile>> {
    let Some(Value::List(entries)) = info.get(b"files".as_slice()) else {
        return Err(TorrentError::InvalidMetainfo {
            reason: "missing length or files",
        });
    };
    entries
        .iter()
        .map(|entry| {
            let Value::Dict(entry) = entry else {
                return Err(TorrentError::InvalidMetainfo {
                    reason: "file entry is not a dictionary",
                });
            };
            let length = integer(entry, b"length").ok_or(TorrentError::InvalidMetainfo {
                reason: "file entry without length",
            })?;
            let Some(Value::List(parts)) = entry.get(b"path".as_slice()) else {
                return Err(TorrentError::InvalidMetainfo {
                    reason: "file entry without path",
                });
            };
            let path = parts
                .iter()
                .filter_map(|part| match part {
                    Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");
            Ok(MetainfoFile { path, length })
        })
        .collect()
}

fn parse_trackers(root: &HashMap<Vec<u8>, Value>) -> Vec<TrackerEntry> {
    let mut trackers = Vec::new();
    if let Some(Value::List(tiers)) = root.get(b"announce-list".as_slice()) {
        for (tier, urls) in tiers.iter().enumerate() {
            let Value::List(urls) = urls else { continue };
            let tier = i32::try_from(tier).unwrap_or(i32::MAX);
            for url in urls {
                if let Value::Bytes(url) = url {
                    trackers.push(TrackerEntry {
                        announce: String::from_utf8_lossy(url).into_owned(),
                        tier,
                    });
                }
            }
        }
    }
    if let Some(announce) = text(root, b"announce")
        && !trackers.iter().any(|entry| entry.announce == announce)
    {
        trackers.insert(
            0,
            TrackerEntry {
                announce,
                tier: 0,
            },
        );
    }
    trackers
}

fn text(dict: &HashMap<Vec<u8>, Value>, key: &[u8]) -> Option<String> {
    match dict.get(key) {
        Some(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn integer(dict: &HashMap<Vec<u8>, Value>, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Some(Value::Int(value)) => Some(*value),
        _ => None,
    }
}

/// Encode a minimal single-file metainfo payload.
///
/// Used by fixtures and the in-memory session to fabricate torrents.
#[must_use]
pub fn encode_single_file(name: &str, length: i64, piece_length: i64, announce: &str) -> Vec<u8> {
    let piece_length = piece_length.max(1);
    let pieces = usize::try_from((length.max(0) + piece_length - 1) / piece_length).unwrap_or(0);
    let mut info = HashMap::new();
    info.insert(b"name".to_vec(), Value::Bytes(name.as_bytes().to_vec()));
    info.insert(b"length".to_vec(), Value::Int(length));
    info.insert(b"piece length".to_vec(), Value::Int(piece_length));
    info.insert(b"pieces".to_vec(), Value::Bytes(vec![0_u8; pieces * 20]));
    let mut root = HashMap::new();
    root.insert(b"info".to_vec(), Value::Dict(info));
    if !announce.is_empty() {
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(announce.as_bytes().to_vec()),
        );
    }
    serde_bencode::to_bytes(&Value::Dict(root)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_with_hex_topic_parses() {
        let uri = format!(
            "magnet:?xt=urn:btih:{}&dn=Ubuntu%20ISO&tr=udp%3A%2F%2Ftracker.example%3A80",
            "ab".repeat(20)
        );
        let link = parse_magnet(&uri).expect("parse magnet");
        assert_eq!(link.hash, InfoHash::new([0xab; 20]));
        assert_eq!(link.name.as_deref(), Some("Ubuntu ISO"));
        assert_eq!(link.trackers, vec!["udp://tracker.example:80".to_string()]);
    }

    #[test]
    fn magnet_with_base32_topic_parses() {
        let encoded = BASE32.encode(&[0x11; 20]);
        let link = parse_magnet(&format!("magnet:?xt=urn:btih:{encoded}")).expect("parse");
        assert_eq!(link.hash, InfoHash::new([0x11; 20]));
    }

    #[test]
    fn magnet_rejects_bad_input() {
        assert!(matches!(
            parse_magnet("http://example.com/?xt=urn:btih:00"),
            Err(TorrentError::InvalidMagnet { .. })
        ));
        assert!(parse_magnet("magnet:?dn=nothing").is_err());
        assert!(parse_magnet("magnet:?xt=urn:btih:abc").is_err());
        assert!(parse_magnet("not a uri").is_err());
    }

    #[test]
    fn single_file_metainfo_round_trips() {
        let bytes = encode_single_file("movie.mkv", 40_000, 16_384, "http://tracker/announce");
        let meta = parse_metainfo(&bytes).expect("parse metainfo");
        assert_eq!(meta.name, "movie.mkv");
        assert_eq!(meta.total_length(), 40_000);
        assert_eq!(meta.piece_count, 3);
        assert_eq!(meta.trackers.len(), 1);

        let again = parse_metainfo(&bytes).expect("parse metainfo");
        assert_eq!(again.hash, meta.hash);
        assert_ne!(
            parse_metainfo(&encode_single_file("other", 40_000, 16_384, ""))
                .expect("parse")
                .hash,
            meta.hash
        );
    }

    #[test]
    fn metainfo_rejects_garbage() {
        assert!(matches!(
            parse_metainfo(b"not bencode"),
            Err(TorrentError::InvalidMetainfo { .. })
        ));
        assert!(parse_metainfo(b"d4:spami1ee").is_err());
    }
}
