//! Wire codec for the UDP control channel.
//!
//! Every datagram is a 3-byte ASCII action tag followed by a UTF-8 body:
//! `CLI` single peer announcement, `MSG` chat text, `NCI` newline-joined
//! peer records, `CIN` directory request, `DEL` departure, `PNG` heartbeat,
//! `URQ` upload offer (`filename '\n' size`), `ACP` accepted upload
//! (ASCII decimal TCP port). The codec is pure; a failed decode leaves no
//! state behind and the caller drops the datagram.

use log::warn;
use thiserror::Error;

use crate::core::directory::PeerRecord;

pub const TAG_LEN: usize = 3;

/// Largest datagram we will read, matching the original 2^16 receive buffer.
pub const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// CLI: one serialized peer record.
    Announce(PeerRecord),
    /// MSG: raw chat text.
    Chat(String),
    /// NCI: full membership bundle; undecodable lines are skipped.
    Bundle(Vec<PeerRecord>),
    /// CIN: request for the membership bundle, empty body.
    DirectoryRequest,
    /// DEL: graceful departure of the sender, empty body.
    Depart,
    /// PNG: heartbeat, empty body.
    Heartbeat,
    /// URQ: offer to upload `filename` of `size` bytes.
    UploadOffer { filename: String, size: u64 },
    /// ACP: offer accepted, receiver listens on this TCP port.
    UploadAccept { port: u16 },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram shorter than the action tag")]
    Truncated,

    #[error("unknown action tag: {0}")]
    UnknownTag(String),

    #[error("body is not valid UTF-8")]
    NotUtf8,

    #[error("bad peer record: {0}")]
    BadRecord(#[from] serde_json::Error),

    #[error("bad {field} in {tag} body")]
    BadField {
        tag: &'static str,
        field: &'static str,
    },
}

pub fn encode(packet: &Packet) -> Vec<u8> {
    let (tag, body) = match packet {
        Packet::Announce(record) => ("CLI", record.to_json()),
        Packet::Chat(text) => ("MSG", text.clone()),
        Packet::Bundle(records) => (
            "NCI",
            records
                .iter()
                .map(PeerRecord::to_json)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Packet::DirectoryRequest => ("CIN", String::new()),
        Packet::Depart => ("DEL", String::new()),
        Packet::Heartbeat => ("PNG", String::new()),
        Packet::UploadOffer { filename, size } => ("URQ", format!("{}\n{}", filename, size)),
        Packet::UploadAccept { port } => ("ACP", port.to_string()),
    };

    let mut out = Vec::with_capacity(TAG_LEN + body.len());
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

pub fn decode(datagram: &[u8]) -> Result<Packet, CodecError> {
    if datagram.len() < TAG_LEN {
        return Err(CodecError::Truncated);
    }
    let (tag, body) = datagram.split_at(TAG_LEN);
    let body = std::str::from_utf8(body).map_err(|_| CodecError::NotUtf8)?;

    match tag {
        b"CLI" => Ok(Packet::Announce(PeerRecord::from_json(body)?)),
        b"MSG" => Ok(Packet::Chat(body.to_string())),
        b"NCI" => Ok(Packet::Bundle(decode_bundle(body))),
        b"CIN" => Ok(Packet::DirectoryRequest),
        b"DEL" => Ok(Packet::Depart),
        b"PNG" => Ok(Packet::Heartbeat),
        b"URQ" => {
            let (filename, size) = body.split_once('\n').ok_or(CodecError::BadField {
                tag: "URQ",
                field: "size",
            })?;
            if filename.is_empty() {
                return Err(CodecError::BadField {
                    tag: "URQ",
                    field: "filename",
                });
            }
            let size = size.trim().parse().map_err(|_| CodecError::BadField {
                tag: "URQ",
                field: "size",
            })?;
            Ok(Packet::UploadOffer {
                filename: filename.to_string(),
                size,
            })
        }
        b"ACP" => {
            let port = body.trim().parse().map_err(|_| CodecError::BadField {
                tag: "ACP",
                field: "port",
            })?;
            Ok(Packet::UploadAccept { port })
        }
        _ => Err(CodecError::UnknownTag(
            String::from_utf8_lossy(tag).into_owned(),
        )),
    }
}

/// Each line of an NCI body is one record; a bad line is skipped so one
/// corrupt entry cannot poison the whole bundle.
fn decode_bundle(body: &str) -> Vec<PeerRecord> {
    body.split('\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| match PeerRecord::from_json(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping undecodable bundle entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_record_round_trips() {
        let record = PeerRecord::new("gall", "localhost", 6008);
        let decoded = PeerRecord::from_json(&record.to_json()).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn announce_round_trips() {
        let packet = Packet::Announce(PeerRecord::new("name", "192.168.1.7", 6504));
        assert_eq!(decode(&encode(&packet)).unwrap(), packet);
    }

    #[test]
    fn directory_request_is_bare_tag() {
        assert_eq!(encode(&Packet::DirectoryRequest), b"CIN");
        assert_eq!(decode(b"CIN").unwrap(), Packet::DirectoryRequest);
    }

    #[test]
    fn empty_body_tags_decode() {
        assert_eq!(decode(b"DEL").unwrap(), Packet::Depart);
        assert_eq!(decode(b"PNG").unwrap(), Packet::Heartbeat);
    }

    #[test]
    fn malformed_announce_is_rejected() {
        assert!(decode(b"CLIaghdafasdfa").is_err());
        assert!(decode(b"CLI{\"name\": 3, \"ip\": \"x\", \"port\": 1}").is_err());
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        assert!(matches!(decode(b"CL"), Err(CodecError::Truncated)));
        assert!(matches!(decode(b""), Err(CodecError::Truncated)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(decode(b"XYZ"), Err(CodecError::UnknownTag(_))));
    }

    #[test]
    fn non_utf8_body_is_rejected() {
        let mut datagram = b"MSG".to_vec();
        datagram.extend_from_slice(&[0xff, 0xfe]);
        assert!(matches!(decode(&datagram), Err(CodecError::NotUtf8)));
    }

    #[test]
    fn bundle_skips_bad_lines() {
        let good = PeerRecord::new("alice", "10.0.0.1", 6001);
        let body = format!("NCI{}\nnot-json\n{}", good.to_json(), good.to_json());
        match decode(body.as_bytes()).unwrap() {
            Packet::Bundle(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0], good);
            }
            other => panic!("expected Bundle, got {:?}", other),
        }
    }

    #[test]
    fn bundle_round_trips() {
        let packet = Packet::Bundle(vec![
            PeerRecord::new("alice", "10.0.0.1", 6001),
            PeerRecord::new("bob", "localhost", 6002),
        ]);
        assert_eq!(decode(&encode(&packet)).unwrap(), packet);
    }

    #[test]
    fn upload_offer_round_trips() {
        let packet = Packet::UploadOffer {
            filename: "notes.txt".to_string(),
            size: 1234,
        };
        assert_eq!(encode(&packet), b"URQnotes.txt\n1234");
        assert_eq!(decode(b"URQnotes.txt\n1234").unwrap(), packet);
    }

    #[test]
    fn upload_offer_without_size_is_rejected() {
        assert!(decode(b"URQnotes.txt").is_err());
        assert!(decode(b"URQnotes.txt\nlots").is_err());
        assert!(decode(b"URQ\n12").is_err());
    }

    #[test]
    fn upload_accept_parses_port() {
        assert_eq!(
            decode(b"ACP40123").unwrap(),
            Packet::UploadAccept { port: 40123 }
        );
        assert!(decode(b"ACPnot-a-port").is_err());
        assert!(decode(b"ACP99999").is_err());
    }
}
