/*
 * Copyright 2019-2022 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lz4::{Decoder as Lz4Decoder, EncoderBuilder as Lz4EncoderBuilder};

use super::release::Release;

/// The magic number at the start of every LZ4 frame.
const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

/// The LZ4 compression level used for release payloads.
const COMPRESSION_LEVEL: u32 = 9;

fn encoding_error(error: impl ToString) -> crate::Error {
    crate::Error::Encoding(error.to_string())
}

fn compress(data: &[u8]) -> crate::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len());
    let mut encoder = Lz4EncoderBuilder::new()
        .level(COMPRESSION_LEVEL)
        .build(&mut output)
        .map_err(encoding_error)?;
    encoder.write_all(data).map_err(encoding_error)?;
    let (_, result) = encoder.finish();
    result.map_err(encoding_error)?;
    Ok(output)
}

fn decompress(data: &[u8]) -> crate::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 4);
    let mut decoder = Lz4Decoder::new(data).map_err(encoding_error)?;
    decoder.read_to_end(&mut output).map_err(encoding_error)?;
    let (_, result) = decoder.finish();
    result.map_err(encoding_error)?;
    Ok(output)
}

/// Encode a `release` as a transport-safe string.
///
/// The release is serialized to JSON, compressed as an LZ4 frame and base64-encoded. The custom
/// labels of the release are not part of the payload.
pub fn encode(release: &Release) -> crate::Result<String> {
    let serialized = serde_json::to_vec(release).map_err(encoding_error)?;
    let compressed = compress(&serialized)?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a release which was encoded with `encode`.
///
/// Payloads which are base64-encoded JSON without compression are also accepted.
///
/// # Errors
/// - `Error::Encoding`: The data is not valid base64, the compressed frame is corrupt or
/// truncated, or it does not contain a valid release.
pub fn decode(data: impl AsRef<[u8]>) -> crate::Result<Release> {
    let bytes = STANDARD.decode(data.as_ref()).map_err(encoding_error)?;
    let serialized = if bytes.starts_with(&LZ4_MAGIC) {
        decompress(&bytes)?
    } else {
        bytes
    };
    serde_json::from_slice(&serialized).map_err(encoding_error)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::release::{Info, Status};

    fn release() -> Release {
        Release {
            name: "wordpress".into(),
            version: 4,
            namespace: "blog".into(),
            info: Info {
                first_deployed: Some(Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap()),
                last_deployed: Some(Utc::now()),
                deleted: None,
                description: "Upgrade complete".into(),
                status: Status::Deployed,
                notes: "Visit http://localhost".into(),
            },
            chart: Some(json!({"metadata": {"name": "wordpress", "version": "15.2.0"}})),
            config: Some(json!({"replicaCount": 3})),
            manifest: "apiVersion: v1\nkind: Service\n".repeat(50),
            hooks: vec![json!({"name": "db-migrate", "events": ["pre-upgrade"]})],
            labels: Default::default(),
        }
    }

    #[test]
    fn encoded_release_round_trips() {
        let expected = release();
        let encoded = encode(&expected).unwrap();
        assert_eq!(decode(&encoded).unwrap(), expected);
    }

    #[test]
    fn encoded_release_is_compressed() {
        let release = release();
        let encoded = encode(&release).unwrap();
        let raw = STANDARD.decode(&encoded).unwrap();
        assert!(raw.starts_with(&LZ4_MAGIC));
        assert!(encoded.len() < serde_json::to_vec(&release).unwrap().len());
    }

    #[test]
    fn uncompressed_payload_is_accepted() {
        let expected = release();
        let legacy = STANDARD.encode(serde_json::to_vec(&expected).unwrap());
        assert_eq!(decode(legacy).unwrap(), expected);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            decode("not base64!"),
            Err(crate::Error::Encoding(_))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let encoded = encode(&release()).unwrap();
        let raw = STANDARD.decode(&encoded).unwrap();
        let truncated = STANDARD.encode(&raw[..raw.len() / 2]);
        assert!(matches!(decode(truncated), Err(crate::Error::Encoding(_))));
    }

    #[test]
    fn invalid_record_is_rejected() {
        let payload = STANDARD.encode(br#"{"version": 1}"#);
        assert!(matches!(decode(payload), Err(crate::Error::Encoding(_))));
    }
}
