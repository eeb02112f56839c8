// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Arrow IPC encoding of single record batches for run files.

use std::fmt;

use arrow::array::RecordBatch;
use arrow::buffer::Buffer;
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileDecoder;
use arrow::ipc::writer::{DictionaryTracker, IpcDataGenerator, IpcWriteOptions, write_message};
use arrow::ipc::{Block as IpcBlock, CompressionType, MetadataVersion};

const IPC_ALIGNMENT: usize = 64;
const CONTINUATION_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Compression applied to IPC message bodies in run files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcCodec {
    Uncompressed,
    Lz4,
    Zstd,
}

impl IpcCodec {
    pub fn as_u8(self) -> u8 {
        match self {
            IpcCodec::Uncompressed => 0,
            IpcCodec::Lz4 => 1,
            IpcCodec::Zstd => 2,
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(IpcCodec::Uncompressed),
            "lz4" => Ok(IpcCodec::Lz4),
            "zstd" => Ok(IpcCodec::Zstd),
            _ => Err(format!("unsupported run file compression: {value}")),
        }
    }
}

impl TryFrom<u8> for IpcCodec {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IpcCodec::Uncompressed),
            1 => Ok(IpcCodec::Lz4),
            2 => Ok(IpcCodec::Zstd),
            _ => Err(format!("unknown run file codec value: {value}")),
        }
    }
}

impl fmt::Display for IpcCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcCodec::Uncompressed => write!(f, "none"),
            IpcCodec::Lz4 => write!(f, "lz4"),
            IpcCodec::Zstd => write!(f, "zstd"),
        }
    }
}

/// Encodes and decodes one self-contained IPC message per record batch.
#[derive(Debug)]
pub struct IpcSerde {
    codec: IpcCodec,
    write_options: IpcWriteOptions,
}

impl IpcSerde {
    pub fn new(codec: IpcCodec) -> Result<Self, String> {
        let options = IpcWriteOptions::try_new(IPC_ALIGNMENT, false, MetadataVersion::V5)
            .map_err(map_arrow_err)?;
        let write_options = match codec {
            IpcCodec::Uncompressed => options,
            IpcCodec::Lz4 => options
                .try_with_compression(Some(CompressionType::LZ4_FRAME))
                .map_err(map_arrow_err)?,
            IpcCodec::Zstd => options
                .try_with_compression(Some(CompressionType::ZSTD))
                .map_err(map_arrow_err)?,
        };
        Ok(Self {
            codec,
            write_options,
        })
    }

    pub fn codec(&self) -> IpcCodec {
        self.codec
    }

    pub fn encode_batch(&self, batch: &RecordBatch) -> Result<Vec<u8>, String> {
        if schema_has_dictionary(batch.schema().as_ref()) {
            return Err("dictionary-encoded columns are not supported in run files".to_string());
        }

        let data_gen = IpcDataGenerator::default();
        let mut dictionary_tracker = DictionaryTracker::new(false);
        let (encoded_dictionaries, encoded_message) = data_gen
            .encoded_batch(batch, &mut dictionary_tracker, &self.write_options)
            .map_err(map_arrow_err)?;
        if !encoded_dictionaries.is_empty() {
            return Err("dictionary batch messages are not supported in run files".to_string());
        }

        let mut buffer = Vec::new();
        write_message(&mut buffer, encoded_message, &self.write_options)
            .map_err(map_arrow_err)?;
        Ok(buffer)
    }

    pub fn decode_batch(&self, schema: SchemaRef, message: &[u8]) -> Result<RecordBatch, String> {
        let metadata_len = ipc_metadata_len(message)?;
        if metadata_len > message.len() {
            return Err("ipc message metadata length exceeds buffer size".to_string());
        }
        let body_len = message.len() - metadata_len;
        let block = IpcBlock::new(0, metadata_len as i32, body_len as i64);
        let buffer = Buffer::from(message.to_vec());
        FileDecoder::new(schema, MetadataVersion::V5)
            .read_record_batch(&block, &buffer)
            .map_err(map_arrow_err)?
            .ok_or_else(|| "ipc message did not contain a record batch".to_string())
    }
}

fn ipc_metadata_len(message: &[u8]) -> Result<usize, String> {
    if message.len() < 8 {
        return Err("ipc message is too small to contain a header".to_string());
    }
    let (prefix, len_bytes) = if message[..4] == CONTINUATION_MARKER {
        (8usize, &message[4..8])
    } else {
        (4usize, &message[..4])
    };
    let meta_len = i32::from_le_bytes(len_bytes.try_into().unwrap());
    if meta_len < 0 {
        return Err("ipc message has negative metadata length".to_string());
    }
    let raw = prefix
        .checked_add(meta_len as usize)
        .ok_or_else(|| "ipc metadata length overflow".to_string())?;
    Ok(raw.next_multiple_of(IPC_ALIGNMENT))
}

fn schema_has_dictionary(schema: &Schema) -> bool {
    fn walk(data_type: &DataType) -> bool {
        match data_type {
            DataType::Dictionary(_, _) => true,
            DataType::List(field)
            | DataType::LargeList(field)
            | DataType::FixedSizeList(field, _)
            | DataType::Map(field, _) => walk(field.data_type()),
            DataType::Struct(fields) => fields.iter().any(|f| walk(f.data_type())),
            _ => false,
        }
    }
    schema.fields().iter().any(|f| walk(f.data_type()))
}

fn map_arrow_err(err: ArrowError) -> String {
    format!("arrow ipc error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::Field;
    use std::sync::Arc;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("s", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        for codec in [IpcCodec::Uncompressed, IpcCodec::Lz4, IpcCodec::Zstd] {
            let serde = IpcSerde::new(codec).unwrap();
            let batch = sample_batch();
            let bytes = serde.encode_batch(&batch).unwrap();
            let decoded = serde.decode_batch(batch.schema(), &bytes).unwrap();
            assert_eq!(decoded, batch, "codec={codec}");
        }
    }

    #[test]
    fn codec_parse_and_tags_round_trip() {
        for codec in [IpcCodec::Uncompressed, IpcCodec::Lz4, IpcCodec::Zstd] {
            assert_eq!(IpcCodec::try_from(codec.as_u8()).unwrap(), codec);
            assert_eq!(IpcCodec::parse(&codec.to_string()).unwrap(), codec);
        }
        assert!(IpcCodec::parse("gzip").is_err());
        assert!(IpcCodec::try_from(9u8).is_err());
    }
}
