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
//! Run-file layout: fixed header, concatenated IPC messages, trailing index.
//!
//! The header is written once with placeholder counts and patched on finish,
//! so a crashed writer leaves a file that fails validation instead of
//! yielding a truncated run.

use std::io::{Read, Seek, SeekFrom, Write};

use arrow::datatypes::Schema;

use crate::exec::spill::ipc::IpcCodec;

const RUN_MAGIC: [u8; 4] = *b"SRUN";
const RUN_VERSION: u16 = 1;
pub const RUN_HEADER_LEN: usize = 32;
pub const RUN_INDEX_ENTRY_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct RunFileHeader {
    pub codec: IpcCodec,
    pub num_messages: u32,
    pub index_offset: u64,
    pub schema_hash: u64,
}

impl RunFileHeader {
    pub fn new(codec: IpcCodec, schema_hash: u64) -> Self {
        Self {
            codec,
            num_messages: 0,
            index_offset: 0,
            schema_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; RUN_HEADER_LEN] {
        let mut buf = [0u8; RUN_HEADER_LEN];
        buf[..4].copy_from_slice(&RUN_MAGIC);
        buf[4..6].copy_from_slice(&RUN_VERSION.to_le_bytes());
        buf[6] = self.codec.as_u8();
        buf[7] = 0;
        buf[8..12].copy_from_slice(&self.num_messages.to_le_bytes());
        buf[12..16].copy_from_slice(&0u32.to_le_bytes());
        buf[16..24].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.schema_hash.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < RUN_HEADER_LEN {
            return Err("run file header is too small".to_string());
        }
        if buf[..4] != RUN_MAGIC {
            return Err("run file magic mismatch".to_string());
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != RUN_VERSION {
            return Err(format!("unsupported run file version: {version}"));
        }
        let codec = IpcCodec::try_from(buf[6])?;
        let num_messages = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let index_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let schema_hash = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        if num_messages > 0 && index_offset < RUN_HEADER_LEN as u64 {
            return Err("run file was not finished".to_string());
        }
        Ok(Self {
            codec,
            num_messages,
            index_offset,
            schema_hash,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunIndexEntry {
    pub offset: u64,
    pub length: u32,
    pub num_rows: u32,
}

impl RunIndexEntry {
    pub fn to_bytes(&self) -> [u8; RUN_INDEX_ENTRY_LEN] {
        let mut buf = [0u8; RUN_INDEX_ENTRY_LEN];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_rows.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < RUN_INDEX_ENTRY_LEN {
            return Err("run file index entry is too small".to_string());
        }
        Ok(Self {
            offset: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            length: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            num_rows: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

pub fn write_header<W: Write>(writer: &mut W, header: &RunFileHeader) -> Result<(), String> {
    writer
        .write_all(&header.to_bytes())
        .map_err(|e| format!("write run file header failed: {e}"))
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<RunFileHeader, String> {
    let mut buf = [0u8; RUN_HEADER_LEN];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("read run file header failed: {e}"))?;
    RunFileHeader::from_bytes(&buf)
}

pub fn write_index<W: Write>(writer: &mut W, entries: &[RunIndexEntry]) -> Result<(), String> {
    for entry in entries {
        writer
            .write_all(&entry.to_bytes())
            .map_err(|e| format!("write run file index failed: {e}"))?;
    }
    Ok(())
}

pub fn read_index<R: Read + Seek>(
    reader: &mut R,
    header: &RunFileHeader,
) -> Result<Vec<RunIndexEntry>, String> {
    if header.num_messages == 0 {
        return Ok(Vec::new());
    }
    reader
        .seek(SeekFrom::Start(header.index_offset))
        .map_err(|e| format!("seek to run file index failed: {e}"))?;
    let mut entries = Vec::with_capacity(header.num_messages as usize);
    let mut buf = [0u8; RUN_INDEX_ENTRY_LEN];
    for _ in 0..header.num_messages {
        reader
            .read_exact(&mut buf)
            .map_err(|e| format!("read run file index entry failed: {e}"))?;
        entries.push(RunIndexEntry::from_bytes(&buf)?);
    }
    Ok(entries)
}

/// FNV-1a over the schema's display form; cheap guard against reading a run
/// back with the wrong schema.
pub fn schema_hash(schema: &Schema) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET;
    for byte in schema.to_string().as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
