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
//! Incremental run-file writer.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use arrow::datatypes::SchemaRef;

use crate::exec::block::Block;
use crate::exec::spill::ipc::{IpcCodec, IpcSerde};
use crate::exec::spill::run_file::{
    RUN_HEADER_LEN, RunFileHeader, RunIndexEntry, schema_hash, write_header, write_index,
};

/// Appends blocks to an open run file; `finish` writes the trailing index
/// and patches the header. Blocks must match the schema and carry no
/// constant columns.
pub struct SpillWriter {
    file: std::fs::File,
    ipc: IpcSerde,
    header: RunFileHeader,
    index: Vec<RunIndexEntry>,
    offset: u64,
}

impl SpillWriter {
    pub fn create(path: &Path, schema: SchemaRef, codec: IpcCodec) -> Result<Self, String> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| format!("open spill file {} failed: {e}", path.display()))?;
        let header = RunFileHeader::new(codec, schema_hash(schema.as_ref()));
        // Zeroed placeholder; the real header lands in finish(), so an
        // abandoned file fails magic validation instead of reading as an
        // empty run.
        file.write_all(&[0u8; RUN_HEADER_LEN])
            .map_err(|e| format!("write run file header failed: {e}"))?;
        Ok(Self {
            file,
            ipc: IpcSerde::new(codec)?,
            header,
            index: Vec::new(),
            offset: RUN_HEADER_LEN as u64,
        })
    }

    pub fn append_block(&mut self, block: &Block) -> Result<(), String> {
        let batch = block.to_record_batch()?;
        let message = self.ipc.encode_batch(&batch)?;
        let length = u32::try_from(message.len())
            .map_err(|_| "run file message length overflows u32".to_string())?;
        let num_rows = u32::try_from(batch.num_rows())
            .map_err(|_| "run file message row count overflows u32".to_string())?;
        self.file
            .write_all(&message)
            .map_err(|e| format!("write run file message failed: {e}"))?;
        self.index.push(RunIndexEntry {
            offset: self.offset,
            length,
            num_rows,
        });
        self.offset += message.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), String> {
        self.header.num_messages = u32::try_from(self.index.len())
            .map_err(|_| "run file message count overflows u32".to_string())?;
        self.header.index_offset = self.offset;
        write_index(&mut self.file, &self.index)?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| format!("seek run file header failed: {e}"))?;
        write_header(&mut self.file, &self.header)?;
        self.file
            .flush()
            .map_err(|e| format!("flush run file failed: {e}"))?;
        Ok(())
    }
}
