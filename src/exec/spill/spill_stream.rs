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
//! Deserializing reader over a finished run file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::exec::block::Block;
use crate::exec::spill::ipc::IpcSerde;
use crate::exec::spill::run_file::{RunIndexEntry, read_header, read_index, schema_hash};
use crate::exec::stream::BlockStream;

/// Streams the blocks of one spilled run back in write order.
#[derive(Debug)]
pub struct SpillBlockStream {
    file: File,
    header: Block,
    ipc: IpcSerde,
    index: Vec<RunIndexEntry>,
    position: usize,
}

impl SpillBlockStream {
    /// `header` is the constants-stripped schema the run was written with;
    /// a hash mismatch means the file belongs to a different operator.
    pub fn open(path: &Path, header: Block) -> Result<Self, String> {
        let mut file = File::open(path)
            .map_err(|e| format!("open spill file {} failed: {e}", path.display()))?;
        let run_header = read_header(&mut file)?;
        let schema = header.schema();
        if run_header.schema_hash != schema_hash(schema.as_ref()) {
            return Err(format!(
                "spill file {} schema hash mismatch",
                path.display()
            ));
        }
        let index = read_index(&mut file, &run_header)?;
        let ipc = IpcSerde::new(run_header.codec)?;
        Ok(Self {
            file,
            header,
            ipc,
            index,
            position: 0,
        })
    }
}

impl BlockStream for SpillBlockStream {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        let Some(entry) = self.index.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let mut buf = vec![0u8; entry.length as usize];
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|e| format!("seek spill message failed: {e}"))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| format!("read spill message failed: {e}"))?;
        let batch = self.ipc.decode_batch(self.header.schema(), &buf)?;
        Ok(Some(Block::from_record_batch(&batch)))
    }
}
