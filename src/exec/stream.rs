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
//! Pull-based block stream contract.

use std::collections::VecDeque;

use crate::exec::block::Block;

/// A pull-based stream of blocks. `Ok(None)` is end of stream; zero-row
/// blocks are legal and skipped by merging operators.
pub trait BlockStream {
    /// Zero-row block describing the column schema, including which columns
    /// are constant.
    fn header(&self) -> &Block;

    fn read(&mut self) -> Result<Option<Block>, String>;
}

/// Stream over an in-memory list of blocks.
pub struct MemoryBlockStream {
    header: Block,
    blocks: VecDeque<Block>,
}

impl MemoryBlockStream {
    pub fn new(header: Block, blocks: Vec<Block>) -> Self {
        Self {
            header,
            blocks: blocks.into(),
        }
    }

    /// Derives the header from the first block.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, String> {
        let header = blocks
            .first()
            .map(Block::clone_empty)
            .ok_or_else(|| "memory block stream needs at least one block".to_string())?;
        Ok(Self::new(header, blocks))
    }
}

impl BlockStream for MemoryBlockStream {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        Ok(self.blocks.pop_front())
    }
}
