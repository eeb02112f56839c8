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
//! K-way merge over already sorted block streams.
//!
//! Responsibilities:
//! - Keep one cursor per upstream over that upstream's current block and
//!   refill from the same upstream when a cursor exhausts.
//! - Hold upstream blocks in a grow-and-prune arena so emitted row indices
//!   stay valid while bounding resident memory to one block per upstream.

use std::collections::{BinaryHeap, VecDeque};

use arrow::array::{Array, ArrayRef};
use arrow::compute::interleave;

use crate::exec::block::{Block, BlockColumn};
use crate::exec::sort::cursor::SortCursor;
use crate::exec::sort::{SortDescription, SortKeyFormat};
use crate::exec::stream::BlockStream;

struct ArenaSlot {
    id: usize,
    stream_index: usize,
    arrays: Vec<ArrayRef>,
}

/// Merges sorted streams (spilled runs, in-memory mergers) into one sorted
/// stream of blocks.
pub struct SortedStreamsMerger {
    header: Block,
    format: SortKeyFormat,
    streams: Vec<Box<dyn BlockStream>>,
    arena: VecDeque<ArenaSlot>,
    next_slot_id: usize,
    queue: BinaryHeap<SortCursor>,
    initialized: bool,
    max_merged_block_size: usize,
    limit: usize,
    total_merged_rows: usize,
    done: bool,
}

impl SortedStreamsMerger {
    pub fn new(
        header: Block,
        streams: Vec<Box<dyn BlockStream>>,
        description: &SortDescription,
        max_merged_block_size: usize,
        limit: usize,
    ) -> Result<Self, String> {
        let format = SortKeyFormat::new(&header, description)?;
        Ok(Self {
            header,
            format,
            streams,
            arena: VecDeque::new(),
            next_slot_id: 0,
            queue: BinaryHeap::new(),
            initialized: false,
            max_merged_block_size,
            limit,
            total_merged_rows: 0,
            done: false,
        })
    }

    /// Pulls the next non-empty block from one upstream and enqueues a
    /// cursor for it; does nothing once that upstream is exhausted.
    fn refill_from_stream(&mut self, stream_index: usize) -> Result<(), String> {
        loop {
            let Some(block) = self.streams[stream_index].read()? else {
                return Ok(());
            };
            if block.is_empty() {
                continue;
            }
            let key_rows = self.format.key_rows(&block)?;
            let mut arrays = Vec::with_capacity(block.num_columns());
            for c in 0..block.num_columns() {
                arrays.push(block.materialized(c)?);
            }
            let id = self.next_slot_id;
            self.next_slot_id += 1;
            self.arena.push_back(ArenaSlot {
                id,
                stream_index,
                arrays,
            });
            self.queue.push(SortCursor::new(id, key_rows));
            return Ok(());
        }
    }

    fn stream_of_slot(&self, slot_id: usize) -> usize {
        let base = self.arena.front().map(|s| s.id).unwrap_or(0);
        self.arena[slot_id - base].stream_index
    }

    fn materialize(&self, indices: &[(usize, usize)]) -> Result<Block, String> {
        let base = self.arena.front().map(|s| s.id).unwrap_or(0);
        let rebased: Vec<(usize, usize)> = indices
            .iter()
            .map(|(slot_id, row)| (slot_id - base, *row))
            .collect();
        let mut columns = Vec::with_capacity(self.header.num_columns());
        for c in 0..self.header.num_columns() {
            let sources: Vec<&dyn Array> = self
                .arena
                .iter()
                .map(|slot| slot.arrays[c].as_ref())
                .collect();
            let merged =
                interleave(&sources, &rebased).map_err(|e| format!("merge rows failed: {e}"))?;
            columns.push(BlockColumn::Plain(merged));
        }
        Block::try_new(self.header.schema(), columns, indices.len())
    }

    /// Drops arena blocks no longer addressed by any live cursor. Only safe
    /// between emitted blocks, when no row indices are pending.
    fn prune_arena(&mut self) {
        match self.queue.iter().map(|c| c.source()).min() {
            None => self.arena.clear(),
            Some(min_live) => {
                while self.arena.front().is_some_and(|slot| slot.id < min_live) {
                    self.arena.pop_front();
                }
            }
        }
    }
}

impl BlockStream for SortedStreamsMerger {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        if self.done {
            return Ok(None);
        }
        if !self.initialized {
            self.initialized = true;
            for stream_index in 0..self.streams.len() {
                self.refill_from_stream(stream_index)?;
            }
        }

        let mut indices = Vec::with_capacity(self.max_merged_block_size.min(8 * 1024));
        while let Some(mut cursor) = self.queue.pop() {
            indices.push((cursor.source(), cursor.pos()));
            if cursor.is_last() {
                let stream_index = self.stream_of_slot(cursor.source());
                drop(cursor);
                self.refill_from_stream(stream_index)?;
            } else {
                cursor.advance();
                self.queue.push(cursor);
            }

            self.total_merged_rows += 1;
            if self.limit > 0 && self.total_merged_rows == self.limit {
                self.done = true;
                break;
            }
            if indices.len() == self.max_merged_block_size {
                break;
            }
        }

        if indices.is_empty() {
            self.done = true;
            return Ok(None);
        }
        if self.queue.is_empty() {
            self.done = true;
        }
        let block = self.materialize(&indices)?;
        self.prune_arena();
        Ok(Some(block))
    }
}
