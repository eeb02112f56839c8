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
//! Completes sorting on a stream already ordered by a key prefix.
//!
//! Rows equal under the pre-sorted prefix form contiguous chunks in the
//! input; each chunk is re-sorted under the full key independently, so only
//! one chunk is resident at a time.

use crate::exec::block::Block;
use crate::exec::sort::{
    SortDescription, SortKeyFormat, SortedBlocksMerger, enrich_block_with_constants,
    remove_constants_from_block, remove_constants_from_description,
};
use crate::exec::stream::BlockStream;

/// Refines a stream sorted by `description_sorted` into one sorted by
/// `description_to_sort` (a refinement of the prefix), chunk by chunk.
pub struct FinishSortStream {
    input: Box<dyn BlockStream>,
    header: Block,
    header_without_constants: Block,
    description_to_sort: SortDescription,
    sorted_format: SortKeyFormat,
    to_sort_format: SortKeyFormat,
    max_merged_block_size: usize,
    limit: usize,
    total_rows_processed: usize,

    blocks: Vec<Block>,
    tail_block: Option<Block>,
    merger: Option<SortedBlocksMerger>,
    end_of_stream: bool,
}

impl FinishSortStream {
    pub fn new(
        input: Box<dyn BlockStream>,
        description_sorted: &SortDescription,
        description_to_sort: &SortDescription,
        max_merged_block_size: usize,
        limit: usize,
    ) -> Result<Self, String> {
        if max_merged_block_size == 0 {
            return Err("max_merged_block_size must be positive".to_string());
        }
        let header = input.header().clone();
        let header_without_constants = remove_constants_from_block(&header)?;
        let description_sorted = remove_constants_from_description(&header, description_sorted)?;
        let description_to_sort = remove_constants_from_description(&header, description_to_sort)?;
        let sorted_format =
            SortKeyFormat::new(&header_without_constants, &description_sorted)?;
        let to_sort_format = SortKeyFormat::new(&header_without_constants, &description_to_sort)?;
        Ok(Self {
            input,
            header,
            header_without_constants,
            description_to_sort,
            sorted_format,
            to_sort_format,
            max_merged_block_size,
            limit,
            total_rows_processed: 0,
            blocks: Vec::new(),
            tail_block: None,
            merger: None,
            end_of_stream: false,
        })
    }

    /// First row index of `block` whose pre-sorted key exceeds the last row
    /// of `last_block`; `block.rows()` when the whole block still belongs to
    /// the current chunk.
    fn find_tail_pos(&self, last_block: &Block, block: &Block) -> Result<usize, String> {
        if self.sorted_format.is_empty() {
            // No pre-sorted key: the whole input is one chunk.
            return Ok(block.rows());
        }
        let tail = last_block.cut(last_block.rows() - 1, 1);
        let tail_keys = self.sorted_format.key_rows(&tail)?;
        let tail_key = tail_keys.row(0);
        let keys = self.sorted_format.key_rows(block)?;

        let mut lo = 0usize;
        let mut hi = block.rows();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if keys.row(mid) <= tail_key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn emit(&mut self, block: Block) -> Result<Option<Block>, String> {
        let mut block = block;
        if self.limit > 0 {
            let remaining = self.limit - self.total_rows_processed;
            if block.rows() > remaining {
                block = block.cut(0, remaining);
            }
        }
        self.total_rows_processed += block.rows();
        Ok(Some(enrich_block_with_constants(&block, &self.header)?))
    }
}

impl BlockStream for FinishSortStream {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        // Only constant columns in the full sort key: forward unchanged.
        if self.description_to_sort.is_empty() {
            return self.input.read();
        }

        loop {
            if self.limit > 0 && self.total_rows_processed >= self.limit {
                return Ok(None);
            }

            if let Some(merger) = self.merger.as_mut() {
                if let Some(block) = merger.read()? {
                    return self.emit(block);
                }
                self.merger = None;
            }
            if self.end_of_stream {
                return Ok(None);
            }

            self.blocks.clear();
            if let Some(tail) = self.tail_block.take() {
                self.blocks.push(tail);
            }

            // Accumulate blocks until one starts a new chunk or the input
            // ends; the straddling block is split at the chunk boundary.
            let mut split: Option<(Block, usize)> = None;
            loop {
                let Some(block) = self.input.read()? else {
                    self.end_of_stream = true;
                    break;
                };
                if block.is_empty() {
                    continue;
                }
                // Ordering each block under the full key keeps the prefix
                // order intact (the full key refines it) and gives the
                // chunk merge the sorted inputs it assumes.
                let block = self
                    .to_sort_format
                    .sort_block(&remove_constants_from_block(&block)?)?;
                if let Some(last) = self.blocks.last() {
                    let tail_pos = self.find_tail_pos(last, &block)?;
                    if tail_pos < block.rows() {
                        split = Some((block, tail_pos));
                        break;
                    }
                }
                self.blocks.push(block);
            }

            if let Some((block, tail_pos)) = split {
                // The next chunk may continue past this block, so its suffix
                // seeds the next accumulation round.
                let head = block.cut(0, tail_pos);
                self.tail_block = Some(block.cut(tail_pos, block.rows() - tail_pos));
                if !head.is_empty() {
                    self.blocks.push(head);
                }
            }

            if self.blocks.is_empty() {
                return Ok(None);
            }
            self.merger = Some(SortedBlocksMerger::new(
                self.header_without_constants.clone(),
                std::mem::take(&mut self.blocks),
                &self.description_to_sort,
                self.max_merged_block_size,
                self.limit,
            )?);
        }
    }
}
