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
//! K-way merge over a set of already sorted in-memory blocks.
//!
//! Responsibilities:
//! - Pop rows from a cursor heap in key order and materialize output blocks
//!   of a target row count.
//! - Enforce the emitted-row limit across successive reads.

use std::collections::BinaryHeap;

use arrow::array::{Array, ArrayRef};
use arrow::compute::interleave;

use crate::exec::block::{Block, BlockColumn};
use crate::exec::sort::cursor::SortCursor;
use crate::exec::sort::{SortDescription, SortKeyFormat};
use crate::exec::stream::BlockStream;

/// Merges sorted blocks into a sorted stream of blocks.
///
/// The input columns are held here for the whole merge; cursors address
/// them by arena index. A single non-empty input block skips the merge
/// machinery and is passed through, truncated to the row limit.
pub struct SortedBlocksMerger {
    header: Block,
    arrays: Vec<Vec<ArrayRef>>,
    queue: BinaryHeap<SortCursor>,
    single: Option<Block>,
    max_merged_block_size: usize,
    limit: usize,
    total_merged_rows: usize,
    done: bool,
}

impl SortedBlocksMerger {
    pub fn new(
        header: Block,
        blocks: Vec<Block>,
        description: &SortDescription,
        max_merged_block_size: usize,
        limit: usize,
    ) -> Result<Self, String> {
        let blocks: Vec<Block> = blocks.into_iter().filter(|b| !b.is_empty()).collect();

        if blocks.len() == 1 {
            let mut blocks = blocks;
            let single = blocks.pop().map(|block| {
                if limit > 0 && block.rows() > limit {
                    block.cut(0, limit)
                } else {
                    block
                }
            });
            return Ok(Self {
                header,
                arrays: Vec::new(),
                queue: BinaryHeap::new(),
                single,
                max_merged_block_size,
                limit,
                total_merged_rows: 0,
                done: false,
            });
        }

        let format = SortKeyFormat::new(&header, description)?;
        let mut queue = BinaryHeap::with_capacity(blocks.len());
        let mut arrays = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            queue.push(SortCursor::new(index, format.key_rows(block)?));
            let mut columns = Vec::with_capacity(block.num_columns());
            for c in 0..block.num_columns() {
                columns.push(block.materialized(c)?);
            }
            arrays.push(columns);
        }

        Ok(Self {
            header,
            arrays,
            queue,
            single: None,
            max_merged_block_size,
            limit,
            total_merged_rows: 0,
            done: false,
        })
    }

    fn materialize(&self, indices: &[(usize, usize)]) -> Result<Block, String> {
        let mut columns = Vec::with_capacity(self.header.num_columns());
        for c in 0..self.header.num_columns() {
            let sources: Vec<&dyn Array> = self.arrays.iter().map(|cols| cols[c].as_ref()).collect();
            let merged =
                interleave(&sources, indices).map_err(|e| format!("merge rows failed: {e}"))?;
            columns.push(BlockColumn::Plain(merged));
        }
        Block::try_new(self.header.schema(), columns, indices.len())
    }
}

impl BlockStream for SortedBlocksMerger {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        if self.done {
            return Ok(None);
        }
        if let Some(block) = self.single.take() {
            self.done = true;
            return Ok(Some(block));
        }

        let mut indices = Vec::with_capacity(self.max_merged_block_size.min(8 * 1024));
        while let Some(mut cursor) = self.queue.pop() {
            indices.push((cursor.source(), cursor.pos()));
            if !cursor.is_last() {
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
        Ok(Some(self.materialize(&indices)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::block::block_from_columns;
    use crate::exec::sort::SortColumnDesc;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, FieldRef};
    use std::sync::Arc;

    fn int_block(values: Vec<i64>) -> Block {
        let fields: Vec<FieldRef> = vec![Arc::new(Field::new("k", DataType::Int64, true))];
        let rows = values.len();
        block_from_columns(
            fields,
            vec![BlockColumn::Plain(Arc::new(Int64Array::from(values)))],
            rows,
        )
        .unwrap()
    }

    fn drain_values(merger: &mut SortedBlocksMerger) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(block) = merger.read().unwrap() {
            let values = block.materialized(0).unwrap();
            let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
            out.extend(values.values().iter().copied());
        }
        out
    }

    fn description() -> SortDescription {
        vec![SortColumnDesc::by_name("k")]
    }

    #[test]
    fn merges_sorted_blocks_into_one_order() {
        let header = int_block(vec![]).clone_empty();
        let blocks = vec![int_block(vec![1, 4, 7]), int_block(vec![2, 3, 9])];
        let mut merger = SortedBlocksMerger::new(header, blocks, &description(), 4, 0).unwrap();
        assert_eq!(drain_values(&mut merger), vec![1, 2, 3, 4, 7, 9]);
    }

    #[test]
    fn respects_block_size_and_limit() {
        let header = int_block(vec![]).clone_empty();
        let blocks = vec![int_block(vec![3, 5]), int_block(vec![1, 2, 4])];
        let mut merger =
            SortedBlocksMerger::new(header.clone(), blocks.clone(), &description(), 2, 0).unwrap();
        let first = merger.read().unwrap().unwrap();
        assert_eq!(first.rows(), 2);

        let mut limited = SortedBlocksMerger::new(header, blocks, &description(), 10, 3).unwrap();
        assert_eq!(drain_values(&mut limited), vec![1, 2, 3]);
    }

    #[test]
    fn single_block_is_passed_through() {
        let header = int_block(vec![]).clone_empty();
        let blocks = vec![int_block(vec![]), int_block(vec![5, 1, 2])];
        let mut merger = SortedBlocksMerger::new(header, blocks, &description(), 2, 0).unwrap();
        // Not re-sorted: a single surviving block is yielded as is.
        assert_eq!(drain_values(&mut merger), vec![5, 1, 2]);
    }

    #[test]
    fn single_block_is_truncated_to_limit() {
        let header = int_block(vec![]).clone_empty();
        let blocks = vec![int_block(vec![1, 2, 3, 4, 5])];
        let mut merger = SortedBlocksMerger::new(header, blocks, &description(), 1024, 2).unwrap();
        assert_eq!(drain_values(&mut merger), vec![1, 2]);
    }

    #[test]
    fn empty_input_is_eof() {
        let header = int_block(vec![]).clone_empty();
        let mut merger =
            SortedBlocksMerger::new(header, vec![int_block(vec![])], &description(), 2, 0).unwrap();
        assert!(merger.read().unwrap().is_none());
        assert!(merger.read().unwrap().is_none());
    }

    #[test]
    fn descending_direction_reverses_order() {
        let header = int_block(vec![]).clone_empty();
        let blocks = vec![int_block(vec![7, 4, 1]), int_block(vec![9, 3, 2])];
        let mut level = SortColumnDesc::by_name("k");
        level.asc = false;
        let mut merger = SortedBlocksMerger::new(header, blocks, &vec![level], 4, 0).unwrap();
        assert_eq!(drain_values(&mut merger), vec![9, 7, 4, 3, 2, 1]);
    }
}
